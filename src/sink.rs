//! Downstream record consumers.

/// A consumer of harvested records.
///
/// Each delivered record is observed exactly once per registered sink, in
/// registration order, before the checkpoint advances past it. Fan-out is
/// sequential; a sink never sees concurrent invocations of itself.
pub trait Sink: Send + Sync {
    fn on_record(&self, record: &str);
}

/// Any thread-safe closure over a record is a sink.
impl<F> Sink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_record(&self, record: &str) {
        self(record)
    }
}
