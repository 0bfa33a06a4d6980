// SPDX-License-Identifier: Apache-2.0

//! The harvester state machine.
//!
//! Three cooperating activities run per harvester: a refresher keeping the
//! pending-file list fresh, a bootstrap wait that adopts the first
//! candidate when no checkpointed file exists, and a reader loop that
//! drains the current file, fans records out to sinks, and checkpoints
//! after every delivery. Rotation and removal of the current file switch
//! the reader to the next pending candidate.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{self, Checkpoint};
use crate::config::HarvesterConfig;
use crate::error::{Error, ReadError, Result};
use crate::reader::LineReader;
use crate::scanner::{FileScanner, PendingSet};
use crate::sink::Sink;

/// Tails a rotating set of files, delivering each record to the
/// registered sinks and checkpointing progress after every delivery.
///
/// Lifecycle: [`new`](Harvester::new) validates the configuration,
/// [`init`](Harvester::init) loads the checkpoint and reopens the
/// checkpointed file, [`run`](Harvester::run) spawns the background
/// activities, [`close`](Harvester::close) retires the current reader.
pub struct Harvester {
    config: HarvesterConfig,
    scanner: FileScanner,
    shared: Arc<Shared>,
}

/// State shared by the harvester handle and its background tasks.
struct Shared {
    meta_path: std::path::PathBuf,
    pending: Arc<PendingSet>,
    checkpoint: Arc<Mutex<Checkpoint>>,
    sinks: RwLock<Vec<Box<dyn Sink>>>,
    reader: Mutex<Option<LineReader>>,
}

/// What one reader step produced, captured outside the reader lock.
enum Step {
    Deliver(String, u64),
    Failed(ReadError),
}

impl Harvester {
    /// Build a harvester from a validated configuration.
    pub fn new(config: HarvesterConfig) -> Result<Self> {
        let (dir, pattern) = config.validate()?;
        let scanner = FileScanner::new(dir, pattern);

        let shared = Arc::new(Shared {
            meta_path: config.meta_path.clone(),
            pending: Arc::new(PendingSet::default()),
            checkpoint: Arc::new(Mutex::new(Checkpoint::default())),
            sinks: RwLock::new(Vec::new()),
            reader: Mutex::new(None),
        });

        Ok(Self {
            config,
            scanner,
            shared,
        })
    }

    /// Load the checkpoint and, when it names a file, reopen it at the
    /// recorded offset.
    ///
    /// A checkpointed file that no longer exists resets the checkpoint;
    /// the bootstrap wait then adopts a fresh candidate. Any other error
    /// is fatal.
    pub fn init(&self) -> Result<()> {
        let mut loaded = checkpoint::load(&self.shared.meta_path)?;

        if let Some(path) = loaded.cur_file.clone() {
            match LineReader::open(&path, loaded.cur_offset) {
                Ok(reader) => {
                    info!(
                        path = %path.display(),
                        offset = loaded.cur_offset,
                        "resuming from checkpoint"
                    );
                    *lock(&self.shared.reader) = Some(reader);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(path = %path.display(), "checkpointed file is gone, starting fresh");
                    loaded = Checkpoint::default();
                    checkpoint::save(&self.shared.meta_path, &loaded)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        *lock(&self.shared.checkpoint) = loaded;
        Ok(())
    }

    /// Register a sink. Every record delivered after registration reaches
    /// it, in registration order relative to the other sinks.
    pub fn register_sink(&self, sink: Box<dyn Sink>) {
        self.shared
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Spawn the background activities. Returns immediately; the tasks
    /// run until `cancel` fires.
    pub fn run(&self, cancel: CancellationToken) {
        let scanner = self.scanner.clone();
        let pending = self.shared.pending.clone();
        let checkpoint = self.shared.checkpoint.clone();
        let scan_interval = self.config.scan_interval;
        let rescan_delay = self.config.rescan_delay;
        let refresher_cancel = cancel.clone();
        tokio::spawn(async move {
            scanner
                .refresh_loop(
                    pending,
                    checkpoint,
                    scan_interval,
                    rescan_delay,
                    refresher_cancel,
                )
                .await;
        });

        let shared = self.shared.clone();
        let poll_interval = self.config.poll_interval;
        tokio::spawn(async move {
            shared.read_loop(poll_interval, cancel).await;
        });
    }

    /// Close the current reader. Idempotent; a closed reader ends the
    /// reader loop's drain passes.
    pub fn close(&self) {
        if let Some(reader) = lock(&self.shared.reader).as_mut() {
            reader.close();
        }
    }

    /// Callback for non-fatal faults. Logs through the subscriber.
    pub fn on_error(&self, err: &Error) {
        self.shared.report(err);
    }

    /// The checkpoint as of the last delivery.
    pub fn checkpoint(&self) -> Checkpoint {
        lock(&self.shared.checkpoint).clone()
    }
}

impl Shared {
    async fn read_loop(self: Arc<Self>, poll_interval: Duration, cancel: CancellationToken) {
        // Bootstrap: without a checkpointed reader, wait for the scanner
        // to publish a candidate. The lock guard must not outlive this
        // statement; switch_from_wait takes the same lock.
        let needs_bootstrap = lock(&self.reader).is_none();
        if needs_bootstrap && !self.switch_from_wait(&cancel).await {
            return;
        }

        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.drain(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }
        }

        // Final write so a restart resumes at the last delivered record.
        self.persist();
        info!("harvester stopped");
    }

    /// Drain every record the current reader can produce right now.
    async fn drain(&self, cancel: &CancellationToken) {
        loop {
            let step = {
                let mut cell = lock(&self.reader);
                let Some(reader) = cell.as_mut() else {
                    return;
                };
                match reader.next() {
                    Ok(Some(record)) => Step::Deliver(record, reader.offset()),
                    // No new data yet; back off until the next tick.
                    Ok(None) => return,
                    Err(e) => Step::Failed(e),
                }
            };

            match step {
                Step::Deliver(record, offset) => {
                    self.deliver(&record);
                    self.commit(offset);
                }
                Step::Failed(ReadError::Rotated) | Step::Failed(ReadError::Removed) => {
                    if !self.switch_next_file(cancel).await {
                        return;
                    }
                }
                Step::Failed(err @ ReadError::Closed) => {
                    // The handle is gone for good; drop the dead reader so
                    // later passes idle instead of re-reporting.
                    self.report(&err.into());
                    lock(&self.reader).take();
                    return;
                }
                Step::Failed(err) => {
                    self.report(&err.into());
                    return;
                }
            }
        }
    }

    /// Fan a record out to every sink, registration order.
    fn deliver(&self, record: &str) {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        for sink in sinks.iter() {
            sink.on_record(record);
        }
    }

    /// Advance the checkpointed offset past a delivered record.
    fn commit(&self, offset: u64) {
        lock(&self.checkpoint).cur_offset = offset;
        self.persist();
    }

    /// Best-effort checkpoint write; failures are logged, never surfaced.
    fn persist(&self) {
        let snapshot = lock(&self.checkpoint).clone();
        if let Err(e) = checkpoint::save(&self.meta_path, &snapshot) {
            warn!(error = %e, "checkpoint write failed");
        }
    }

    /// Retire the current file and adopt the next pending candidate.
    ///
    /// Returns false when cancelled while waiting for one.
    async fn switch_next_file(&self, cancel: &CancellationToken) -> bool {
        if let Some(mut reader) = lock(&self.reader).take() {
            reader.close();
        }

        let retired = {
            let mut checkpoint = lock(&self.checkpoint);
            checkpoint.cur_file = None;
            checkpoint.cur_offset = 0;
            let id = std::mem::take(&mut checkpoint.cur_file_id);
            checkpoint.prev_file_id = id.clone();
            id
        };

        if !retired.is_empty() {
            self.pending.remove(&retired);
            debug!(file_id = %retired, "retired current file");
        }

        self.switch_from_wait(cancel).await
    }

    /// Adopt the oldest unprocessed pending file, waiting for the scanner
    /// to publish one if none is ready. Returns false on cancellation.
    async fn switch_from_wait(&self, cancel: &CancellationToken) -> bool {
        loop {
            while let Some(entry) = self.pending.pop_next() {
                match LineReader::open(&entry.path, 0) {
                    Ok(reader) => {
                        info!(path = %entry.path.display(), "harvesting file");
                        {
                            let mut checkpoint = lock(&self.checkpoint);
                            checkpoint.cur_file = Some(entry.path.clone());
                            checkpoint.cur_file_id = entry.id.to_string();
                            checkpoint.cur_offset = 0;
                        }
                        self.persist();
                        *lock(&self.reader) = Some(reader);
                        return true;
                    }
                    Err(e) => {
                        // Vanished between scan and open; try the next one.
                        debug!(
                            path = %entry.path.display(),
                            error = %e,
                            "skipping stale candidate"
                        );
                    }
                }
            }

            select! {
                _ = cancel.cancelled() => return false,
                _ = self.pending.wait_available() => {}
            }
        }
    }

    fn report(&self, err: &Error) {
        error!(error = %err, "harvester error");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
