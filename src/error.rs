// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding error: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid basename pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("read error: {0}")]
    Read(#[from] ReadError),
}

/// Terminal conditions reported by the line reader.
///
/// `Rotated` and `Removed` retire the current file; `Closed` means the
/// reader handle is gone for good. Plain end-of-file is not an error and
/// is reported as an empty item from `next`.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("reader already closed")]
    Closed,

    #[error("file already removed")]
    Removed,

    #[error("file already rotated")]
    Rotated,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
