// SPDX-License-Identifier: Apache-2.0

//! Rotation-aware log-file harvesting.
//!
//! A [`Harvester`] tails newline-delimited records from a rotating set of
//! files in one directory, delivers each record to the registered
//! [`Sink`]s, and checkpoints progress so a restart resumes without loss
//! or duplication.
//!
//! Files are identified by their inode/device pair rather than by path, so
//! rename-style rotation and unlink-while-open are both detected at end of
//! file, at which point the harvester moves on to the next pending
//! candidate in modification order.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod file_id;
pub mod harvester;
pub mod reader;
pub mod scanner;
pub mod sink;

pub use checkpoint::Checkpoint;
pub use config::HarvesterConfig;
pub use error::{Error, ReadError, Result};
pub use file_id::{FileId, is_removed, same_file};
pub use harvester::Harvester;
pub use reader::LineReader;
pub use scanner::{FileScanner, PendingSet, ScanEntry};
pub use sink::Sink;
