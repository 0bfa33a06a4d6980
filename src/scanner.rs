// SPDX-License-Identifier: Apache-2.0

//! Candidate-file discovery for the watched directory.
//!
//! The scanner lists the directory, keeps entries whose basename matches
//! the configured pattern, orders them newest first, and cuts away
//! everything already processed according to the checkpoint. The surviving
//! entries are published into a [`PendingSet`] shared with the harvester.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use regex::Regex;
use tokio::select;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::checkpoint::Checkpoint;
use crate::file_id::FileId;

/// A directory entry that matched the basename pattern.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    /// Directory-qualified path of the candidate.
    pub path: PathBuf,
    /// Identity of the file at scan time.
    pub id: FileId,
    /// Modification time, the newest-first sort key.
    pub modified: SystemTime,
}

/// Pending candidates shared between the scanner and the harvester.
///
/// The scanner replaces the list wholesale after each successful scan and
/// signals availability; the harvester pops candidates and removes retired
/// ones. The one-permit signal means an empty-to-non-empty transition
/// wakes exactly one waiter even if it races the notification.
#[derive(Debug, Default)]
pub struct PendingSet {
    list: Mutex<Vec<ScanEntry>>,
    available: Notify,
}

impl PendingSet {
    /// Replace the list and signal availability.
    pub fn replace(&self, entries: Vec<ScanEntry>) {
        *self.lock() = entries;
        self.available.notify_one();
    }

    /// Pop the oldest unprocessed candidate (the list is newest-first).
    pub fn pop_next(&self) -> Option<ScanEntry> {
        self.lock().pop()
    }

    /// Drop the entry with the given identity key, if present.
    pub fn remove(&self, key: &str) {
        self.lock().retain(|entry| entry.id.to_string() != key);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Wait until the scanner signals a fresh non-empty list.
    pub async fn wait_available(&self) {
        self.available.notified().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ScanEntry>> {
        self.list.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lists the watched directory and keeps the files whose basename matches
/// the configured pattern.
#[derive(Debug, Clone)]
pub struct FileScanner {
    dir: PathBuf,
    pattern: Regex,
}

impl FileScanner {
    /// The pattern is compiled once, at configuration time.
    pub fn new(dir: PathBuf, pattern: Regex) -> Self {
        Self { dir, pattern }
    }

    /// All matching regular files in the watched directory.
    ///
    /// Entries that vanish between listing and stat are skipped.
    pub fn list_candidates(&self) -> std::io::Result<Vec<ScanEntry>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !self.pattern.is_match(name) {
                continue;
            }

            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let Ok(id) = FileId::from_path(entry.path()) else {
                continue;
            };

            entries.push(ScanEntry {
                path: entry.path(),
                id,
                modified,
            });
        }

        Ok(entries)
    }

    /// Sort newest first and cut away what has already been processed.
    ///
    /// The prefix strictly before the entry matching the checkpoint's
    /// current identity is what remains to harvest. When the current file
    /// is unknown (fresh start, or it left the directory) the cut falls
    /// back to the previous fully-consumed file; with no match at all,
    /// everything is pending.
    pub fn filter_processed(
        &self,
        mut entries: Vec<ScanEntry>,
        checkpoint: &Checkpoint,
    ) -> Vec<ScanEntry> {
        entries.sort_by(|a, b| b.modified.cmp(&a.modified));

        for key in [&checkpoint.cur_file_id, &checkpoint.prev_file_id] {
            if key.is_empty() {
                continue;
            }
            if let Some(pos) = entries.iter().position(|e| e.id.to_string() == **key) {
                entries.truncate(pos);
                return entries;
            }
        }

        entries
    }

    /// Periodically rescan and publish the pending list.
    ///
    /// One tick retries every `rescan_delay` until the filtered list is
    /// non-empty, then replaces the shared list and signals availability.
    /// Scan failures end the tick; the next one retries. The first tick
    /// fires immediately.
    pub async fn refresh_loop(
        self,
        pending: Arc<PendingSet>,
        checkpoint: Arc<Mutex<Checkpoint>>,
        scan_interval: Duration,
        rescan_delay: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(scan_interval);

        loop {
            select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.refresh_once(&pending, &checkpoint, rescan_delay, &cancel)
                .await;
        }
    }

    async fn refresh_once(
        &self,
        pending: &PendingSet,
        checkpoint: &Mutex<Checkpoint>,
        rescan_delay: Duration,
        cancel: &CancellationToken,
    ) {
        loop {
            let snapshot = checkpoint
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();

            let entries = match self.list_candidates() {
                Ok(entries) => self.filter_processed(entries, &snapshot),
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "directory scan failed");
                    return;
                }
            };

            if entries.is_empty() {
                select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(rescan_delay) => {}
                }
                continue;
            }

            debug!(count = entries.len(), "pending files refreshed");
            pending.replace(entries);
            return;
        }
    }
}
