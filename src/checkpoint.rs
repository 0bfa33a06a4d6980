// SPDX-License-Identifier: Apache-2.0

//! Persisted harvest progress.
//!
//! The checkpoint is a single small JSON document, rewritten after every
//! delivered record. Loads are lenient: a missing document is created
//! empty, and an unparseable one (torn write, manual edit) resets to empty
//! so the harvester re-derives state from the directory instead of
//! refusing to start. Writes go through a temp file and rename.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Progress document: which file is being read, how far delivery has
/// advanced, and which file was consumed before it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Absolute path of the file being read.
    pub cur_file: Option<PathBuf>,
    /// Identity key of `cur_file` (`"<inode>-<device>"`).
    pub cur_file_id: String,
    /// Bytes delivered from `cur_file` so far, delimiters included.
    pub cur_offset: u64,
    /// Identity key of the most recent fully-consumed file. The scanner
    /// uses it to elide that file from the pending list.
    pub prev_file_id: String,
}

impl Checkpoint {
    /// True when no file has been adopted yet.
    pub fn is_empty(&self) -> bool {
        self.cur_file.is_none()
    }
}

/// Load the checkpoint document at `path`.
///
/// Missing document: created empty. Unreadable content: treated as empty
/// (redelivery since the last good checkpoint is accepted).
pub fn load(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let path = path.as_ref();

    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let checkpoint = Checkpoint::default();
            save(path, &checkpoint)?;
            return Ok(checkpoint);
        }
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice(&data) {
        Ok(checkpoint) => Ok(checkpoint),
        Err(e) => {
            debug!(
                path = %path.display(),
                error = %e,
                "unreadable checkpoint, starting empty"
            );
            Ok(Checkpoint::default())
        }
    }
}

/// Write the checkpoint document at `path`.
///
/// Writes to a uniquely named temp file and renames it into place, so a
/// crash mid-write leaves the previous document intact.
pub fn save(path: impl AsRef<Path>, checkpoint: &Checkpoint) -> Result<()> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let unique = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique));

    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, checkpoint)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, path)?;
    Ok(())
}
