// SPDX-License-Identifier: Apache-2.0

//! Configuration for the harvester.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::error::{Error, Result};

/// Configuration for a [`Harvester`](crate::Harvester).
///
/// `path` names the watched directory plus a basename pattern: the parent
/// component is the directory to watch and the final component is compiled
/// as a regular expression matched against candidate basenames.
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    /// Watched directory joined with the basename regex.
    pub path: PathBuf,
    /// Where the checkpoint document is persisted.
    pub meta_path: PathBuf,
    /// Period between directory rescans.
    pub scan_interval: Duration,
    /// Period between reader drain passes.
    pub poll_interval: Duration,
    /// Delay before retrying a scan that produced no pending files.
    pub rescan_delay: Duration,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            meta_path: PathBuf::new(),
            scan_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            rescan_delay: Duration::from_millis(200),
        }
    }
}

impl HarvesterConfig {
    /// Validate the configuration, splitting `path` into the watched
    /// directory and the compiled basename pattern.
    pub fn validate(&self) -> Result<(PathBuf, Regex)> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Config("path must not be empty".to_string()));
        }
        if self.meta_path.as_os_str().is_empty() {
            return Err(Error::Config("meta_path must not be empty".to_string()));
        }

        let basename = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Config(format!(
                    "path has no basename component: {}",
                    self.path.display()
                ))
            })?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let pattern = Regex::new(basename).map_err(|e| Error::Pattern {
            pattern: basename.to_string(),
            source: e,
        })?;

        Ok((dir, pattern))
    }
}
