// SPDX-License-Identifier: Apache-2.0

//! Stable file identity for rotation tracking.
//!
//! A path is a weak name for a log file: rotation moves the file out from
//! under the path while the old object lives on under a new name, or under
//! none at all. The inode/device pair names the filesystem object itself
//! and survives renames, so it is what the checkpoint and the scanner key
//! on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

/// A platform-independent unique identifier for a file.
///
/// On Unix this is the device ID plus inode number; on Windows the volume
/// serial number plus file index. Stable across renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    /// Device ID (Unix) or volume serial number (Windows)
    dev: u64,
    /// Inode number (Unix) or file index (Windows)
    ino: u64,
}

impl FileId {
    /// Create a FileId from raw device and inode values.
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Create a FileId from an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// Create a FileId from an open file handle.
    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);

        Ok(Self {
            dev: info.dwVolumeSerialNumber as u64,
            ino: file_index,
        })
    }

    /// Create a FileId from a path by opening the file.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }
}

impl fmt::Display for FileId {
    /// `<inode>-<device>`, the stable key stored in the checkpoint.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ino, self.dev)
    }
}

/// Whether the file behind an open handle has been unlinked.
///
/// Link count zero is the only reliable local signal for unlink-while-open.
/// A failed stat also counts as removed so the caller rotates to the next
/// file instead of stalling on a dead handle.
#[cfg(unix)]
pub fn is_removed(file: &File) -> bool {
    use std::os::unix::fs::MetadataExt;

    match file.metadata() {
        Ok(metadata) => metadata.nlink() == 0,
        Err(_) => true,
    }
}

/// Whether the file behind an open handle has been unlinked.
#[cfg(windows)]
pub fn is_removed(file: &File) -> bool {
    file.metadata().is_err()
}

/// Whether two open handles refer to the same filesystem object.
///
/// False when either stat fails.
pub fn same_file(a: &File, b: &File) -> bool {
    match (FileId::from_file(a), FileId::from_file(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_file_id_stable_across_opens() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"some content").unwrap();
        file.flush().unwrap();

        let id1 = FileId::from_path(file.path()).unwrap();
        let id2 = FileId::from_path(file.path()).unwrap();

        assert_eq!(id1, id2);
    }

    #[test]
    fn test_file_id_differs_between_files() {
        let file1 = NamedTempFile::new().unwrap();
        let file2 = NamedTempFile::new().unwrap();

        let id1 = FileId::from_path(file1.path()).unwrap();
        let id2 = FileId::from_path(file2.path()).unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn test_file_id_survives_rename() {
        let dir = TempDir::new().unwrap();
        let before = dir.path().join("app.log");
        let after = dir.path().join("app.log.1");
        std::fs::write(&before, "line\n").unwrap();

        let id_before = FileId::from_path(&before).unwrap();
        std::fs::rename(&before, &after).unwrap();
        let id_after = FileId::from_path(&after).unwrap();

        assert_eq!(id_before, id_after);
    }

    #[test]
    fn test_file_id_display_key() {
        let id = FileId::new(3, 42);
        assert_eq!(id.to_string(), "42-3");
    }

    #[test]
    fn test_file_id_serde_roundtrip() {
        let id = FileId::new(7, 1234);
        let json = serde_json::to_string(&id).unwrap();
        let back: FileId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_same_file_for_two_handles() {
        let file = NamedTempFile::new().unwrap();

        let a = File::open(file.path()).unwrap();
        let b = File::open(file.path()).unwrap();
        assert!(same_file(&a, &b));

        let other = NamedTempFile::new().unwrap();
        let c = File::open(other.path()).unwrap();
        assert!(!same_file(&a, &c));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_removed_after_unlink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doomed.log");
        std::fs::write(&path, "line\n").unwrap();

        let handle = File::open(&path).unwrap();
        assert!(!is_removed(&handle));

        std::fs::remove_file(&path).unwrap();
        assert!(is_removed(&handle));
    }
}
