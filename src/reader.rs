//! Offset-tracking line reader over a single open file.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ReadError;
use crate::file_id::{is_removed, same_file};

/// Reads newline-terminated records from one file, advancing a byte offset.
///
/// Each record is the bytes up to the next `\n`, delivered with the
/// delimiter stripped; the offset advances by the full length read,
/// delimiter included. Trailing bytes without a newline are withheld until
/// the newline lands. At end of file, `next` decides whether the origin
/// path still names the held file: same file (`Ok(None)`, more data may
/// come), rotated away ([`ReadError::Rotated`]), or removed
/// ([`ReadError::Removed`]).
pub struct LineReader {
    origin: PathBuf,
    /// None once closed
    reader: Option<BufReader<File>>,
    offset: u64,
    /// Reusable line buffer to avoid allocations
    line: Vec<u8>,
}

impl LineReader {
    /// Open `path` read-only, positioned `offset` bytes in.
    ///
    /// `offset` is a count of bytes already delivered, delimiters
    /// included, so reading resumes exactly on the first undelivered byte.
    pub fn open(path: impl AsRef<Path>, offset: u64) -> std::io::Result<Self> {
        let origin = path.as_ref().to_path_buf();
        let file = File::open(&origin)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset))?;

        Ok(Self {
            origin,
            reader: Some(reader),
            offset,
            line: Vec::with_capacity(1024),
        })
    }

    /// Bytes delivered so far, delimiters included.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The path this reader was opened on.
    pub fn path(&self) -> &Path {
        &self.origin
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// The next record, or `Ok(None)` when no complete line is available
    /// yet and the origin path still names the held file.
    pub fn next(&mut self) -> Result<Option<String>, ReadError> {
        let reader = self.reader.as_mut().ok_or(ReadError::Closed)?;

        self.line.clear();
        let n = reader.read_until(b'\n', &mut self.line)?;

        if n > 0 && self.line.last() == Some(&b'\n') {
            self.offset += n as u64;
            self.line.pop();
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }
            return Ok(Some(String::from_utf8_lossy(&self.line).into_owned()));
        }

        if n > 0 {
            // Partial trailing line: put the bytes back. They are not
            // delivered until their newline arrives or the file is retired.
            reader.seek(SeekFrom::Start(self.offset))?;
        }

        self.classify_eof()
    }

    /// At end of file, probe whether the origin path still names the file
    /// this reader holds.
    fn classify_eof(&mut self) -> Result<Option<String>, ReadError> {
        let reader = self.reader.as_mut().ok_or(ReadError::Closed)?;

        let reopened = match File::open(&self.origin) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReadError::Removed);
            }
            Err(e) => return Err(ReadError::Io(e)),
        };

        if is_removed(reader.get_ref()) {
            return Err(ReadError::Removed);
        }

        if !same_file(reader.get_ref(), &reopened) {
            return Err(ReadError::Rotated);
        }

        // Same file but shorter than what was already delivered: it was
        // truncated in place. Start over from the top.
        let len = reopened.metadata().map_err(ReadError::Io)?.len();
        if len < self.offset {
            warn!(
                path = %self.origin.display(),
                offset = self.offset,
                size = len,
                "file truncated, restarting from the beginning"
            );
            reader.seek(SeekFrom::Start(0))?;
            self.offset = 0;
        }

        Ok(None)
    }

    /// Release the handle. Idempotent; later calls to `next` return
    /// [`ReadError::Closed`].
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!(path = %self.origin.display(), offset = self.offset, "reader closed");
        }
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn drain(reader: &mut LineReader) -> Vec<String> {
        let mut records = Vec::new();
        while let Ok(Some(record)) = reader.next() {
            records.push(record);
        }
        records
    }

    #[test]
    fn test_reads_lines_and_counts_delimiters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let mut reader = LineReader::open(&path, 0).unwrap();
        assert_eq!(drain(&mut reader), vec!["one", "two", "three"]);
        assert_eq!(reader.offset(), 14);

        // Nothing new and the path still names this file.
        assert!(matches!(reader.next(), Ok(None)));
    }

    #[test]
    fn test_resumes_from_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "first\nsecond\n").unwrap();

        let mut reader = LineReader::open(&path, "first\n".len() as u64).unwrap();
        assert_eq!(drain(&mut reader), vec!["second"]);
    }

    #[test]
    fn test_partial_line_is_withheld() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "complete\npartial").unwrap();

        let mut reader = LineReader::open(&path, 0).unwrap();
        assert_eq!(reader.next().unwrap(), Some("complete".to_string()));
        assert!(matches!(reader.next(), Ok(None)));
        assert_eq!(reader.offset(), "complete\n".len() as u64);

        // The newline lands and the held bytes become a record.
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"\n").unwrap();

        assert_eq!(reader.next().unwrap(), Some("partial".to_string()));
        assert_eq!(reader.offset(), "complete\npartial\n".len() as u64);
    }

    #[test]
    fn test_strips_carriage_return() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "line\r\n").unwrap();

        let mut reader = LineReader::open(&path, 0).unwrap();
        assert_eq!(reader.next().unwrap(), Some("line".to_string()));
        assert_eq!(reader.offset(), 6);
    }

    #[test]
    fn test_empty_file_is_plain_eof() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "").unwrap();

        let mut reader = LineReader::open(&path, 0).unwrap();
        assert!(matches!(reader.next(), Ok(None)));
    }

    #[test]
    fn test_rename_with_replacement_is_rotation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "old\n").unwrap();

        let mut reader = LineReader::open(&path, 0).unwrap();
        assert_eq!(drain(&mut reader), vec!["old"]);

        fs::rename(&path, dir.path().join("a.log.1")).unwrap();
        fs::write(&path, "new\n").unwrap();

        assert!(matches!(reader.next(), Err(ReadError::Rotated)));
    }

    #[test]
    fn test_unlink_is_removal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "old\n").unwrap();

        let mut reader = LineReader::open(&path, 0).unwrap();
        assert_eq!(drain(&mut reader), vec!["old"]);

        fs::remove_file(&path).unwrap();
        assert!(matches!(reader.next(), Err(ReadError::Removed)));
    }

    #[cfg(unix)]
    #[test]
    fn test_unlink_with_replacement_is_removal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "old\n").unwrap();

        let mut reader = LineReader::open(&path, 0).unwrap();
        assert_eq!(drain(&mut reader), vec!["old"]);

        // Remove-and-recreate: the held handle's link count drops to zero
        // even though the path resolves again.
        fs::remove_file(&path).unwrap();
        fs::write(&path, "new\n").unwrap();

        assert!(matches!(reader.next(), Err(ReadError::Removed)));
    }

    #[test]
    fn test_truncation_restarts_from_top() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "one\ntwo\n").unwrap();

        let mut reader = LineReader::open(&path, 0).unwrap();
        assert_eq!(drain(&mut reader), vec!["one", "two"]);

        fs::write(&path, "x\n").unwrap();

        // The truncation probe resets the offset; the shorter content is
        // picked up on the following pass.
        assert!(matches!(reader.next(), Ok(None)));
        assert_eq!(reader.offset(), 0);
        assert_eq!(reader.next().unwrap(), Some("x".to_string()));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "line\n").unwrap();

        let mut reader = LineReader::open(&path, 0).unwrap();
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        assert!(matches!(reader.next(), Err(ReadError::Closed)));
    }
}
