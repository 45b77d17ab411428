//! Resumable, rotation-safe line extraction from a growing text file.
//!
//! Holds exactly the position state persisted on [`crate::model::LogSource`]
//! — `(position, inode, last_line_content)` — and nothing else. Polling
//! cadence is the caller's concern; this type only knows how to reconcile
//! its saved position against the file's current state and hand back whole
//! lines.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;

#[cfg(unix)]
fn file_inode(metadata: &std::fs::Metadata) -> u64 {
    std::os::unix::fs::MetadataExt::ino(metadata)
}

#[cfg(not(unix))]
fn file_inode(_metadata: &std::fs::Metadata) -> u64 {
    0
}

#[derive(Debug, Clone)]
pub struct ReadBatch {
    pub lines: Vec<String>,
    pub new_position: i64,
    pub new_inode: i64,
    pub new_last_line: Option<String>,
}

pub struct IncrementalReader {
    path: PathBuf,
    position: u64,
    inode: u64,
    last_line_content: Option<String>,
}

impl IncrementalReader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, position: i64, inode: i64, last_line_content: Option<String>) -> Self {
        Self {
            path: path.into(),
            position: position.max(0) as u64,
            inode: inode.max(0) as u64,
            last_line_content,
        }
    }

    #[must_use]
    pub fn position(&self) -> i64 {
        self.position as i64
    }

    #[must_use]
    pub fn inode(&self) -> i64 {
        self.inode as i64
    }

    #[must_use]
    pub fn last_line_content(&self) -> Option<&str> {
        self.last_line_content.as_deref()
    }

    /// Reconcile saved position against the file's current inode/size
    /// before the first read. Truncation, rotation, or a mismatched
    /// `last_line_content` all reset `position` to 0.
    pub fn reconcile(&mut self) -> std::io::Result<()> {
        let metadata = std::fs::metadata(&self.path)?;
        let current_inode = file_inode(&metadata);
        let size = metadata.len();

        if current_inode != self.inode {
            self.position = 0;
        } else if size < self.position {
            self.position = 0;
        } else {
            self.verify_last_line()?;
        }
        self.inode = current_inode;
        Ok(())
    }

    fn verify_last_line(&mut self) -> std::io::Result<()> {
        let Some(last) = self.last_line_content.clone() else { return Ok(()) };
        if self.position == 0 {
            return Ok(());
        }
        let len = last.len() as u64 + 1;
        if len > self.position {
            self.position = 0;
            return Ok(());
        }
        let start = self.position - len;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; len as usize];
        if file.read_exact(&mut buf).is_err() {
            self.position = 0;
            return Ok(());
        }
        let mut candidate = String::from_utf8_lossy(&buf).into_owned();
        if candidate.ends_with('\n') {
            candidate.pop();
        }
        if candidate != last {
            self.position = 0;
        }
        Ok(())
    }

    /// Read up to `max_lines` whole lines starting at the current position.
    /// A trailing partial line (no terminating newline yet) is left for the
    /// next call.
    pub fn read_batch(&mut self, max_lines: usize) -> std::io::Result<ReadBatch> {
        if max_lines == 0 {
            return Ok(ReadBatch {
                lines: Vec::new(),
                new_position: self.position(),
                new_inode: self.inode(),
                new_last_line: self.last_line_content.clone(),
            });
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.position))?;
        let mut reader = BufReader::new(file);

        let mut lines = Vec::with_capacity(max_lines);
        let mut consumed: u64 = 0;
        let mut last_line = self.last_line_content.clone();

        for _ in 0..max_lines {
            let mut buf = Vec::new();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            consumed += n as u64;
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            let line = String::from_utf8_lossy(&buf).into_owned();
            last_line = Some(line.clone());
            lines.push(line);
        }

        self.position += consumed;
        self.last_line_content = last_line.clone();

        Ok(ReadBatch {
            lines,
            new_position: self.position(),
            new_inode: self.inode(),
            new_last_line: last_line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn reads_whole_lines_only() {
        let f = write_file("a\nb\nc");
        let mut reader = IncrementalReader::new(f.path(), 0, 0, None);
        let batch = reader.read_batch(10).unwrap();
        assert_eq!(batch.lines, vec!["a", "b"]);
        assert_eq!(batch.new_position, 4);
    }

    #[test]
    fn resumes_from_saved_position() {
        let f = write_file("a\nb\nc\n");
        let mut reader = IncrementalReader::new(f.path(), 2, 0, None);
        reader.reconcile().unwrap();
        let batch = reader.read_batch(10).unwrap();
        assert_eq!(batch.lines, vec!["b", "c"]);
    }

    #[test]
    fn truncation_resets_position() {
        let f = write_file("short\n");
        let mut reader = IncrementalReader::new(f.path(), 1000, 0, None);
        reader.reconcile().unwrap();
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn max_lines_caps_batch_and_preserves_partial_tail() {
        let f = write_file("a\nb\nc\npartial");
        let mut reader = IncrementalReader::new(f.path(), 0, 0, None);
        let first = reader.read_batch(2).unwrap();
        assert_eq!(first.lines, vec!["a", "b"]);
        let second = reader.read_batch(10).unwrap();
        assert_eq!(second.lines, vec!["c"]);
    }

    #[test]
    fn mismatched_last_line_content_triggers_reset() {
        let f = write_file("x\ny\n");
        let mut reader = IncrementalReader::new(f.path(), 2, 0, Some("not-x".into()));
        reader.reconcile().unwrap();
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn matching_last_line_content_keeps_position() {
        let f = write_file("x\ny\n");
        let mut reader = IncrementalReader::new(f.path(), 2, 0, Some("x".into()));
        reader.reconcile().unwrap();
        assert_eq!(reader.position(), 2);
    }
}
