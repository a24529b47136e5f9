//! Incremental line reader for append-only log files.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Reads complete lines from a file that is still being written.
///
/// A line is only handed out once its newline has been written. Bytes after the
/// last newline are held back and prefixed to the next read.
#[derive(Debug)]
pub struct LineBuffer {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Open `path` for tailing from its beginning.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        tracing::info!(path = %path.display(), "Opened log file");
        Ok(Self {
            path,
            reader: Some(BufReader::new(file)),
            partial: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Follow the file to a new name. The handle and read position are kept.
    pub fn moved_to(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Read everything appended since the last call and return the complete lines.
    ///
    /// Lines are trimmed and blank lines are skipped. Invalid UTF-8 is replaced.
    pub fn read_available_lines(&mut self) -> io::Result<Vec<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Vec::new());
        };

        let mut lines = Vec::new();
        let mut chunk = Vec::new();
        loop {
            chunk.clear();
            if reader.read_until(b'\n', &mut chunk)? == 0 {
                break;
            }
            self.partial.extend_from_slice(&chunk);
            if chunk.last() != Some(&b'\n') {
                // Incomplete, wait for the writer to finish the line
                break;
            }
            let line = String::from_utf8_lossy(&self.partial).trim().to_string();
            self.partial.clear();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Release the file handle and drop any held-back fragment.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!(path = %self.path.display(), "Closed log file");
        }
        self.partial.clear();
    }
}
