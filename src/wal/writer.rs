//! WAL writer implementation.

use crate::entry::Entry;
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends encoded entries to a WAL file through a buffered writer.
pub struct WalWriter {
    /// Path to the WAL file.
    path: PathBuf,
    /// Buffered writer for efficient I/O.
    writer: BufWriter<File>,
    /// Bytes written so far, including pre-existing file content.
    file_size: u64,
}

impl WalWriter {
    /// Opens the WAL file in append mode, creating it if it doesn't
    /// exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();
        let writer = BufWriter::new(file);

        Ok(Self { path, writer, file_size })
    }

    /// Appends one encoded entry to the write buffer.
    pub fn append(&mut self, entry: &Entry) -> Result<()> {
        let encoded = entry.encode();
        self.writer.write_all(&encoded)?;
        self.file_size += encoded.len() as u64;
        Ok(())
    }

    /// Drains the write buffer to the operating system.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Drains the write buffer and fsyncs to persistent storage.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Returns the current file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Returns the path to the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}
