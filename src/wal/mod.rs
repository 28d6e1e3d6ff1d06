//! Write-ahead log.
//!
//! Every mutation is appended to the WAL and fsynced before it is
//! acknowledged, so that the contents of the in-memory table can be
//! rebuilt after a crash. One WAL file corresponds to exactly one
//! MemTable generation: it is created together with the table, closed
//! when the table is sealed, and may be deleted once the table has been
//! durably written out as an SSTable.
//!
//! Records use the shared codec in [`crate::entry`]; there is no extra
//! framing, so a crash mid-append leaves at most one truncated record at
//! the tail, which recovery tolerates.

mod reader;
mod writer;

pub use reader::WalReader;
pub use writer::WalWriter;

use crate::entry::Entry;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Builds the WAL filename for a generation counter.
pub fn wal_filename(counter: u64) -> String {
    format!("wal_{}.log", counter)
}

/// Parses the generation counter out of a WAL filename.
///
/// Returns `None` for filenames that do not match `wal_<counter>.log`.
pub fn parse_wal_filename(name: &str) -> Option<u64> {
    name.strip_prefix("wal_")?.strip_suffix(".log")?.parse().ok()
}

/// A write-ahead log for one MemTable generation.
pub struct Wal {
    writer: WalWriter,
    sync_on_flush: bool,
}

impl Wal {
    /// Creates (or reopens for append) a WAL file in `dir`, creating the
    /// directory if needed.
    pub fn create<P: AsRef<Path>>(dir: P, filename: &str, sync_on_flush: bool) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let writer = WalWriter::new(dir.as_ref().join(filename))?;
        Ok(Self { writer, sync_on_flush })
    }

    /// Appends an entry to the log buffer.
    pub fn write(&mut self, entry: &Entry) -> Result<()> {
        self.writer.append(entry)
    }

    /// Drains the write buffer, fsyncing unless sync-on-flush is
    /// disabled. Must complete before the corresponding write is
    /// acknowledged.
    pub fn flush(&mut self) -> Result<()> {
        if self.sync_on_flush {
            self.writer.sync()
        } else {
            self.writer.flush()
        }
    }

    /// Returns the path of the underlying file.
    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Flushes and closes the log. The file stays on disk for recovery.
    pub fn close(mut self) -> Result<()> {
        self.writer.sync()
    }

    /// Reads back every complete entry in the WAL file at `path`.
    ///
    /// Returns an empty sequence if the file is absent. A truncated tail
    /// record terminates recovery at the last complete entry.
    pub fn recover<P: AsRef<Path>>(path: P) -> Result<Vec<Entry>> {
        match WalReader::new(path.as_ref()) {
            Ok(mut reader) => reader.recover_all(),
            Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Deletes the WAL file. Called only after the associated MemTable
    /// has been flushed to an SSTable.
    pub fn remove(self) -> Result<()> {
        let path = self.writer.path().to_path_buf();
        drop(self.writer);
        std::fs::remove_file(&path)?;
        Ok(())
    }
}

/// Scans `dir` for WAL files and returns `(counter, path)` pairs in
/// ascending counter order. A missing directory yields an empty list.
pub fn list_wal_files<P: AsRef<Path>>(dir: P) -> Result<Vec<(u64, PathBuf)>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for dirent in std::fs::read_dir(dir)? {
        let dirent = dirent?;
        if let Some(counter) = dirent.file_name().to_str().and_then(parse_wal_filename) {
            files.push((counter, dirent.path()));
        }
    }
    files.sort_by_key(|(counter, _)| *counter);

    Ok(files)
}
