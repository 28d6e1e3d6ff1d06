//! WAL reader implementation for recovery.

use crate::entry::Entry;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Reads entries back from a WAL file in write order.
pub struct WalReader {
    reader: BufReader<File>,
    /// Entries decoded so far, for diagnostics.
    entries_read: usize,
}

impl WalReader {
    /// Opens a WAL file for reading.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(Error::Io)?;
        Ok(Self { reader: BufReader::new(file), entries_read: 0 })
    }

    /// Reads the next complete entry, or `None` at a clean EOF.
    ///
    /// A record cut off mid-field is reported as a corruption error;
    /// [`recover_all`] turns that into a clean stop.
    ///
    /// [`recover_all`]: WalReader::recover_all
    pub fn read_next(&mut self) -> Result<Option<Entry>> {
        let entry = Entry::read_from(&mut self.reader)?;
        if entry.is_some() {
            self.entries_read += 1;
        }
        Ok(entry)
    }

    /// Returns the number of entries decoded so far.
    pub fn entries_read(&self) -> usize {
        self.entries_read
    }

    /// Reads every complete entry in the file.
    ///
    /// A truncated tail record terminates recovery at the last complete
    /// entry without raising an error; other I/O failures propagate.
    pub fn recover_all(&mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();

        loop {
            match self.read_next() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(Error::Corruption(msg)) => {
                    log::warn!(
                        "WAL corruption after {} entries: {}; stopping recovery",
                        self.entries_read,
                        msg
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(entries)
    }
}
