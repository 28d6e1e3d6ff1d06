//! Sequential SSTable iterator.

use crate::entry::Entry;
use crate::error::Result;
use std::fs::File;
use std::io::{BufReader, Read, Take};
use std::path::Path;

/// Sequential access to an SSTable's data region, from the first record
/// to the last. Reaching the end is not an error.
pub struct SSTableIterator {
    reader: Take<BufReader<File>>,
    current: Option<Entry>,
}

impl SSTableIterator {
    pub(crate) fn new(path: &Path, data_len: u64) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file).take(data_len);
        Ok(Self { reader, current: None })
    }

    /// Advances to the next record. Returns `false` at the end of the
    /// data region.
    pub fn next(&mut self) -> Result<bool> {
        self.current = Entry::read_from(&mut self.reader)?;
        Ok(self.current.is_some())
    }

    /// Returns the current record, or `None` before the first `next` or
    /// after the end.
    pub fn entry(&self) -> Option<&Entry> {
        self.current.as_ref()
    }

    /// Releases the underlying file handle.
    pub fn close(self) {}
}
