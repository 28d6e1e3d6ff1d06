//! Sparse block index for SSTable lookups.
//!
//! One index entry is recorded per fixed run of data entries, mapping a
//! sample key to its file offset. A lookup binary-searches for the
//! largest sampled key not greater than the target and starts its scan
//! there, bounding the distance a point read has to walk.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};
use std::cmp::Ordering;

/// An entry in the block index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The sampled key.
    pub key: Vec<u8>,
    /// The file offset of the record with that key.
    pub offset: u64,
}

/// A sparse, sorted key-to-offset index for one SSTable.
#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    entries: Vec<IndexEntry>,
}

impl BlockIndex {
    /// Creates an empty block index.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Adds an index entry. The key is copied.
    ///
    /// Keys must be added in ascending order for `find_offset` to be
    /// meaningful; the builder appends them while writing sorted data.
    pub fn add_entry(&mut self, key: &[u8], offset: u64) {
        self.entries.push(IndexEntry { key: key.to_vec(), offset });
    }

    /// Returns the file offset of the largest indexed key `<= target`,
    /// or 0 if no indexed key qualifies.
    pub fn find_offset(&self, target: &[u8]) -> u64 {
        let mut best = 0;
        let mut lo = 0usize;
        let mut hi = self.entries.len();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.entries[mid].key.as_slice().cmp(target) {
                Ordering::Less | Ordering::Equal => {
                    best = self.entries[mid].offset;
                    lo = mid + 1;
                }
                Ordering::Greater => hi = mid,
            }
        }

        best
    }

    /// Returns the number of index entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the index entries in order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Serializes the index.
    ///
    /// Format (little-endian): `[count: u32]` then per entry
    /// `[key_len: u32][key][offset: u64]`.
    pub fn encode(&self) -> Vec<u8> {
        let size: usize = 4 + self.entries.iter().map(|e| 4 + e.key.len() + 8).sum::<usize>();
        let mut buf = Vec::with_capacity(size);

        buf.put_u32_le(self.entries.len() as u32);
        for entry in &self.entries {
            buf.put_u32_le(entry.key.len() as u32);
            buf.put_slice(&entry.key);
            buf.put_u64_le(entry.offset);
        }

        buf
    }

    /// Deserializes an index previously produced by [`encode`].
    ///
    /// [`encode`]: BlockIndex::encode
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("block index too short"));
        }

        let count = data.get_u32_le() as usize;
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            if data.len() < 4 {
                return Err(Error::corruption("block index entry truncated"));
            }
            let key_len = data.get_u32_le() as usize;

            if data.len() < key_len + 8 {
                return Err(Error::corruption("block index entry truncated"));
            }
            let key = data[..key_len].to_vec();
            data.advance(key_len);
            let offset = data.get_u64_le();

            entries.push(IndexEntry { key, offset });
        }

        Ok(Self { entries })
    }
}
