//! In-memory write buffer.
//!
//! The MemTable maps each key to the most recent [`Entry`] for it,
//! bounded by a distinct-key capacity. It is backed by a crossbeam
//! `SkipMap`, so readers never block and entries come back in key order
//! for free when the table is drained into an SSTable.
//!
//! Mutations are funnelled through the engine's write lock, so the
//! capacity check and the insert do not race; concurrent readers are
//! always safe.

use crate::entry::Entry;
use crate::error::{Error, Result};
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// An in-memory table holding the newest entry per key, up to a fixed
/// number of distinct keys.
///
/// # Example
///
/// ```
/// use emberkv::memtable::MemTable;
///
/// let table = MemTable::new(16);
/// table.put(b"key", b"value").unwrap();
/// assert_eq!(table.get(b"key").unwrap().value(), b"value");
/// ```
pub struct MemTable {
    /// Key-ordered map of key -> newest entry.
    entries: SkipMap<Vec<u8>, Entry>,

    /// Number of distinct keys currently stored.
    len: AtomicUsize,

    /// Maximum number of distinct keys.
    max_entries: usize,

    /// Set once the table has been rotated out; no mutation after.
    sealed: AtomicBool,
}

impl MemTable {
    /// Creates an empty MemTable bounded to `max_entries` distinct keys.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: SkipMap::new(),
            len: AtomicUsize::new(0),
            max_entries,
            sealed: AtomicBool::new(false),
        }
    }

    /// Inserts a key-value pair.
    ///
    /// Overwriting an existing key never fails for capacity reasons;
    /// inserting a new key into a full table returns
    /// [`Error::MemTableFull`], which the engine answers by rotating.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.insert(Entry::put(key, value))
    }

    /// Records a tombstone for the key, under the same capacity rules as
    /// [`put`].
    ///
    /// [`put`]: MemTable::put
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.insert(Entry::delete(key))
    }

    /// Inserts a pre-built entry, preserving its timestamp. This is the
    /// path WAL replay uses.
    pub fn insert(&self, entry: Entry) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::ReadOnly);
        }

        let is_new = !self.entries.contains_key(entry.key());
        if is_new && self.len.load(Ordering::Relaxed) >= self.max_entries {
            return Err(Error::MemTableFull);
        }

        self.entries.insert(entry.key().to_vec(), entry);
        if is_new {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Returns the stored entry for a key, tombstones included.
    /// Interpreting a tombstone is the caller's responsibility.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Returns the number of distinct keys.
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns `true` if the table has reached its capacity.
    pub fn is_full(&self) -> bool {
        self.size() >= self.max_entries
    }

    /// Returns the distinct-key capacity.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Marks the table read-only. Idempotent.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Returns `true` once the table has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Returns all entries in ascending key order.
    ///
    /// Invoked on sealed tables when flushing to an SSTable.
    pub fn drain_entries(&self) -> Vec<Entry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }
}
