//! Key-value records and the shared on-disk record codec.
//!
//! An [`Entry`] is the unit stored in MemTables, WAL files, and SSTable
//! data regions. All three use the same little-endian record layout:
//!
//! ```text
//! [key_len: u32][key][value_len: u32][value][kind: u8][timestamp: i64]
//! ```
//!
//! Timestamps are nanoseconds, strictly increasing within a process, and
//! break ties when the same key appears in multiple storage layers.

use crate::error::{Error, Result};
use bytes::BufMut;
use std::cmp::Ordering;
use std::io::Read;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed per-record overhead: two length prefixes, the kind byte, and
/// the timestamp.
pub const RECORD_OVERHEAD: usize = 4 + 4 + 1 + 8;

/// The kind of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// A normal key-value pair.
    Put = 0,

    /// A tombstone marking the key as deleted.
    Delete = 1,
}

impl EntryKind {
    /// Converts a u8 to an EntryKind.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EntryKind::Put),
            1 => Ok(EntryKind::Delete),
            _ => Err(Error::Corruption(format!("invalid entry kind: {}", value))),
        }
    }

    /// Converts the EntryKind to a u8.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single key-value record.
///
/// Entries are immutable after construction. Keys and values are copied
/// from the caller's buffers; a DELETE entry carries an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    key: Vec<u8>,
    value: Vec<u8>,
    kind: EntryKind,
    timestamp: i64,
}

impl Entry {
    /// Creates a PUT entry, stamping it with the current clock value.
    pub fn put(key: &[u8], value: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            value: value.to_vec(),
            kind: EntryKind::Put,
            timestamp: monotonic_now(),
        }
    }

    /// Creates a DELETE entry (tombstone), stamping it with the current
    /// clock value.
    pub fn delete(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            value: Vec::new(),
            kind: EntryKind::Delete,
            timestamp: monotonic_now(),
        }
    }

    /// Creates an entry from explicit parts, preserving the given
    /// timestamp. Used when decoding records and when replaying a WAL.
    pub fn new(key: Vec<u8>, value: Vec<u8>, kind: EntryKind, timestamp: i64) -> Self {
        Self { key, value, kind, timestamp }
    }

    /// Returns the key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Returns the value. Empty for tombstones.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Returns the kind of this entry.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Returns the creation timestamp in nanoseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns `true` if this entry is a delete marker.
    pub fn is_tombstone(&self) -> bool {
        self.kind == EntryKind::Delete
    }

    /// Compares this entry with another by key, in strict lexicographic
    /// byte order.
    pub fn compare_by_key(&self, other: &Entry) -> Ordering {
        self.key.as_slice().cmp(other.key.as_slice())
    }

    /// Returns `true` if this entry was created after the other.
    pub fn is_newer_than(&self, other: &Entry) -> bool {
        self.timestamp > other.timestamp
    }

    /// Returns the size of the encoded record in bytes.
    pub fn encoded_len(&self) -> usize {
        RECORD_OVERHEAD + self.key.len() + self.value.len()
    }

    /// Encodes the record into a byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.put_u32_le(self.key.len() as u32);
        buf.put_slice(&self.key);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.value);
        buf.put_u8(self.kind.as_u8());
        buf.put_i64_le(self.timestamp);
        buf
    }

    /// Reads one record from a sequential reader.
    ///
    /// Returns `Ok(None)` on a clean EOF before the first byte of a
    /// record. An EOF inside a record is reported as a corruption error
    /// so that callers can distinguish a truncated tail from a normal
    /// end of stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Entry>> {
        let key_len = match read_u32_le(reader) {
            Ok(Some(len)) => len as usize,
            Ok(None) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut key = vec![0u8; key_len];
        read_field(reader, &mut key)?;

        let value_len = match read_u32_le(reader) {
            Ok(Some(len)) => len as usize,
            Ok(None) => return Err(truncated()),
            Err(e) => return Err(e),
        };

        let mut value = vec![0u8; value_len];
        read_field(reader, &mut value)?;

        let mut tail = [0u8; 9];
        read_field(reader, &mut tail)?;

        let kind = EntryKind::from_u8(tail[0])?;
        let timestamp = i64::from_le_bytes(tail[1..9].try_into().unwrap());

        Ok(Some(Entry { key, value, kind, timestamp }))
    }
}

/// Reads a little-endian u32, mapping EOF at the first byte to `None`.
fn read_u32_le<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Reads an exact field that must be present once a record has started.
fn read_field<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(truncated()),
        Err(e) => Err(Error::Io(e)),
    }
}

fn truncated() -> Error {
    Error::Corruption("truncated record".to_string())
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Returns a strictly increasing nanosecond timestamp.
///
/// Based on the wall clock, bumped past the last issued value so that
/// two entries created back to back never share a timestamp.
pub(crate) fn monotonic_now() -> i64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);

    let mut last = LAST_TIMESTAMP.load(AtomicOrdering::Relaxed);
    loop {
        let next = wall.max(last + 1);
        match LAST_TIMESTAMP.compare_exchange_weak(
            last,
            next,
            AtomicOrdering::Relaxed,
            AtomicOrdering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}
