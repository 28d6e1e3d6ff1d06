//! SSTable handle: metadata plus read access to the table file.

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::filter::BloomFilter;
use crate::sstable::index::BlockIndex;
use crate::sstable::iterator::SSTableIterator;
use crate::sstable::{
    parse_sstable_filename, DEFAULT_BLOOM_FP_RATE, FOOTER_SIZE, MAGIC_NUMBER,
};
use bytes::Buf;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Metadata describing one SSTable.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    /// The level this table belongs to.
    pub level: usize,
    /// The table's filename (without directory).
    pub file_name: String,
    /// Smallest key in the table.
    pub min_key: Vec<u8>,
    /// Largest key in the table.
    pub max_key: Vec<u8>,
    /// Number of records in the data region.
    pub entry_count: u32,
    /// Total file size in bytes, trailer included.
    pub file_size: u64,
    /// Creation timestamp in nanoseconds; used to pick the oldest table
    /// during compaction selection.
    pub created_at: i64,
    /// Bloom filter over every key in the table.
    pub bloom: BloomFilter,
    /// Sparse key-to-offset index over the data region.
    pub block_index: BlockIndex,
}

/// An immutable sorted table on disk.
///
/// The file is read-only after build, so a table handle is safe to share
/// across threads; every read opens its own file descriptor.
#[derive(Debug)]
pub struct SSTable {
    metadata: TableMetadata,
    path: PathBuf,
    /// Length of the data region (the index trailer starts here).
    data_len: u64,
}

impl SSTable {
    pub(crate) fn from_parts(metadata: TableMetadata, path: PathBuf, data_len: u64) -> Self {
        Self { metadata, path, data_len }
    }

    /// Opens an existing table file, reconstructing the full metadata.
    ///
    /// The block index is read from the CRC-guarded trailer; entry
    /// count, key range, and the Bloom filter are recomputed by scanning
    /// the data region. The level is parsed from the filename.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SSTable> {
        let path = path.as_ref().to_path_buf();
        let file_name =
            path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        let (level, _) = parse_sstable_filename(&file_name).ok_or_else(|| {
            Error::invalid_argument(format!("not an SSTable filename: {:?}", file_name))
        })?;

        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!("{:?} too small to be an SSTable", file_name)));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE];
        file.read_exact(&mut footer)?;

        let mut buf = &footer[..];
        let index_offset = buf.get_u64_le();
        let index_crc = buf.get_u32_le();
        let magic = buf.get_u64_le();
        if magic != MAGIC_NUMBER {
            return Err(Error::corruption(format!("bad magic in {:?}", file_name)));
        }

        let index_end = file_size - FOOTER_SIZE as u64;
        if index_offset > index_end {
            return Err(Error::corruption(format!("index offset past file end in {:?}", file_name)));
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_bytes = vec![0u8; (index_end - index_offset) as usize];
        file.read_exact(&mut index_bytes)?;

        let actual = crc32fast::hash(&index_bytes);
        if actual != index_crc {
            return Err(Error::ChecksumMismatch { expected: index_crc, actual });
        }
        let block_index = BlockIndex::decode(&index_bytes)?;

        let created_at = std::fs::metadata(&path)?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_else(crate::entry::monotonic_now);

        // One scan of the data region recomputes everything the trailer
        // does not carry.
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file).take(index_offset);
        let mut keys: Vec<Vec<u8>> = Vec::new();
        while let Some(entry) = Entry::read_from(&mut reader)? {
            keys.push(entry.key().to_vec());
        }
        if keys.is_empty() {
            return Err(Error::corruption(format!("{:?} has no entries", file_name)));
        }

        let mut bloom = BloomFilter::new(keys.len(), DEFAULT_BLOOM_FP_RATE);
        for key in &keys {
            bloom.add(key);
        }

        let metadata = TableMetadata {
            level,
            file_name,
            min_key: keys[0].clone(),
            max_key: keys[keys.len() - 1].clone(),
            entry_count: keys.len() as u32,
            file_size,
            created_at,
            bloom,
            block_index,
        };

        Ok(SSTable { metadata, path, data_len: index_offset })
    }

    /// Looks up a key.
    ///
    /// A Bloom filter miss answers immediately; otherwise the block
    /// index bounds a sequential scan that stops as soon as a key past
    /// the target is seen. A tombstone is returned as-is; interpreting
    /// it is the caller's responsibility.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        if !self.metadata.bloom.contains(key) {
            return Ok(None);
        }

        let start = self.metadata.block_index.find_offset(key);
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(file).take(self.data_len - start);

        while let Some(entry) = Entry::read_from(&mut reader)? {
            match entry.key().cmp(key) {
                Ordering::Equal => return Ok(Some(entry)),
                Ordering::Greater => break,
                Ordering::Less => {}
            }
        }

        Ok(None)
    }

    /// Reads every entry in stored (key-ascending) order. Used by
    /// compaction.
    pub fn get_all_entries(&self) -> Result<Vec<Entry>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file).take(self.data_len);

        let mut entries = Vec::with_capacity(self.metadata.entry_count as usize);
        while let Some(entry) = Entry::read_from(&mut reader)? {
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Creates a sequential iterator over the data region.
    pub fn iter(&self) -> Result<SSTableIterator> {
        SSTableIterator::new(&self.path, self.data_len)
    }

    /// Deletes the table file. Called after compaction retires the
    /// table.
    pub fn remove(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Returns the table metadata.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Returns the level this table belongs to.
    pub fn level(&self) -> usize {
        self.metadata.level
    }

    /// Returns the path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if `key` falls within this table's key range.
    pub fn key_in_range(&self, key: &[u8]) -> bool {
        self.metadata.min_key.as_slice() <= key && key <= self.metadata.max_key.as_slice()
    }
}
