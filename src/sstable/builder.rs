//! SSTable builder implementation.
//!
//! Collects entries in any order and writes them out as a sorted,
//! immutable table file with an index trailer.

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::filter::BloomFilter;
use crate::sstable::index::BlockIndex;
use crate::sstable::table::{SSTable, TableMetadata};
use crate::sstable::{
    sstable_filename_matches, DEFAULT_BLOCK_INDEX_INTERVAL, DEFAULT_BLOOM_FP_RATE, FOOTER_SIZE,
    MAGIC_NUMBER,
};
use bytes::BufMut;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// SSTableBuilder accumulates entries and produces an SSTable file.
///
/// Usage:
/// ```no_run
/// use emberkv::entry::Entry;
/// use emberkv::sstable::SSTableBuilder;
///
/// let mut builder = SSTableBuilder::new(0, 2);
/// builder.add_entry(Entry::put(b"b", b"2"));
/// builder.add_entry(Entry::put(b"a", b"1"));
/// let table = builder.build("./tables", "sstable_L0_0.sst").unwrap();
/// ```
pub struct SSTableBuilder {
    entries: Vec<Entry>,
    bloom: BloomFilter,
    level: usize,
    index_interval: usize,
}

impl SSTableBuilder {
    /// Creates a builder for a table at `level`, sizing the Bloom filter
    /// for `expected_entries` keys at the default false positive rate.
    pub fn new(level: usize, expected_entries: usize) -> Self {
        Self::with_bloom_fp_rate(level, expected_entries, DEFAULT_BLOOM_FP_RATE)
    }

    /// Creates a builder with an explicit Bloom filter false positive
    /// rate.
    pub fn with_bloom_fp_rate(level: usize, expected_entries: usize, fp_rate: f64) -> Self {
        Self {
            entries: Vec::with_capacity(expected_entries),
            bloom: BloomFilter::new(expected_entries, fp_rate),
            level,
            index_interval: DEFAULT_BLOCK_INDEX_INTERVAL,
        }
    }

    /// Sets the block index interval (default: 100 entries).
    pub fn set_index_interval(&mut self, interval: usize) {
        self.index_interval = interval.max(1);
    }

    /// Adds an entry. Entries may arrive in any order; `build` sorts.
    pub fn add_entry(&mut self, entry: Entry) {
        self.bloom.add(entry.key());
        self.entries.push(entry);
    }

    /// Returns the number of entries added so far.
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Sorts the collected entries and writes the table file.
    ///
    /// Entries are ordered by key ascending; duplicate keys sort newest
    /// first (callers normally deduplicate before building). The target
    /// directory is created if missing. On success the file has been
    /// fsynced and the returned [`SSTable`] carries complete metadata.
    pub fn build<P: AsRef<Path>>(mut self, dir: P, filename: &str) -> Result<SSTable> {
        if self.entries.is_empty() {
            return Err(Error::invalid_argument("cannot build an SSTable with no entries"));
        }
        if !sstable_filename_matches(filename, self.level) {
            return Err(Error::invalid_argument(format!(
                "filename {:?} does not encode level {}",
                filename, self.level
            )));
        }

        self.entries.sort_by(|a, b| {
            a.compare_by_key(b).then_with(|| b.timestamp().cmp(&a.timestamp()))
        });

        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(filename);
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        // Data region, recording one index entry per interval.
        let mut index = BlockIndex::new();
        let mut offset: u64 = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            if i % self.index_interval == 0 {
                index.add_entry(entry.key(), offset);
            }
            let encoded = entry.encode();
            writer.write_all(&encoded)?;
            offset += encoded.len() as u64;
        }

        // Index trailer and footer.
        let index_bytes = index.encode();
        writer.write_all(&index_bytes)?;

        let mut footer = Vec::with_capacity(FOOTER_SIZE);
        footer.put_u64_le(offset);
        footer.put_u32_le(crc32fast::hash(&index_bytes));
        footer.put_u64_le(MAGIC_NUMBER);
        writer.write_all(&footer)?;

        writer.flush()?;
        writer.get_ref().sync_all()?;

        let file_size = offset + index_bytes.len() as u64 + FOOTER_SIZE as u64;
        let metadata = TableMetadata {
            level: self.level,
            file_name: filename.to_string(),
            min_key: self.entries[0].key().to_vec(),
            max_key: self.entries[self.entries.len() - 1].key().to_vec(),
            entry_count: self.entries.len() as u32,
            file_size,
            created_at: crate::entry::monotonic_now(),
            bloom: self.bloom,
            block_index: index,
        };

        Ok(SSTable::from_parts(metadata, path, offset))
    }
}
