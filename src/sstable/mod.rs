//! SSTable (Sorted String Table) implementation.
//!
//! An SSTable is an immutable, sorted file of key-value records plus
//! in-memory metadata (key range, Bloom filter, sparse block index).
//!
//! ## File Format
//!
//! ```text
//! [Record 1]
//! [Record 2]        // data region: the shared record layout,
//! ...               // keys strictly ascending
//! [Record N]
//! [Index Block]     // serialized sparse block index
//! [Footer: 20B]     // index offset, index CRC32, magic
//! ```
//!
//! The block index is persisted in the trailer; everything else in the
//! metadata (entry count, min/max key, Bloom filter) is recomputed by a
//! single scan of the data region when a table is reopened, so a table
//! file is self-describing across restarts.

pub mod builder;
pub mod index;
pub mod iterator;
pub mod table;

pub use builder::SSTableBuilder;
pub use index::BlockIndex;
pub use iterator::SSTableIterator;
pub use table::{SSTable, TableMetadata};

/// Footer size in bytes: index offset (8) + index CRC (4) + magic (8).
pub const FOOTER_SIZE: usize = 20;

/// Magic number closing every SSTable file ("EMBER_SS").
pub const MAGIC_NUMBER: u64 = 0x454d_4245_525f_5353;

/// Default number of data entries covered by one block index entry.
pub const DEFAULT_BLOCK_INDEX_INTERVAL: usize = 100;

/// Default Bloom filter false positive rate.
pub const DEFAULT_BLOOM_FP_RATE: f64 = 0.01;

/// Builds the SSTable filename for a level and table id.
pub fn sstable_filename(level: usize, id: u64) -> String {
    format!("sstable_L{}_{}.sst", level, id)
}

/// Parses `(level, id)` out of an SSTable filename.
///
/// Returns `None` for filenames that do not match
/// `sstable_L<level>_<id>.sst`.
pub fn parse_sstable_filename(name: &str) -> Option<(usize, u64)> {
    let rest = name.strip_prefix("sstable_L")?.strip_suffix(".sst")?;
    let (level, id) = rest.split_once('_')?;
    Some((level.parse().ok()?, id.parse().ok()?))
}

/// Returns `true` if `name` is an SSTable filename encoding `level`.
pub(crate) fn sstable_filename_matches(name: &str, level: usize) -> bool {
    matches!(parse_sstable_filename(name), Some((l, _)) if l == level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_roundtrip() {
        assert_eq!(sstable_filename(0, 7), "sstable_L0_7.sst");
        assert_eq!(parse_sstable_filename("sstable_L0_7.sst"), Some((0, 7)));
        assert_eq!(parse_sstable_filename("sstable_L12_345.sst"), Some((12, 345)));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(parse_sstable_filename("wal_3.log"), None);
        assert_eq!(parse_sstable_filename("sstable_L_.sst"), None);
        assert_eq!(parse_sstable_filename("sstable_L1.sst"), None);
        assert_eq!(parse_sstable_filename("sstable_L1_2.tmp"), None);
    }
}
