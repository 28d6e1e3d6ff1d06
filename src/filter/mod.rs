//! Probabilistic membership filters.
//!
//! Each SSTable carries a Bloom filter so that reads can skip tables
//! that definitely do not contain a key.

mod bloom;

pub use bloom::BloomFilter;
