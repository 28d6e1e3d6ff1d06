//! Configuration options for the emberkv storage engine.

/// Configuration options for opening an engine.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of distinct keys the active MemTable holds before
    /// it is rotated and queued for flushing.
    /// Default: 1024
    pub max_memtable_entries: usize,

    /// Number of consecutive data entries covered by one sparse block
    /// index entry.
    /// Default: 100
    pub block_index_interval: usize,

    /// Bloom filter target false positive rate.
    /// Default: 0.01 (1%)
    pub bloom_fp_rate: f64,

    /// Fsync the WAL on every write commit.
    /// Disabling reduces durability but increases write throughput.
    /// Default: true
    pub sync_wal: bool,

    /// Compaction trigger and selection parameters.
    pub compaction: CompactionConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_memtable_entries: 1024,
            block_index_interval: 100,
            bloom_fp_rate: 0.01,
            sync_wal: true,
            compaction: CompactionConfig::default(),
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the MemTable capacity in distinct keys.
    pub fn max_memtable_entries(mut self, entries: usize) -> Self {
        self.max_memtable_entries = entries;
        self
    }

    /// Sets the block index interval.
    pub fn block_index_interval(mut self, interval: usize) -> Self {
        self.block_index_interval = interval;
        self
    }

    /// Sets the Bloom filter false positive rate.
    pub fn bloom_fp_rate(mut self, rate: f64) -> Self {
        self.bloom_fp_rate = rate;
        self
    }

    /// Enables or disables fsync on every write commit.
    pub fn sync_wal(mut self, value: bool) -> Self {
        self.sync_wal = value;
        self
    }

    /// Sets the compaction configuration.
    pub fn compaction(mut self, config: CompactionConfig) -> Self {
        self.compaction = config;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_memtable_entries == 0 {
            return Err(crate::Error::invalid_argument("max_memtable_entries must be > 0"));
        }
        if self.block_index_interval == 0 {
            return Err(crate::Error::invalid_argument("block_index_interval must be > 0"));
        }
        if self.bloom_fp_rate <= 0.0 || self.bloom_fp_rate >= 1.0 {
            return Err(crate::Error::invalid_argument(
                "bloom_fp_rate must be between 0 and 1",
            ));
        }
        if self.compaction.max_level0_tables == 0 {
            return Err(crate::Error::invalid_argument("max_level0_tables must be > 0"));
        }
        if self.compaction.size_multiplier <= 1.0 {
            return Err(crate::Error::invalid_argument("size_multiplier must be > 1"));
        }
        Ok(())
    }
}

/// Compaction strategies supported by emberkv.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategy {
    /// Merge the level holding the most tables into the next level.
    SizeTiered,

    /// Keep levels >= 1 within a byte budget that grows by a fixed
    /// multiplier per level, with non-overlapping key ranges.
    Leveled,
}

/// Trigger and selection parameters for compaction.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// The compaction strategy.
    /// Default: Leveled
    pub strategy: CompactionStrategy,

    /// Maximum number of level-0 tables before compaction triggers.
    /// Default: 4
    pub max_level0_tables: usize,

    /// Byte budget for level 1; level L has budget
    /// `max_level0_bytes * size_multiplier^(L-1)`.
    /// Default: 10 MiB
    pub max_level0_bytes: u64,

    /// Size multiplier between consecutive levels.
    /// Default: 10.0
    pub size_multiplier: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: CompactionStrategy::Leveled,
            max_level0_tables: 4,
            max_level0_bytes: 10 * 1024 * 1024,
            size_multiplier: 10.0,
        }
    }
}

impl CompactionConfig {
    /// Creates a new CompactionConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compaction strategy.
    pub fn strategy(mut self, strategy: CompactionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the level-0 table count threshold.
    pub fn max_level0_tables(mut self, count: usize) -> Self {
        self.max_level0_tables = count;
        self
    }

    /// Sets the level-1 byte budget.
    pub fn max_level0_bytes(mut self, bytes: u64) -> Self {
        self.max_level0_bytes = bytes;
        self
    }

    /// Sets the per-level size multiplier.
    pub fn size_multiplier(mut self, multiplier: f64) -> Self {
        self.size_multiplier = multiplier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.max_memtable_entries, 1024);
        assert_eq!(opts.block_index_interval, 100);
        assert!(opts.sync_wal);
        assert_eq!(opts.compaction.strategy, CompactionStrategy::Leveled);
        assert_eq!(opts.compaction.max_level0_tables, 4);
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .max_memtable_entries(8)
            .block_index_interval(10)
            .sync_wal(false)
            .compaction(
                CompactionConfig::new()
                    .strategy(CompactionStrategy::SizeTiered)
                    .max_level0_tables(2),
            );

        assert_eq!(opts.max_memtable_entries, 8);
        assert_eq!(opts.block_index_interval, 10);
        assert!(!opts.sync_wal);
        assert_eq!(opts.compaction.strategy, CompactionStrategy::SizeTiered);
        assert_eq!(opts.compaction.max_level0_tables, 2);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.max_memtable_entries = 0;
        assert!(opts.validate().is_err());

        opts.max_memtable_entries = 16;
        opts.bloom_fp_rate = 1.5;
        assert!(opts.validate().is_err());

        opts.bloom_fp_rate = 0.01;
        opts.compaction.size_multiplier = 0.5;
        assert!(opts.validate().is_err());
    }
}
