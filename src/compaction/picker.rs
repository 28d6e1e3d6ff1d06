//! Compaction trigger and selection strategies.
//!
//! Both strategies answer the same two questions ("is compaction
//! needed" and "which tables go into the next task") behind the
//! [`CompactionPicker`] trait, and share the manager's execute routine.

use crate::compaction::{CompactionKind, CompactionTask, LevelMap};
use crate::config::CompactionConfig;
use crate::sstable::SSTable;
use std::sync::Arc;

/// Strategy interface for deciding when and what to compact.
pub trait CompactionPicker: Send + Sync {
    /// Returns `true` if any level currently violates the strategy's
    /// thresholds.
    fn should_compact(&self, levels: &LevelMap) -> bool;

    /// Selects the input tables and output level for the next
    /// compaction, or `None` if nothing qualifies.
    fn select_task(&self, levels: &LevelMap) -> Option<CompactionTask>;
}

/// Leveled compaction: level 0 is bounded by table count, deeper levels
/// by a byte budget growing with a fixed multiplier; level-N tables keep
/// non-overlapping key ranges.
pub struct LeveledPicker {
    config: CompactionConfig,
}

impl LeveledPicker {
    /// Creates a leveled picker with the given thresholds.
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }
}

impl CompactionPicker for LeveledPicker {
    fn should_compact(&self, levels: &LevelMap) -> bool {
        for (&level, tables) in levels {
            if level == 0 {
                if tables.len() >= self.config.max_level0_tables {
                    return true;
                }
            } else if level_size(tables) > max_bytes_for_level(&self.config, level) {
                return true;
            }
        }
        false
    }

    fn select_task(&self, levels: &LevelMap) -> Option<CompactionTask> {
        // Level 0 first: all of its tables may overlap, so they are
        // compacted together with every overlapping level-1 table.
        let level0 = levels.get(&0).map(Vec::as_slice).unwrap_or(&[]);
        if level0.len() >= self.config.max_level0_tables {
            let (min, max) = union_range(level0);
            let mut inputs = level0.to_vec();
            if let Some(level1) = levels.get(&1) {
                inputs.extend(overlapping_tables(&min, &max, level1));
            }

            let estimated_size = level_size(&inputs);
            return Some(CompactionTask {
                inputs,
                output_level: 1,
                kind: CompactionKind::Major,
                estimated_size,
            });
        }

        // Otherwise the lowest level over its byte budget contributes
        // its oldest table, plus the overlapping tables one level down.
        for (&level, tables) in levels.range(1..) {
            if tables.is_empty() || level_size(tables) <= max_bytes_for_level(&self.config, level)
            {
                continue;
            }

            let oldest = match tables.iter().min_by_key(|t| t.metadata().created_at) {
                Some(table) => table.clone(),
                None => continue,
            };

            let mut inputs = vec![oldest.clone()];
            if let Some(next) = levels.get(&(level + 1)) {
                inputs.extend(overlapping_tables(
                    &oldest.metadata().min_key,
                    &oldest.metadata().max_key,
                    next,
                ));
            }

            let estimated_size = level_size(&inputs);
            return Some(CompactionTask {
                inputs,
                output_level: level + 1,
                kind: CompactionKind::Major,
                estimated_size,
            });
        }

        None
    }
}

/// Size-tiered compaction: whichever level accumulates the most tables
/// is merged wholesale into the level below it.
pub struct SizeTieredPicker {
    config: CompactionConfig,
}

impl SizeTieredPicker {
    /// Creates a size-tiered picker with the given thresholds.
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }
}

impl CompactionPicker for SizeTieredPicker {
    fn should_compact(&self, levels: &LevelMap) -> bool {
        levels.values().any(|tables| tables.len() >= self.config.max_level0_tables)
    }

    fn select_task(&self, levels: &LevelMap) -> Option<CompactionTask> {
        // The fullest level; ties break toward the lowest level.
        let (&level, tables) = levels
            .iter()
            .max_by(|a, b| a.1.len().cmp(&b.1.len()).then_with(|| b.0.cmp(a.0)))?;
        if tables.len() < self.config.max_level0_tables {
            return None;
        }

        Some(CompactionTask {
            inputs: tables.clone(),
            output_level: level + 1,
            kind: CompactionKind::Major,
            estimated_size: level_size(tables),
        })
    }
}

/// Total bytes held by a set of tables.
pub(crate) fn level_size(tables: &[Arc<SSTable>]) -> u64 {
    tables.iter().map(|t| t.metadata().file_size).sum()
}

/// Byte budget for a level: `max_level0_bytes * size_multiplier^(L-1)`.
pub(crate) fn max_bytes_for_level(config: &CompactionConfig, level: usize) -> u64 {
    let mut budget = config.max_level0_bytes as f64;
    for _ in 1..level {
        budget *= config.size_multiplier;
    }
    budget as u64
}

/// Returns `true` iff `[min1, max1]` and `[min2, max2]` overlap, by
/// lexicographic byte compare.
pub(crate) fn key_ranges_overlap(min1: &[u8], max1: &[u8], min2: &[u8], max2: &[u8]) -> bool {
    max1 >= min2 && max2 >= min1
}

/// The smallest and largest key covered by a set of tables.
fn union_range(tables: &[Arc<SSTable>]) -> (Vec<u8>, Vec<u8>) {
    let mut min = tables[0].metadata().min_key.clone();
    let mut max = tables[0].metadata().max_key.clone();
    for table in &tables[1..] {
        if table.metadata().min_key < min {
            min = table.metadata().min_key.clone();
        }
        if table.metadata().max_key > max {
            max = table.metadata().max_key.clone();
        }
    }
    (min, max)
}

/// The subset of `candidates` whose key range overlaps `[min, max]`.
fn overlapping_tables(min: &[u8], max: &[u8], candidates: &[Arc<SSTable>]) -> Vec<Arc<SSTable>> {
    candidates
        .iter()
        .filter(|t| key_ranges_overlap(min, max, &t.metadata().min_key, &t.metadata().max_key))
        .cloned()
        .collect()
}
