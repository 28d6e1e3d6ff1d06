//! Compaction: merging SSTables across levels.
//!
//! Compaction reads every entry from a set of input tables, keeps only
//! the newest version of each key, drops tombstones when it is safe to,
//! and writes the survivors as one table at the output level.
//!
//! ## Triggers
//!
//! - Level 0: table count reaches `max_level0_tables`
//! - Level N >= 1 (leveled): total bytes exceed
//!   `max_level0_bytes * size_multiplier^(N-1)`
//!
//! ## Process
//!
//! 1. Pick input tables and the output level (picker.rs)
//! 2. Read, sort, and deduplicate all input entries (newest wins)
//! 3. Write the surviving entries to a new table
//! 4. The engine swaps inputs for outputs atomically and deletes the
//!    retired files

pub mod picker;

pub use picker::{CompactionPicker, LeveledPicker, SizeTieredPicker};

use crate::config::{CompactionStrategy, Options};
use crate::error::{Error, Result};
use crate::sstable::{sstable_filename, SSTable, SSTableBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Per-level table lists, keyed by level number.
pub type LevelMap = BTreeMap<usize, Vec<Arc<SSTable>>>;

/// The kind of a compaction task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    /// A MemTable being written out as a level-0 table.
    Minor,
    /// SSTables being merged into a deeper level.
    Major,
}

/// A planned compaction: which tables to merge and where the output
/// goes.
#[derive(Clone)]
pub struct CompactionTask {
    /// Input tables, all of which are retired when the task completes.
    pub inputs: Vec<Arc<SSTable>>,
    /// Level the merged output is written to.
    pub output_level: usize,
    /// The kind of compaction.
    pub kind: CompactionKind,
    /// Total input bytes, for scheduling diagnostics.
    pub estimated_size: u64,
}

/// Plans and executes compactions for one engine.
pub struct CompactionManager {
    picker: Box<dyn CompactionPicker>,
    index_interval: usize,
    bloom_fp_rate: f64,
}

impl CompactionManager {
    /// Creates a manager using the strategy and thresholds in `options`.
    pub fn new(options: &Options) -> Self {
        let config = options.compaction.clone();
        let picker: Box<dyn CompactionPicker> = match config.strategy {
            CompactionStrategy::Leveled => Box::new(LeveledPicker::new(config)),
            CompactionStrategy::SizeTiered => Box::new(SizeTieredPicker::new(config)),
        };

        Self {
            picker,
            index_interval: options.block_index_interval,
            bloom_fp_rate: options.bloom_fp_rate,
        }
    }

    /// Returns `true` if any level currently needs compaction.
    pub fn should_compact(&self, levels: &LevelMap) -> bool {
        self.picker.should_compact(levels)
    }

    /// Selects the next compaction task, if any.
    pub fn select_task(&self, levels: &LevelMap) -> Option<CompactionTask> {
        self.picker.select_task(levels)
    }

    /// Merges the task's input tables into a new table at the output
    /// level.
    ///
    /// With `preserve_tombstones` set, delete markers survive into the
    /// output; otherwise a key whose newest version is a DELETE is
    /// dropped entirely. The caller sets the flag whenever a table not
    /// participating in this task could still hold a shadowed version of
    /// a key.
    ///
    /// On failure all input tables are left untouched and a partially
    /// written output file is removed before the error surfaces. Returns
    /// an empty list when nothing survives the merge.
    pub fn execute<P: AsRef<Path>>(
        &self,
        task: &CompactionTask,
        output_dir: P,
        output_id: u64,
        preserve_tombstones: bool,
    ) -> Result<Vec<SSTable>> {
        if task.inputs.is_empty() {
            return Err(Error::invalid_argument("compaction task has no input tables"));
        }

        log::info!(
            "compacting {} tables ({} bytes, {:?}) into level {}",
            task.inputs.len(),
            task.estimated_size,
            task.kind,
            task.output_level
        );

        let mut entries = Vec::new();
        for table in &task.inputs {
            entries.extend(table.get_all_entries()?);
        }

        // Key ascending, newest first within a key; the first entry of
        // each key run is the live version.
        entries.sort_by(|a, b| a.compare_by_key(b).then_with(|| b.timestamp().cmp(&a.timestamp())));

        let mut survivors = Vec::with_capacity(entries.len());
        let mut last_key: Option<Vec<u8>> = None;
        for entry in entries {
            if last_key.as_deref() == Some(entry.key()) {
                continue;
            }
            last_key = Some(entry.key().to_vec());

            if entry.is_tombstone() && !preserve_tombstones {
                continue;
            }
            survivors.push(entry);
        }

        if survivors.is_empty() {
            log::info!("compaction into level {} left no surviving entries", task.output_level);
            return Ok(Vec::new());
        }

        let filename = sstable_filename(task.output_level, output_id);
        let mut builder =
            SSTableBuilder::with_bloom_fp_rate(task.output_level, survivors.len(), self.bloom_fp_rate);
        builder.set_index_interval(self.index_interval);
        for entry in survivors {
            builder.add_entry(entry);
        }

        match builder.build(output_dir.as_ref(), &filename) {
            Ok(table) => {
                log::info!(
                    "compaction wrote {} with {} entries ({} bytes)",
                    filename,
                    table.metadata().entry_count,
                    table.metadata().file_size
                );
                Ok(vec![table])
            }
            Err(e) => {
                let partial = output_dir.as_ref().join(&filename);
                if partial.exists() {
                    if let Err(rm) = std::fs::remove_file(&partial) {
                        log::warn!("failed to remove partial compaction output {:?}: {}", partial, rm);
                    }
                }
                Err(e)
            }
        }
    }
}
