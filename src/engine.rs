//! The storage engine coordinator.
//!
//! The engine owns the active MemTable, the queue of immutable
//! MemTables, the current WAL, and the per-level SSTable lists, all
//! behind a single reader-writer lock. Writers append to the WAL and
//! insert into the active table under the write lock; readers walk the
//! layers newest to oldest under the read lock.
//!
//! Flushes and compactions run on one background worker thread fed by a
//! task queue: rotation enqueues a flush, and a completed flush may
//! enqueue a compaction. The worker takes the write lock only for the
//! brief moments it installs a new table or swaps compaction inputs for
//! outputs, so foreground traffic keeps flowing while tables are built.

use crate::compaction::{CompactionManager, CompactionTask, LevelMap};
use crate::config::Options;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::sstable::{parse_sstable_filename, sstable_filename, SSTable, SSTableBuilder};
use crate::wal::{self, Wal};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A point-in-time snapshot of engine occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Distinct keys in the active MemTable.
    pub active_size: usize,
    /// Sealed MemTables waiting to be flushed.
    pub immutable_count: usize,
    /// Number of SSTables per level.
    pub tables_per_level: BTreeMap<usize, usize>,
}

/// Work items for the background worker.
enum Task {
    Flush,
    Compact,
    Shutdown,
}

/// A sealed MemTable queued for flushing, still paired with the WAL
/// file that made it durable.
struct ImmutableTable {
    table: Arc<MemTable>,
    wal_path: PathBuf,
}

/// Coordination state guarded by the engine's reader-writer lock.
struct EngineState {
    active: Arc<MemTable>,
    wal: Wal,
    immutables: VecDeque<ImmutableTable>,
    levels: LevelMap,
    wal_counter: u64,
    table_counter: u64,
    closed: bool,
}

/// State and collaborators shared with the background worker.
struct EngineShared {
    state: RwLock<EngineState>,
    options: Options,
    wal_dir: PathBuf,
    sstable_dir: PathBuf,
    compaction: CompactionManager,
}

/// An embeddable LSM-tree key-value storage engine.
///
/// # Thread Safety
///
/// `Engine` is safe to share across threads behind an `Arc`; writes are
/// serialized internally and reads run concurrently.
///
/// # Example
///
/// ```no_run
/// use emberkv::{Engine, Options};
///
/// # fn main() -> Result<(), emberkv::Error> {
/// let engine = Engine::open("./data", Options::default())?;
/// engine.recover()?;
///
/// engine.put(b"user:1", b"Alice")?;
/// assert_eq!(engine.get(b"user:1")?, Some(b"Alice".to_vec()));
///
/// engine.delete(b"user:1")?;
/// assert_eq!(engine.get(b"user:1")?, None);
/// engine.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    shared: Arc<EngineShared>,
    task_tx: Sender<Task>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Opens an engine rooted at `data_dir`, creating the directory
    /// layout if needed.
    ///
    /// Existing WAL and SSTable files are left untouched; call
    /// [`recover`] before serving traffic to load them. The fresh WAL
    /// created here is numbered past every file already on disk so
    /// recovery can tell them apart.
    ///
    /// [`recover`]: Engine::recover
    pub fn open<P: AsRef<Path>>(data_dir: P, options: Options) -> Result<Engine> {
        options.validate()?;

        let data_dir = data_dir.as_ref();
        let wal_dir = data_dir.join("wal");
        let sstable_dir = data_dir.join("sstables");
        std::fs::create_dir_all(&wal_dir)?;
        std::fs::create_dir_all(&sstable_dir)?;

        let wal_counter =
            wal::list_wal_files(&wal_dir)?.last().map(|(c, _)| c + 1).unwrap_or(0);
        let table_counter = max_table_id(&sstable_dir)?.map(|id| id + 1).unwrap_or(0);

        let wal = Wal::create(&wal_dir, &wal::wal_filename(wal_counter), options.sync_wal)?;
        let active = Arc::new(MemTable::new(options.max_memtable_entries));

        let state = EngineState {
            active,
            wal,
            immutables: VecDeque::new(),
            levels: LevelMap::new(),
            wal_counter,
            table_counter,
            closed: false,
        };

        let compaction = CompactionManager::new(&options);
        let shared = Arc::new(EngineShared {
            state: RwLock::new(state),
            options,
            wal_dir,
            sstable_dir,
            compaction,
        });

        let (task_tx, task_rx) = unbounded();
        let worker = {
            let shared = shared.clone();
            let tx = task_tx.clone();
            std::thread::Builder::new()
                .name("emberkv-worker".to_string())
                .spawn(move || run_worker(shared, task_rx, tx))?
        };

        Ok(Engine { shared, task_tx, worker: Mutex::new(Some(worker)) })
    }

    /// Inserts a key-value pair. The write is durable in the WAL before
    /// this returns.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_entry(Entry::put(key, value))
    }

    /// Deletes a key by writing a tombstone; older versions disappear
    /// during compaction.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write_entry(Entry::delete(key))
    }

    fn write_entry(&self, entry: Entry) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.closed {
            return Err(Error::invalid_state("engine is closed"));
        }

        state.wal.write(&entry)?;
        state.wal.flush()?;

        match state.active.insert(entry.clone()) {
            Ok(()) => Ok(()),
            Err(Error::MemTableFull) => {
                self.shared.rotate(&mut state)?;
                let _ = self.task_tx.send(Task::Flush);

                // The record landed in the WAL that was just retired;
                // log it again so the new WAL fully covers the table it
                // is paired with.
                state.wal.write(&entry)?;
                state.wal.flush()?;

                match state.active.insert(entry) {
                    Ok(()) => Ok(()),
                    Err(Error::MemTableFull) => {
                        Err(Error::internal("MemTable full immediately after rotation"))
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Looks up a key.
    ///
    /// Layers are consulted newest to oldest: the active MemTable, the
    /// immutable queue, level-0 tables, then deeper levels. The first
    /// hit wins; a tombstone hit answers `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.shared.state.read();

        if let Some(entry) = state.active.get(key) {
            return Ok(live_value(entry));
        }

        for imm in state.immutables.iter().rev() {
            if let Some(entry) = imm.table.get(key) {
                return Ok(live_value(entry));
            }
        }

        if let Some(level0) = state.levels.get(&0) {
            for table in level0.iter().rev() {
                if let Some(entry) = table.get(key)? {
                    return Ok(live_value(entry));
                }
            }
        }

        for (_, tables) in state.levels.range(1..) {
            // Tables are sorted by min_key; only those starting at or
            // before the key can hold it. Leveled compaction keeps the
            // ranges disjoint (one candidate at most); size-tiered
            // merging may leave overlaps, so every in-range table is
            // checked, newest first.
            let idx = tables.partition_point(|t| t.metadata().min_key.as_slice() <= key);
            let mut candidates: Vec<&Arc<SSTable>> =
                tables[..idx].iter().filter(|t| t.key_in_range(key)).collect();
            candidates.sort_by_key(|t| std::cmp::Reverse(t.metadata().created_at));

            for table in candidates {
                if let Some(entry) = table.get(key)? {
                    return Ok(live_value(entry));
                }
            }
        }

        Ok(None)
    }

    /// Returns a snapshot of engine occupancy.
    pub fn stats(&self) -> EngineStats {
        let state = self.shared.state.read();
        EngineStats {
            active_size: state.active.size(),
            immutable_count: state.immutables.len(),
            tables_per_level: state
                .levels
                .iter()
                .map(|(level, tables)| (*level, tables.len()))
                .collect(),
        }
    }

    /// Rebuilds engine state from the files on disk.
    ///
    /// Intended to run on a freshly opened engine before foreground
    /// traffic. SSTables are reloaded with full metadata
    /// reconstruction; every pre-existing WAL is then replayed in
    /// counter order, the replayed tables are flushed to level 0, and
    /// the consumed WAL files are removed. Calling it twice against the
    /// same on-disk state yields the same engine state.
    pub fn recover(&self) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.closed {
            return Err(Error::invalid_state("engine is closed"));
        }

        // Per-level lists come straight from the table files.
        let mut by_level: BTreeMap<usize, Vec<(u64, Arc<SSTable>)>> = BTreeMap::new();
        let mut max_id = None;
        for dirent in std::fs::read_dir(&self.shared.sstable_dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => continue,
            };
            let (level, id) = match parse_sstable_filename(name) {
                Some(parsed) => parsed,
                None => {
                    log::warn!("skipping unrecognized file {:?} in sstable directory", name);
                    continue;
                }
            };

            let table = SSTable::open(dirent.path())?;
            by_level.entry(level).or_default().push((id, Arc::new(table)));
            max_id = max_id.max(Some(id));
        }

        let mut levels = LevelMap::new();
        for (level, mut tables) in by_level {
            if level == 0 {
                // Level 0 recency is the flush order, which the table id
                // encodes.
                tables.sort_by_key(|(id, _)| *id);
            } else {
                tables.sort_by(|a, b| a.1.metadata().min_key.cmp(&b.1.metadata().min_key));
            }
            levels.insert(level, tables.into_iter().map(|(_, table)| table).collect());
        }
        state.levels = levels;
        if let Some(max_id) = max_id {
            state.table_counter = state.table_counter.max(max_id + 1);
        }

        // Replay every WAL from before this engine instance, oldest
        // first. The current WAL is excluded; it belongs to the live
        // active table.
        let current_wal = state.wal.path().to_path_buf();
        let wal_files: Vec<(u64, PathBuf)> = wal::list_wal_files(&self.shared.wal_dir)?
            .into_iter()
            .filter(|(_, path)| *path != current_wal)
            .collect();

        let max_entries = self.shared.options.max_memtable_entries;
        let mut replayed = 0usize;
        let mut replay = MemTable::new(max_entries);
        for (_, path) in &wal_files {
            for entry in Wal::recover(path)? {
                if replay.is_full() && replay.get(entry.key()).is_none() {
                    self.shared.flush_to_level0(&mut state, &replay)?;
                    replay = MemTable::new(max_entries);
                }
                replay.insert(entry)?;
                replayed += 1;
            }
        }
        if !replay.is_empty() {
            self.shared.flush_to_level0(&mut state, &replay)?;
        }

        // Everything replayed is durable in level 0 now; the old WALs
        // have served their purpose.
        for (_, path) in &wal_files {
            if let Err(e) = std::fs::remove_file(path) {
                log::warn!("failed to remove replayed WAL {:?}: {}", path, e);
            }
        }

        log::info!(
            "recovery complete: {} WAL entries replayed, {} levels populated",
            replayed,
            state.levels.len()
        );

        let compact = self.shared.compaction.should_compact(&state.levels);
        drop(state);
        if compact {
            let _ = self.task_tx.send(Task::Compact);
        }

        Ok(())
    }

    /// Shuts the engine down.
    ///
    /// The background worker finishes its queue (including compactions
    /// cascaded from those tasks), outstanding immutable MemTables are
    /// flushed, and the current WAL is closed. The active MemTable's
    /// contents stay recoverable from that WAL at next startup.
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            let _ = self.task_tx.send(Task::Shutdown);
            if handle.join().is_err() {
                log::error!("background worker panicked during shutdown");
            }
        }

        let mut state = self.shared.state.write();
        if state.closed {
            return Ok(());
        }

        while let Some(imm) = state.immutables.pop_front() {
            self.shared.flush_to_level0(&mut state, &imm.table)?;
            if let Err(e) = std::fs::remove_file(&imm.wal_path) {
                log::warn!("failed to remove WAL {:?} during close: {}", imm.wal_path, e);
            }
        }

        state.wal.flush()?;
        state.closed = true;
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("error closing engine on drop: {}", e);
        }
    }
}

/// Extracts the readable value from a layer hit; a tombstone shadows
/// everything older, so it answers "not found".
fn live_value(entry: Entry) -> Option<Vec<u8>> {
    if entry.is_tombstone() {
        None
    } else {
        Some(entry.value().to_vec())
    }
}

/// Largest table id present in the SSTable directory.
fn max_table_id(dir: &Path) -> Result<Option<u64>> {
    let mut max_id = None;
    for dirent in std::fs::read_dir(dir)? {
        let dirent = dirent?;
        if let Some((_, id)) = dirent.file_name().to_str().and_then(parse_sstable_filename) {
            max_id = max_id.max(Some(id));
        }
    }
    Ok(max_id)
}

/// The background worker loop. On shutdown it keeps draining tasks that
/// were enqueued by the ones it just ran, so nothing is left pending.
fn run_worker(shared: Arc<EngineShared>, rx: Receiver<Task>, tx: Sender<Task>) {
    loop {
        match rx.recv() {
            Ok(Task::Flush) => shared.flush_oldest(&tx),
            Ok(Task::Compact) => shared.run_compaction(&tx),
            Ok(Task::Shutdown) => {
                while let Ok(task) = rx.try_recv() {
                    match task {
                        Task::Flush => shared.flush_oldest(&tx),
                        Task::Compact => shared.run_compaction(&tx),
                        Task::Shutdown => {}
                    }
                }
                break;
            }
            Err(_) => break,
        }
    }
}

impl EngineShared {
    /// Seals the active MemTable, queues it for flushing, and starts a
    /// fresh WAL + MemTable pair. Runs under the write lock.
    fn rotate(&self, state: &mut EngineState) -> Result<()> {
        state.active.seal();

        state.wal_counter += 1;
        let new_wal = Wal::create(
            &self.wal_dir,
            &wal::wal_filename(state.wal_counter),
            self.options.sync_wal,
        )?;
        let old_wal = std::mem::replace(&mut state.wal, new_wal);
        let old_path = old_wal.path().to_path_buf();
        old_wal.close()?;

        let old_active = std::mem::replace(
            &mut state.active,
            Arc::new(MemTable::new(self.options.max_memtable_entries)),
        );
        state.immutables.push_back(ImmutableTable { table: old_active, wal_path: old_path });

        Ok(())
    }

    /// Background flush entry point; errors are logged and the table is
    /// left queued for a later retry.
    fn flush_oldest(&self, tx: &Sender<Task>) {
        if let Err(e) = self.try_flush_oldest(tx) {
            log::error!("background flush failed: {}", e);
        }
    }

    fn try_flush_oldest(&self, tx: &Sender<Task>) -> Result<()> {
        // Snapshot the oldest immutable table and reserve a table id;
        // the build happens without the lock.
        let (table, table_id) = {
            let mut state = self.state.write();
            let table = match state.immutables.front() {
                Some(imm) => imm.table.clone(),
                None => return Ok(()),
            };
            let id = state.table_counter;
            state.table_counter += 1;
            (table, id)
        };

        let entries = table.drain_entries();
        let built = if entries.is_empty() {
            None
        } else {
            let mut builder = SSTableBuilder::with_bloom_fp_rate(
                0,
                entries.len(),
                self.options.bloom_fp_rate,
            );
            builder.set_index_interval(self.options.block_index_interval);
            for entry in entries {
                builder.add_entry(entry);
            }
            Some(builder.build(&self.sstable_dir, &sstable_filename(0, table_id))?)
        };

        let wal_path = {
            let mut state = self.state.write();
            if let Some(table) = built {
                state.levels.entry(0).or_default().push(Arc::new(table));
            }
            state.immutables.pop_front().map(|imm| imm.wal_path)
        };

        if let Some(path) = wal_path {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("failed to remove WAL {:?} after flush: {}", path, e);
            }
        }

        let compact = {
            let state = self.state.read();
            self.compaction.should_compact(&state.levels)
        };
        if compact {
            let _ = tx.send(Task::Compact);
        }

        Ok(())
    }

    /// Background compaction entry point; errors are logged and the
    /// task abandoned, leaving every input table in place.
    fn run_compaction(&self, tx: &Sender<Task>) {
        if let Err(e) = self.try_run_compaction(tx) {
            log::error!("background compaction failed: {}", e);
        }
    }

    fn try_run_compaction(&self, tx: &Sender<Task>) -> Result<()> {
        let (task, output_id, preserve) = {
            let mut state = self.state.write();
            let task = match self.compaction.select_task(&state.levels) {
                Some(task) => task,
                None => return Ok(()),
            };
            let id = state.table_counter;
            state.table_counter += 1;
            let preserve = preserve_tombstones(&state.levels, &task);
            (task, id, preserve)
        };

        // Scanning, sorting, and building all happen without the lock.
        let outputs = self.compaction.execute(&task, &self.sstable_dir, output_id, preserve)?;

        // The swap itself is atomic with respect to readers: they see
        // the input tables or the outputs, never half of each.
        {
            let mut state = self.state.write();
            for input in &task.inputs {
                if let Some(tables) = state.levels.get_mut(&input.level()) {
                    tables.retain(|t| !Arc::ptr_eq(t, input));
                }
            }
            for output in outputs {
                let level = output.level();
                let tables = state.levels.entry(level).or_default();
                tables.push(Arc::new(output));
                if level > 0 {
                    tables.sort_by(|a, b| a.metadata().min_key.cmp(&b.metadata().min_key));
                }
            }
            state.levels.retain(|_, tables| !tables.is_empty());
        }

        for input in &task.inputs {
            if let Err(e) = input.remove() {
                log::warn!("failed to remove compacted table {:?}: {}", input.path(), e);
            }
        }

        let compact_again = {
            let state = self.state.read();
            self.compaction.should_compact(&state.levels)
        };
        if compact_again {
            let _ = tx.send(Task::Compact);
        }

        Ok(())
    }

    /// Builds a level-0 SSTable directly from a MemTable, under the
    /// caller's write lock. Used by recovery and close; the background
    /// path is `try_flush_oldest`.
    fn flush_to_level0(&self, state: &mut EngineState, table: &MemTable) -> Result<()> {
        table.seal();
        let entries = table.drain_entries();
        if entries.is_empty() {
            return Ok(());
        }

        let id = state.table_counter;
        state.table_counter += 1;

        let mut builder =
            SSTableBuilder::with_bloom_fp_rate(0, entries.len(), self.options.bloom_fp_rate);
        builder.set_index_interval(self.options.block_index_interval);
        for entry in entries {
            builder.add_entry(entry);
        }

        let built = builder.build(&self.sstable_dir, &sstable_filename(0, id))?;
        state.levels.entry(0).or_default().push(Arc::new(built));
        Ok(())
    }
}

/// A tombstone may only be dropped when no table outside the task, at
/// the output level or deeper, could still hold a shadowed version of
/// the key.
fn preserve_tombstones(levels: &LevelMap, task: &CompactionTask) -> bool {
    levels.range(task.output_level..).any(|(_, tables)| {
        tables
            .iter()
            .any(|table| !task.inputs.iter().any(|input| Arc::ptr_eq(input, table)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_options(max_entries: usize) -> Options {
        Options::new().max_memtable_entries(max_entries)
    }

    #[test]
    fn test_basic_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), Options::default()).unwrap();

        engine.put(b"user:1", b"Alice").unwrap();
        assert_eq!(engine.get(b"user:1").unwrap(), Some(b"Alice".to_vec()));

        engine.delete(b"user:1").unwrap();
        assert_eq!(engine.get(b"user:1").unwrap(), None);
    }

    #[test]
    fn test_overwrite() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), Options::default()).unwrap();

        engine.put(b"k", b"v1").unwrap();
        engine.put(b"k", b"v2").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_get_missing_key() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), Options::default()).unwrap();
        assert_eq!(engine.get(b"nope").unwrap(), None);
    }

    #[test]
    fn test_empty_key_accepted() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), Options::default()).unwrap();

        engine.put(b"", b"empty").unwrap();
        assert_eq!(engine.get(b"").unwrap(), Some(b"empty".to_vec()));
    }

    #[test]
    fn test_rotation_keeps_all_keys_readable() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), small_options(3)).unwrap();

        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.put(b"c", b"3").unwrap();
        engine.put(b"d", b"4").unwrap();

        // The fourth distinct key forced a rotation: the overflow key
        // sits alone in the new active table, and the sealed table is
        // either still queued or already flushed to level 0.
        let stats = engine.stats();
        assert_eq!(stats.active_size, 1);
        assert!(
            stats.immutable_count >= 1 || stats.tables_per_level.get(&0).copied().unwrap_or(0) >= 1
        );

        for (key, value) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")] {
            assert_eq!(engine.get(key).unwrap(), Some(value.to_vec()), "key {:?}", key);
        }
    }

    #[test]
    fn test_delete_shadows_flushed_value() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), small_options(2)).unwrap();

        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.put(b"c", b"3").unwrap(); // rotates "a"/"b" out
        engine.delete(b"a").unwrap();

        assert_eq!(engine.get(b"a").unwrap(), None);
        assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_stats_empty_engine() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), Options::default()).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.active_size, 0);
        assert_eq!(stats.immutable_count, 0);
        assert!(stats.tables_per_level.is_empty());
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), Options::default()).unwrap();

        engine.put(b"k", b"v").unwrap();
        engine.close().unwrap();
        engine.close().unwrap(); // idempotent

        assert!(matches!(engine.put(b"x", b"y"), Err(Error::InvalidState(_))));
        assert!(matches!(engine.delete(b"k"), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_close_flushes_immutables() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), small_options(2)).unwrap();

        for i in 0..7 {
            engine.put(format!("key{}", i).as_bytes(), b"v").unwrap();
        }
        engine.close().unwrap();

        let stats = engine.stats();
        assert_eq!(stats.immutable_count, 0);
        assert!(stats.tables_per_level.get(&0).copied().unwrap_or(0) >= 1);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let dir = TempDir::new().unwrap();
        let result = Engine::open(dir.path(), Options::default().max_memtable_entries(0));
        assert!(result.is_err());
    }
}
