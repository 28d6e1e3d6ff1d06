// End-to-end integration tests for emberkv.
// These cover complete CRUD flows, MemTable rotation, and mixed access
// patterns against a real on-disk engine.

use emberkv::{Engine, Options};
use tempfile::TempDir;

#[test]
fn test_complete_crud() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), Options::default()).unwrap();

    // Create
    engine.put(b"user:1", b"Alice").unwrap();
    engine.put(b"user:2", b"Bob").unwrap();
    engine.put(b"user:3", b"Charlie").unwrap();

    // Read
    assert_eq!(engine.get(b"user:1").unwrap(), Some(b"Alice".to_vec()));
    assert_eq!(engine.get(b"user:2").unwrap(), Some(b"Bob".to_vec()));
    assert_eq!(engine.get(b"user:3").unwrap(), Some(b"Charlie".to_vec()));

    // Update
    engine.put(b"user:2", b"Bob_Updated").unwrap();
    assert_eq!(engine.get(b"user:2").unwrap(), Some(b"Bob_Updated".to_vec()));

    // Delete
    engine.delete(b"user:1").unwrap();
    assert_eq!(engine.get(b"user:1").unwrap(), None);

    // Remaining data is untouched
    assert_eq!(engine.get(b"user:2").unwrap(), Some(b"Bob_Updated".to_vec()));
    assert_eq!(engine.get(b"user:3").unwrap(), Some(b"Charlie".to_vec()));
}

#[test]
fn test_repeated_overwrite() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), Options::default()).unwrap();

    for i in 0..100 {
        engine.put(b"counter", format!("{}", i).as_bytes()).unwrap();
    }
    assert_eq!(engine.get(b"counter").unwrap(), Some(b"99".to_vec()));
}

#[test]
fn test_rotation_on_overflow() {
    let dir = TempDir::new().unwrap();
    let engine =
        Engine::open(dir.path(), Options::default().max_memtable_entries(3)).unwrap();

    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.put(b"c", b"3").unwrap();
    engine.put(b"d", b"4").unwrap();

    // The fourth distinct key forced a rotation: only the overflow key
    // lives in the new active table, and the sealed table is either
    // queued or already flushed to level 0.
    let stats = engine.stats();
    assert_eq!(stats.active_size, 1);
    assert!(
        stats.immutable_count >= 1 || stats.tables_per_level.get(&0).copied().unwrap_or(0) >= 1,
        "rotated table should be queued or flushed: {:?}",
        stats
    );

    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"d").unwrap(), Some(b"4".to_vec()));
}

#[test]
fn test_bulk_write_across_many_rotations() {
    let dir = TempDir::new().unwrap();
    let engine =
        Engine::open(dir.path(), Options::default().max_memtable_entries(32)).unwrap();

    let count = 500;
    for i in 0..count {
        let key = format!("key_{:05}", i);
        let value = format!("value_{:05}", i);
        engine.put(key.as_bytes(), value.as_bytes()).unwrap();
    }

    // Spot-check while flushes may still be in flight.
    for i in (0..count).step_by(50) {
        let key = format!("key_{:05}", i);
        let expected = format!("value_{:05}", i);
        assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(expected.into_bytes()));
    }

    engine.close().unwrap();

    // After close every sealed table has been flushed.
    let stats = engine.stats();
    assert_eq!(stats.immutable_count, 0);
    assert!(stats.tables_per_level.get(&0).copied().unwrap_or(0) >= 1);

    for i in 0..count {
        let key = format!("key_{:05}", i);
        let expected = format!("value_{:05}", i);
        assert_eq!(
            engine.get(key.as_bytes()).unwrap(),
            Some(expected.into_bytes()),
            "key_{:05} lost",
            i
        );
    }
}

#[test]
fn test_delete_then_reinsert() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), Options::default()).unwrap();

    engine.put(b"phoenix", b"first").unwrap();
    engine.delete(b"phoenix").unwrap();
    assert_eq!(engine.get(b"phoenix").unwrap(), None);

    engine.put(b"phoenix", b"second").unwrap();
    assert_eq!(engine.get(b"phoenix").unwrap(), Some(b"second".to_vec()));
}

#[test]
fn test_deletes_across_flush_boundaries() {
    let dir = TempDir::new().unwrap();
    let engine =
        Engine::open(dir.path(), Options::default().max_memtable_entries(4)).unwrap();

    // First generation of values.
    for i in 0..12 {
        engine.put(format!("k{}", i).as_bytes(), b"v1").unwrap();
    }
    // Delete every third key; the puts above have largely been rotated
    // out, so these tombstones shadow entries in older layers.
    for i in (0..12).step_by(3) {
        engine.delete(format!("k{}", i).as_bytes()).unwrap();
    }

    for i in 0..12 {
        let expected = if i % 3 == 0 { None } else { Some(b"v1".to_vec()) };
        assert_eq!(engine.get(format!("k{}", i).as_bytes()).unwrap(), expected, "k{}", i);
    }
}

#[test]
fn test_empty_key_and_empty_value() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), Options::default()).unwrap();

    // The engine accepts arbitrary byte keys, including the empty key;
    // boundary validation belongs to outer layers.
    engine.put(b"", b"empty key").unwrap();
    engine.put(b"empty value", b"").unwrap();

    assert_eq!(engine.get(b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(engine.get(b"empty value").unwrap(), Some(b"".to_vec()));

    engine.delete(b"").unwrap();
    assert_eq!(engine.get(b"").unwrap(), None);
}

#[test]
fn test_binary_keys_and_values() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), Options::default()).unwrap();

    let key = vec![0x00, 0xFF, 0x7F, 0x80];
    let value = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00];
    engine.put(&key, &value).unwrap();
    assert_eq!(engine.get(&key).unwrap(), Some(value));
}

#[test]
fn test_stats_track_layers() {
    let dir = TempDir::new().unwrap();
    let engine =
        Engine::open(dir.path(), Options::default().max_memtable_entries(2)).unwrap();

    assert_eq!(engine.stats().active_size, 0);

    engine.put(b"a", b"1").unwrap();
    assert_eq!(engine.stats().active_size, 1);

    engine.put(b"b", b"2").unwrap();
    engine.put(b"c", b"3").unwrap();
    engine.close().unwrap();

    let stats = engine.stats();
    assert_eq!(stats.immutable_count, 0);
    assert!(stats.tables_per_level.get(&0).copied().unwrap_or(0) >= 1);
}
