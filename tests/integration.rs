//! Integration tests for the public `quarrydb` API.
//!
//! These exercise the full storage stack — write batches → WAL →
//! memtables → tables → MANIFEST — through the public surface only:
//! open/close/reopen cycles, snapshots, merge operators, range deletes,
//! column families, compaction, and crash recovery.

use std::sync::Arc;

use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use quarrydb::batch::WriteBatch;
use quarrydb::engine::Db;
use quarrydb::merge::UInt64AddOperator;
use quarrydb::options::{ColumnFamilyOptions, Options, ReadOptions, WriteOptions};

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::INFO)
        .try_init();
}

fn base_options() -> Options {
    let mut options = Options::default();
    options.create_if_missing = true;
    options
}

fn wo() -> WriteOptions {
    WriteOptions::default()
}

fn ro() -> ReadOptions {
    ReadOptions::default()
}

fn scan_keys(db: &Db) -> Vec<Vec<u8>> {
    let mut iter = db.iter(&ro()).unwrap();
    iter.seek_to_first();
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    iter.status().unwrap();
    keys
}

// ------------------------------------------------------------------------------------------------
// End-to-end scenarios
// ------------------------------------------------------------------------------------------------

#[test]
fn test_basic_round_trip_with_reopen() {
    init_tracing();
    let tmp = TempDir::new().unwrap();

    {
        let db = Db::open(tmp.path(), base_options()).unwrap();
        db.put(&wo(), b"k", b"v").unwrap();
        assert_eq!(db.get(&ro(), b"k").unwrap(), Some(b"v".to_vec()));
        db.close().unwrap();
    }

    let db = Db::open(tmp.path(), base_options()).unwrap();
    assert_eq!(db.get(&ro(), b"k").unwrap(), Some(b"v".to_vec()));
    db.close().unwrap();
}

#[test]
fn test_snapshot_isolation() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), base_options()).unwrap();

    db.put(&wo(), b"k", b"1").unwrap();
    let snap = db.snapshot();
    db.put(&wo(), b"k", b"2").unwrap();

    let at_snap = ReadOptions {
        snapshot: Some(snap.sequence()),
        ..Default::default()
    };
    assert_eq!(db.get(&at_snap, b"k").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(&ro(), b"k").unwrap(), Some(b"2".to_vec()));
    db.close().unwrap();
}

#[test]
fn test_merge_counter_across_flush_and_reopen() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let mut options = base_options();
    options.cf_options.merge_operator = Some(Arc::new(UInt64AddOperator));

    {
        let db = Db::open(tmp.path(), options.clone()).unwrap();
        db.put(&wo(), b"c", &0u64.to_le_bytes()).unwrap();
        for _ in 0..5 {
            db.merge(&wo(), b"c", &1u64.to_le_bytes()).unwrap();
        }
        db.flush().unwrap();
        assert_eq!(
            db.get(&ro(), b"c").unwrap(),
            Some(5u64.to_le_bytes().to_vec())
        );
        db.close().unwrap();
    }

    let db = Db::open(tmp.path(), options).unwrap();
    assert_eq!(
        db.get(&ro(), b"c").unwrap(),
        Some(5u64.to_le_bytes().to_vec())
    );
    db.close().unwrap();
}

#[test]
fn test_range_delete_scan() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), base_options()).unwrap();

    for key in [&b"a"[..], b"b", b"c", b"d", b"e"] {
        db.put(&wo(), key, b"v").unwrap();
    }
    db.delete_range(&wo(), b"b", b"d").unwrap();

    assert_eq!(
        scan_keys(&db),
        vec![b"a".to_vec(), b"d".to_vec(), b"e".to_vec()]
    );
    db.close().unwrap();
}

#[test]
fn test_column_family_isolation() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), base_options()).unwrap();

    let x = db
        .create_column_family("x", ColumnFamilyOptions::default())
        .unwrap();
    db.put_cf(&wo(), x.id(), b"k", b"X").unwrap();
    db.put(&wo(), b"k", b"D").unwrap();

    assert_eq!(db.get(&ro(), b"k").unwrap(), Some(b"D".to_vec()));
    assert_eq!(db.get_cf(&ro(), x.id(), b"k").unwrap(), Some(b"X".to_vec()));

    // The default family's iterator yields only its own entry.
    let mut iter = db.iter(&ro()).unwrap();
    iter.seek_to_first();
    assert!(iter.valid());
    assert_eq!(iter.value(), b"D");
    iter.next();
    assert!(!iter.valid());
    db.close().unwrap();
}

#[test]
fn test_crash_after_flush_sequences_stay_monotonic() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let last_before_crash;

    {
        let db = Db::open(tmp.path(), base_options()).unwrap();
        for i in 0..100 {
            db.put(
                &wo(),
                format!("key-{i:03}").as_bytes(),
                format!("value-{i}").as_bytes(),
            )
            .unwrap();
        }
        db.flush().unwrap();
        last_before_crash = db.last_sequence();
        db.simulate_crash().unwrap();
    }

    let db = Db::open(tmp.path(), base_options()).unwrap();
    for i in 0..100 {
        assert_eq!(
            db.get(&ro(), format!("key-{i:03}").as_bytes()).unwrap(),
            Some(format!("value-{i}").into_bytes())
        );
    }

    // No sequence collision with the recovered table.
    let mut batch = WriteBatch::new();
    batch.put(b"after", b"crash");
    let seq = db.write_returning_seq(&wo(), batch).unwrap();
    assert!(seq > last_before_crash);
    db.close().unwrap();
}

// ------------------------------------------------------------------------------------------------
// Round-trip and boundary laws
// ------------------------------------------------------------------------------------------------

#[test]
fn test_write_batch_encode_decode_law() {
    init_tracing();
    let mut batch = WriteBatch::new();
    batch.set_sequence(77);
    batch.put(b"a", b"1");
    batch.merge(b"b", b"2");
    batch.delete(b"c");
    batch.single_delete(b"d");
    batch.delete_range(b"e", b"g");
    batch.put_cf(3, b"h", b"4");

    let decoded = WriteBatch::from_data(batch.data().to_vec()).unwrap();
    assert_eq!(decoded.data(), batch.data());
    assert_eq!(decoded.count(), batch.count());
    assert_eq!(decoded.sequence(), batch.sequence());
}

#[test]
fn test_empty_flush_is_noop() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), base_options()).unwrap();

    db.put(&wo(), b"k", b"v").unwrap();
    db.flush().unwrap();
    let seq = db.last_sequence();

    db.flush().unwrap();
    db.flush().unwrap();
    assert_eq!(db.last_sequence(), seq);
    db.close().unwrap();
}

#[test]
fn test_zero_length_key_and_value_survive_stack() {
    init_tracing();
    let tmp = TempDir::new().unwrap();

    {
        let db = Db::open(tmp.path(), base_options()).unwrap();
        db.put(&wo(), b"", b"").unwrap();
        db.flush().unwrap();
        assert_eq!(db.get(&ro(), b"").unwrap(), Some(Vec::new()));
        db.close().unwrap();
    }

    let db = Db::open(tmp.path(), base_options()).unwrap();
    assert_eq!(db.get(&ro(), b"").unwrap(), Some(Vec::new()));
    db.close().unwrap();
}

#[test]
fn test_marker_only_batch_recovered() {
    init_tracing();
    let tmp = TempDir::new().unwrap();

    {
        let db = Db::open(tmp.path(), base_options()).unwrap();
        let mut markers = WriteBatch::new();
        markers.mark_begin_prepare();
        markers.mark_end_prepare(b"xid-standalone");
        db.write(
            &WriteOptions {
                sync: true,
                ..Default::default()
            },
            markers,
        )
        .unwrap();
        db.simulate_crash().unwrap();
    }

    let db = Db::open(tmp.path(), base_options()).unwrap();
    let recovered = db.recovered_transactions();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].xid, b"xid-standalone".to_vec());
    db.close().unwrap();
}

#[test]
fn test_seek_on_empty_db() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), base_options()).unwrap();

    let mut iter = db.iter(&ro()).unwrap();
    iter.seek(b"x");
    assert!(!iter.valid());
    db.close().unwrap();
}

#[test]
fn test_single_delete_differs_from_delete_after_compaction() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), base_options()).unwrap();

    // Plain delete buries every version of "del".
    db.put(&wo(), b"del", b"first").unwrap();
    db.flush().unwrap();
    db.put(&wo(), b"del", b"second").unwrap();
    db.delete(&wo(), b"del").unwrap();

    // Single-delete removes exactly the most recent version of "sdel":
    // once it annihilates with that put in compaction, the older
    // version re-surfaces.
    db.put(&wo(), b"sdel", b"first").unwrap();
    db.flush().unwrap();
    db.put(&wo(), b"sdel", b"second").unwrap();
    db.single_delete(&wo(), b"sdel").unwrap();
    db.flush().unwrap();

    db.compact_range(None, None).unwrap();

    assert_eq!(db.get(&ro(), b"del").unwrap(), None);
    assert_eq!(db.get(&ro(), b"sdel").unwrap(), Some(b"first".to_vec()));
    db.close().unwrap();
}

// ------------------------------------------------------------------------------------------------
// Compaction end-to-end
// ------------------------------------------------------------------------------------------------

#[test]
fn test_manual_compaction_preserves_visible_state() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), base_options()).unwrap();

    for round in 0..3 {
        for i in 0..50 {
            db.put(
                &wo(),
                format!("key-{i:03}").as_bytes(),
                format!("round-{round}-{i}").as_bytes(),
            )
            .unwrap();
        }
        db.delete(&wo(), format!("key-{:03}", round).as_bytes()).unwrap();
        db.flush().unwrap();
    }

    let before: Vec<Vec<u8>> = scan_keys(&db);
    db.compact_range(None, None).unwrap();
    let after: Vec<Vec<u8>> = scan_keys(&db);
    assert_eq!(before, after);

    // Spot-check values post-compaction: only the last round's delete
    // has no later overwrite.
    assert_eq!(db.get(&ro(), b"key-002").unwrap(), None);
    assert_eq!(
        db.get(&ro(), b"key-010").unwrap(),
        Some(b"round-2-10".to_vec())
    );
    db.close().unwrap();
}

#[test]
fn test_automatic_compaction_under_load() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let mut options = base_options();
    options.cf_options.write_buffer_size = 2048;
    options.cf_options.level0_file_num_compaction_trigger = 2;
    let db = Db::open(tmp.path(), options).unwrap();

    for i in 0..2000 {
        db.put(
            &wo(),
            format!("key-{:05}", i % 400).as_bytes(),
            format!("value-{i}").as_bytes(),
        )
        .unwrap();
    }

    // Every key holds its newest value regardless of where compaction
    // moved it.
    for k in 0..400 {
        let newest = (0..2000).rev().find(|i| i % 400 == k).unwrap();
        assert_eq!(
            db.get(&ro(), format!("key-{k:05}").as_bytes()).unwrap(),
            Some(format!("value-{newest}").into_bytes()),
            "key {k}"
        );
    }
    db.close().unwrap();
}

#[test]
fn test_snapshot_protects_versions_across_compaction() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), base_options()).unwrap();

    db.put(&wo(), b"k", b"old").unwrap();
    db.flush().unwrap();
    let snap = db.snapshot();
    db.put(&wo(), b"k", b"new").unwrap();
    db.flush().unwrap();

    db.compact_range(None, None).unwrap();

    let at_snap = ReadOptions {
        snapshot: Some(snap.sequence()),
        ..Default::default()
    };
    assert_eq!(db.get(&at_snap, b"k").unwrap(), Some(b"old".to_vec()));
    assert_eq!(db.get(&ro(), b"k").unwrap(), Some(b"new".to_vec()));
    db.close().unwrap();
}

#[test]
fn test_get_equals_iterator_at_snapshot() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), base_options()).unwrap();

    for i in 0..30 {
        db.put(&wo(), format!("k{i:02}").as_bytes(), format!("v{i}").as_bytes())
            .unwrap();
    }
    db.flush().unwrap();
    for i in 10..20 {
        db.put(&wo(), format!("k{i:02}").as_bytes(), format!("w{i}").as_bytes())
            .unwrap();
    }
    let snap = db.snapshot();
    for i in 0..30 {
        db.put(&wo(), format!("k{i:02}").as_bytes(), b"post-snapshot")
            .unwrap();
    }

    let at_snap = ReadOptions {
        snapshot: Some(snap.sequence()),
        ..Default::default()
    };
    let mut iter = db.iter(&at_snap).unwrap();
    for i in 0..30 {
        let key = format!("k{i:02}");
        iter.seek(key.as_bytes());
        assert!(iter.valid());
        assert_eq!(iter.key(), key.as_bytes());
        assert_eq!(
            Some(iter.value().to_vec()),
            db.get(&at_snap, key.as_bytes()).unwrap()
        );
    }
    db.close().unwrap();
}
