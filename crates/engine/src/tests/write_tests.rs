use super::helpers::{count_sst_files, open, test_config, tiny_memtable_config, wal_segments};
use crate::*;
use anyhow::Result;
use config::EngineConfig;
use std::fs;
use tempfile::tempdir;

// --------------------- Basic put / get / delete ---------------------

#[test]
fn put_and_get() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"name".to_vec(), b"alice".to_vec())?;
    assert_eq!(engine.get(b"name")?, Some(b"alice".to_vec()));
    assert_eq!(engine.get_entry(b"name")?.unwrap().seq, 1);
    Ok(())
}

#[test]
fn get_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;
    assert!(engine.get(b"nope")?.is_none());
    Ok(())
}

#[test]
fn delete_removes_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"k".to_vec(), b"v".to_vec())?;
    engine.delete(b"k".to_vec())?;
    assert!(engine.get(b"k")?.is_none());

    let entry = engine.get_entry(b"k")?.unwrap();
    assert!(entry.is_tombstone());
    assert_eq!(entry.seq, 2);
    Ok(())
}

#[test]
fn delete_absent_key_is_ok() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;
    engine.delete(b"ghost".to_vec())?;
    assert!(engine.get(b"ghost")?.is_none());
    Ok(())
}

#[test]
fn overwrite_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"k".to_vec(), b"v1".to_vec())?;
    engine.put(b"k".to_vec(), b"v2".to_vec())?;
    assert_eq!(engine.get(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn put_after_delete_resurrects() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"k".to_vec(), b"v1".to_vec())?;
    engine.delete(b"k".to_vec())?;
    engine.put(b"k".to_vec(), b"v2".to_vec())?;
    assert_eq!(engine.get(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn sequence_numbers_increase_per_write() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;
    assert_eq!(engine.seq(), 0);

    engine.put(b"a".to_vec(), b"1".to_vec())?;
    engine.delete(b"b".to_vec())?;
    engine.put(b"c".to_vec(), b"3".to_vec())?;
    assert_eq!(engine.seq(), 3);
    Ok(())
}

#[test]
fn binary_keys_and_empty_values() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    let key = vec![0u8, 255, 1, 254];
    engine.put(key.clone(), Vec::new())?;
    engine.flush()?;
    assert_eq!(engine.get(&key)?, Some(Vec::new()));
    Ok(())
}

// --------------------- Validation ---------------------

#[test]
fn empty_key_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    assert!(matches!(
        engine.put(Vec::new(), b"v".to_vec()),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(engine.delete(Vec::new()), Err(EngineError::InvalidArgument(_))));
    assert_eq!(engine.seq(), 0);
    Ok(())
}

#[test]
fn oversized_key_and_value_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    let big_key = vec![b'k'; MAX_KEY_SIZE + 1];
    assert!(matches!(
        engine.put(big_key, b"v".to_vec()),
        Err(EngineError::InvalidArgument(_))
    ));

    let big_value = vec![b'v'; MAX_VALUE_SIZE + 1];
    assert!(matches!(
        engine.put(b"k".to_vec(), big_value),
        Err(EngineError::InvalidArgument(_))
    ));

    // limits themselves are accepted
    engine.put(vec![b'k'; MAX_KEY_SIZE], b"v".to_vec())?;
    assert_eq!(engine.seq(), 1);
    Ok(())
}

#[test]
fn invalid_config_rejected_at_open() -> Result<()> {
    let dir = tempdir()?;
    let config = EngineConfig {
        sparse_index_interval: 0,
        ..test_config()
    };
    assert!(matches!(Engine::open(dir.path(), config), Err(EngineError::Config(_))));
    Ok(())
}

#[test]
fn closed_engine_rejects_operations() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;
    engine.put(b"k".to_vec(), b"v".to_vec())?;
    engine.close()?;

    assert!(matches!(engine.put(b"k".to_vec(), b"v".to_vec()), Err(EngineError::Closed)));
    assert!(matches!(engine.get(b"k"), Err(EngineError::Closed)));
    assert!(matches!(engine.flush(), Err(EngineError::Closed)));
    // second close is a no-op
    engine.close()?;
    Ok(())
}

// --------------------- Flush ---------------------

#[test]
fn flush_writes_l0_table() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"a".to_vec(), b"1".to_vec())?;
    engine.put(b"b".to_vec(), b"2".to_vec())?;
    engine.flush()?;

    assert_eq!(engine.level_file_counts()[0], 1);
    assert_eq!(count_sst_files(dir.path()), 1);
    assert_eq!(engine.stats()?.memtable_entries, 0);
    assert_eq!(engine.get(b"a")?, Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn flush_empty_memtable_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;
    engine.flush()?;
    engine.flush()?;
    assert_eq!(engine.sstable_count(), 0);
    assert_eq!(count_sst_files(dir.path()), 0);
    Ok(())
}

#[test]
fn flush_keeps_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"k".to_vec(), b"old".to_vec())?;
    engine.flush()?;
    engine.delete(b"k".to_vec())?;
    engine.flush()?;

    assert_eq!(engine.sstable_count(), 2);
    assert!(engine.get(b"k")?.is_none());
    assert_eq!(engine.stats()?.tombstones, 1);
    Ok(())
}

#[test]
fn flush_purges_covered_wal_segments() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put(b"a".to_vec(), b"1".to_vec())?;
    assert_eq!(wal_segments(dir.path()).len(), 1);

    engine.flush()?;
    let segments = wal_segments(dir.path());
    assert_eq!(segments.len(), 1);
    assert!(segments[0].ends_with("wal-000002.log"));
    Ok(())
}

#[test]
fn auto_flush_at_threshold() -> Result<()> {
    let dir = tempdir()?;
    let config = EngineConfig {
        memtable_size_threshold: 64,
        l0_compaction_trigger: 0,
        ..test_config()
    };
    let engine = Engine::open(dir.path(), config)?;

    for i in 0..20 {
        engine.put(format!("key{:02}", i).into_bytes(), b"0123456789".to_vec())?;
    }

    // every 5th write crosses 64 bytes (5 * 15)
    assert_eq!(engine.sstable_count(), 4);
    assert_eq!(engine.frozen_memtable_count(), 0);
    for i in 0..20 {
        assert_eq!(
            engine.get(format!("key{:02}", i).as_bytes())?,
            Some(b"0123456789".to_vec())
        );
    }
    Ok(())
}

#[test]
fn every_write_flushes_with_tiny_threshold() -> Result<()> {
    let dir = tempdir()?;
    let config = EngineConfig {
        l0_compaction_trigger: 0,
        ..tiny_memtable_config()
    };
    let engine = Engine::open(dir.path(), config)?;

    engine.put(b"a".to_vec(), b"1".to_vec())?;
    engine.put(b"b".to_vec(), b"2".to_vec())?;
    engine.delete(b"a".to_vec())?;

    assert_eq!(engine.level_file_counts()[0], 3);
    assert!(engine.get(b"a")?.is_none());
    assert_eq!(engine.get(b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn failed_inline_flush_does_not_fail_the_write() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path(), tiny_memtable_config())?;

    // every table write fails while L0 is a plain file
    let l0 = dir.path().join("sstables").join("L0");
    fs::remove_dir(&l0)?;
    fs::write(&l0, b"")?;

    engine.put(b"k".to_vec(), b"v".to_vec())?;
    engine.delete(b"gone".to_vec())?;
    assert_eq!(engine.get(b"k")?, Some(b"v".to_vec()));
    assert!(engine.get_entry(b"gone")?.unwrap().is_tombstone());
    assert_eq!(engine.sstable_count(), 0);
    assert_eq!(engine.frozen_memtable_count(), 2);

    fs::remove_file(&l0)?;
    fs::create_dir(&l0)?;
    engine.flush()?;
    assert_eq!(engine.frozen_memtable_count(), 0);
    assert_eq!(count_sst_files(dir.path()), 2);
    drop(engine);

    let engine = open(dir.path())?;
    assert_eq!(engine.get(b"k")?, Some(b"v".to_vec()));
    assert!(engine.get(b"gone")?.is_none());
    Ok(())
}

// --------------------- Concurrency ---------------------

#[test]
fn concurrent_writers_and_readers() -> Result<()> {
    let dir = tempdir()?;
    let config = EngineConfig {
        memtable_size_threshold: 512,
        l0_compaction_trigger: 3,
        background_work: true,
        ..test_config()
    };
    let engine = std::sync::Arc::new(Engine::open(dir.path(), config)?);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = std::sync::Arc::clone(&engine);
            std::thread::spawn(move || -> Result<()> {
                for i in 0..200 {
                    engine.put(format!("t{}-{:04}", t, i).into_bytes(), format!("{}", i).into_bytes())?;
                    // reads never observe a half-applied write
                    assert!(engine.get(format!("t{}-{:04}", t, i).as_bytes())?.is_some());
                }
                Ok(())
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap()?;
    }

    engine.flush()?;
    assert_eq!(engine.seq(), 800);
    assert_eq!(engine.scan(b"", usize::MAX)?.len(), 800);
    for t in 0..4 {
        assert_eq!(engine.scan(format!("t{}-", t).as_bytes(), usize::MAX)?.len(), 200);
    }
    Ok(())
}
