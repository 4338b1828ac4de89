use crate::Engine;
use config::EngineConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Deterministic config: flushes and compactions run inline, no fsync.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        wal_sync: false,
        background_work: false,
        compaction_interval_ms: 0,
        ..EngineConfig::default()
    }
}

/// Config that flushes after every write.
pub fn tiny_memtable_config() -> EngineConfig {
    EngineConfig {
        memtable_size_threshold: 1,
        ..test_config()
    }
}

pub fn open(dir: &Path) -> anyhow::Result<Engine> {
    Ok(Engine::open(dir, test_config())?)
}

/// Drops the engine without closing it, like a killed process.
pub fn crash(engine: Engine) {
    std::mem::forget(engine);
}

/// `.sst` files under `data/sstables/L*/`.
pub fn sst_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let root = dir.join("sstables");
    for level in fs::read_dir(&root).unwrap().filter_map(|e| e.ok()) {
        if !level.path().is_dir() {
            continue;
        }
        for file in fs::read_dir(level.path()).unwrap().filter_map(|e| e.ok()) {
            let p = file.path();
            if p.extension().and_then(|s| s.to_str()) == Some("sst") {
                out.push(p);
            }
        }
    }
    out.sort();
    out
}

pub fn count_sst_files(dir: &Path) -> usize {
    sst_files(dir).len()
}

pub fn wal_segments(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = fs::read_dir(dir.join("wal"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("log"))
        .collect();
    out.sort();
    out
}

pub fn kv(key: &str, value: &str) -> (Vec<u8>, Vec<u8>) {
    (key.as_bytes().to_vec(), value.as_bytes().to_vec())
}
