//! Cold-start path: directory setup, level metadata, WAL replay.

use config::EngineConfig;
use crossbeam_channel::{bounded, Receiver};
use memtable::Memtable;
use parking_lot::{Mutex, RwLock};
use sstable::SSTableReader;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wal::{Wal, WalRecord};

use crate::compaction::SizeTieredStrategy;
use crate::error::{EngineError, Result};
use crate::manifest::Manifest;
use crate::state::{file_name_of, DataDirs, LsmState};
use crate::worker::{Task, TASK_QUEUE_CAPACITY};
use crate::{EngineInner, WriteState};

type Levels = Vec<Vec<Arc<SSTableReader>>>;

/// Builds the engine state from whatever `root` holds. Returns the task
/// receiver for the worker when background work is enabled.
pub(crate) fn open_inner(root: &Path, config: EngineConfig) -> Result<(EngineInner, Option<Receiver<Task>>)> {
    config.validate()?;
    let dirs = DataDirs::new(root);

    fs::create_dir_all(&dirs.wal)?;
    for level in 0..config.max_levels {
        fs::create_dir_all(dirs.level_dir(level))?;
    }
    cleanup_tmp_files(&dirs, config.max_levels);

    let (manifest, levels) = match Manifest::load(&dirs.sst)? {
        Some(manifest) => {
            let levels = load_from_manifest(&dirs, &manifest, config.max_levels)?;
            delete_orphans(&dirs, &manifest, config.max_levels);
            (manifest, levels)
        }
        None => bootstrap_manifest(&dirs, config.max_levels)?,
    };

    let tables = levels.iter().flatten();
    let max_table_seq = tables.clone().map(|t| t.max_seq()).max().unwrap_or(0);
    let next_file_id = tables.map(|t| t.file_id()).max().unwrap_or(0) + 1;

    // records at or below max_table_seq were flushed before a purge completed
    let mut mem = Memtable::new();
    let mut max_wal_seq = 0u64;
    let mut skipped = 0u64;
    let stats = Wal::replay_dir(&dirs.wal, |record| {
        max_wal_seq = max_wal_seq.max(record.seq());
        if record.seq() <= max_table_seq {
            skipped += 1;
            return;
        }
        match record {
            WalRecord::Put { seq, key, value } => mem.put(key, value, seq),
            WalRecord::Del { seq, key } => mem.delete(key, seq),
        }
    })?;
    info!(
        records = stats.records,
        skipped,
        recovered = mem.len(),
        torn_tail = stats.torn_tail,
        "wal replayed"
    );

    let seq = max_wal_seq.max(max_table_seq);
    let wal = Wal::open(&dirs.wal, config.wal_segment_max_size, config.wal_sync)?;

    let (tasks, rx) = if config.background_work {
        let (tx, rx) = bounded(TASK_QUEUE_CAPACITY);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let inner = EngineInner {
        dirs,
        write: Mutex::new(WriteState { wal, seq }),
        state: RwLock::new(Arc::new(LsmState::new(mem, levels))),
        flush_lock: Mutex::new(()),
        compaction_lock: Mutex::new(()),
        manifest: Mutex::new(manifest),
        next_file_id: AtomicU64::new(next_file_id),
        closed: AtomicBool::new(false),
        tasks,
        strategy: Box::new(SizeTieredStrategy),
        config,
    };
    Ok((inner, rx))
}

/// Opens every table the manifest lists. A listed table that is missing or
/// fails validation aborts the open.
fn load_from_manifest(dirs: &DataDirs, manifest: &Manifest, max_levels: usize) -> Result<Levels> {
    if let Some(level) = manifest.max_level().filter(|l| *l >= max_levels) {
        return Err(EngineError::Manifest(format!(
            "manifest references L{} but the engine is configured for {} levels",
            level, max_levels
        )));
    }

    let mut levels: Levels = vec![Vec::new(); max_levels];
    for entry in &manifest.entries {
        let path = dirs.level_dir(entry.level).join(&entry.filename);
        if !path.exists() {
            return Err(EngineError::Manifest(format!(
                "table {} listed in manifest is missing",
                path.display()
            )));
        }
        let table = SSTableReader::open(&path)?;
        debug!(file = %path.display(), level = entry.level, entries = table.entry_count(), "sstable loaded");
        levels[entry.level].push(Arc::new(table));
    }
    Ok(levels)
}

/// Rebuilds level metadata from the `L<n>` directories when there is no
/// manifest, then writes one.
fn bootstrap_manifest(dirs: &DataDirs, max_levels: usize) -> Result<(Manifest, Levels)> {
    let mut manifest = Manifest::new(&dirs.sst);
    let mut levels: Levels = vec![Vec::new(); max_levels];

    for (level, tables) in levels.iter_mut().enumerate() {
        for path in sst_files(&dirs.level_dir(level))? {
            tables.push(Arc::new(SSTableReader::open(&path)?));
        }
        if level == 0 {
            tables.sort_by_key(|t| std::cmp::Reverse(t.file_id()));
        } else {
            tables.sort_by(|a, b| a.min_key().cmp(b.min_key()));
        }
        for table in tables.iter() {
            manifest.push_back(level, file_name_of(table));
        }
    }

    if !manifest.entries.is_empty() {
        warn!(tables = manifest.entries.len(), "no manifest found, rebuilt from level directories");
    }
    manifest.save()?;
    Ok((manifest, levels))
}

/// Deletes tables present on disk but absent from the manifest: outputs of a
/// flush or compaction that crashed before registering them, or inputs whose
/// deletion was interrupted.
fn delete_orphans(dirs: &DataDirs, manifest: &Manifest, max_levels: usize) {
    for level in 0..max_levels {
        let files = match sst_files(&dirs.level_dir(level)) {
            Ok(files) => files,
            Err(_) => continue,
        };
        for path in files {
            let listed = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| manifest.contains(level, name));
            if !listed {
                warn!(file = %path.display(), "deleting sstable not listed in manifest");
                let _ = fs::remove_file(&path);
            }
        }
    }
}

/// Removes leftover `.sst.tmp` files and the manifest temp file.
fn cleanup_tmp_files(dirs: &DataDirs, max_levels: usize) {
    for level in 0..max_levels {
        if let Ok(entries) = fs::read_dir(dirs.level_dir(level)) {
            for entry in entries.flatten() {
                let p = entry.path();
                if p.to_string_lossy().ends_with(".sst.tmp") {
                    debug!(file = %p.display(), "removing interrupted table write");
                    let _ = fs::remove_file(&p);
                }
            }
        }
    }
    let _ = fs::remove_file(dirs.sst.join("MANIFEST.tmp"));
}

fn sst_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "sst"))
        .collect();
    paths.sort();
    Ok(paths)
}
