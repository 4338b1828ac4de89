//! Immutable snapshot of the LSM shape.
//!
//! Readers clone the current `Arc<LsmState>` under a short read lock and then
//! work without holding any engine lock. Writers of the shape (freeze, flush,
//! compaction) build a modified copy and swap the pointer.

use memtable::Memtable;
use parking_lot::RwLock;
use sstable::SSTableReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A memtable that no longer accepts writes and waits to be flushed.
#[derive(Debug)]
pub(crate) struct FrozenMemtable {
    pub mem: Arc<RwLock<Memtable>>,
    /// First WAL segment not covered by this memtable. Segments below it can
    /// be purged once the memtable is on disk.
    pub wal_boundary: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct LsmState {
    /// Receives writes; only mutated under the engine's writer lock.
    pub active: Arc<RwLock<Memtable>>,
    /// Newest first.
    pub frozen: Vec<Arc<FrozenMemtable>>,
    /// `levels[0]` is newest first and may overlap; deeper levels hold
    /// non-overlapping tables in key order.
    pub levels: Vec<Vec<Arc<SSTableReader>>>,
}

impl LsmState {
    pub fn new(active: Memtable, levels: Vec<Vec<Arc<SSTableReader>>>) -> Self {
        Self {
            active: Arc::new(RwLock::new(active)),
            frozen: Vec::new(),
            levels,
        }
    }

    /// Every table, L0 first, in lookup order.
    pub fn tables(&self) -> impl Iterator<Item = (usize, &Arc<SSTableReader>)> {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(level, tables)| tables.iter().map(move |t| (level, t)))
    }

    /// Deepest level that holds at least one table.
    pub fn deepest_occupied(&self) -> Option<usize> {
        self.levels.iter().rposition(|tables| !tables.is_empty())
    }
}

/// On-disk locations under the data directory.
#[derive(Debug, Clone)]
pub(crate) struct DataDirs {
    pub root: PathBuf,
    pub wal: PathBuf,
    pub sst: PathBuf,
}

impl DataDirs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            wal: root.join("wal"),
            sst: root.join("sstables"),
        }
    }

    pub fn level_dir(&self, level: usize) -> PathBuf {
        self.sst.join(format!("L{}", level))
    }

    pub fn table_path(&self, level: usize, file_id: u64) -> PathBuf {
        self.level_dir(level).join(table_file_name(file_id))
    }
}

/// `42` -> `00000000000000000042.sst`.
pub(crate) fn table_file_name(file_id: u64) -> String {
    format!("{:020}.sst", file_id)
}

/// Base name of a table's file, as recorded in the manifest.
pub(crate) fn file_name_of(table: &SSTableReader) -> String {
    table
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
