//! # Engine - Strata Storage Engine
//!
//! The central orchestrator that ties together the [`memtable`], [`wal`] and
//! [`sstable`] crates into a complete LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────────┐
//! │                     ENGINE                        │
//! │                                                   │
//! │ write.rs → WAL append → active Memtable insert    │
//! │              |                                    │
//! │              |  (threshold exceeded?)             │
//! │              v                                    │
//! │           freeze → frozen Memtables (WAL rotated) │
//! │              |                                    │
//! │              v        worker.rs (or inline)       │
//! │           flush → new L0 SSTable, WAL purged      │
//! │              |                                    │
//! │              v                                    │
//! │ compaction.rs → size-tiered merge Ln → Ln+1       │
//! │                                                   │
//! │ read.rs → active → frozen → L0 → L1 → ... → Ln    │
//! │            (first match wins)                     │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                |
//! |----------------|--------------------------------------------------------|
//! | `lib.rs`       | `Engine` handle, open/close, accessors, `Debug`, `Drop` |
//! | [`recovery`]   | directory setup, manifest load, WAL replay             |
//! | [`write`]      | `put()`, `delete()`, freeze and flush                  |
//! | [`read`]       | `get()`, `scan()`                                      |
//! | [`compaction`] | `CompactionStrategy`, size-tiered picking, merges      |
//! | [`manifest`]   | persistent level membership (atomic rewrite)           |
//! | [`worker`]     | background flush/compaction thread                     |
//! | [`stats`]      | `EngineStats`                                          |
//!
//! ## On-disk layout
//!
//! ```text
//! <data>/wal/wal-000001.log ...          WAL segments
//! <data>/sstables/MANIFEST               level membership
//! <data>/sstables/L<n>/<file_id>.sst     immutable tables
//! ```
//!
//! ## Crash Safety
//!
//! Every write is appended to the WAL **before** the Memtable update. WAL
//! segments are only purged **after** the SSTable holding their records is
//! written and registered in the manifest. SSTables and the manifest are
//! written to a temp file, fsynced and renamed into place.

pub mod compaction;
mod error;
pub mod manifest;
mod read;
mod recovery;
mod state;
mod stats;
mod worker;
mod write;

use config::EngineConfig;
use crossbeam_channel::Sender;
use manifest::Manifest;
use parking_lot::{Mutex, RwLock};
use sstable::SSTableOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};
use wal::Wal;

pub use compaction::{CompactionStrategy, CompactionTask, SizeTieredStrategy};
pub use error::{EngineError, Result};
pub use stats::{EngineStats, LevelStats};

use state::{DataDirs, LsmState};
use worker::Task;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Frozen memtables allowed to queue up before a writer flushes one itself.
pub(crate) const MAX_FROZEN_MEMTABLES: usize = 4;

/// State guarded by the writer lock.
pub(crate) struct WriteState {
    pub wal: Wal,
    /// Last assigned sequence number.
    pub seq: u64,
}

/// Shared between the [`Engine`] handle and its background worker.
pub(crate) struct EngineInner {
    pub config: EngineConfig,
    pub dirs: DataDirs,
    /// Serializes WAL append + memtable insert.
    pub write: Mutex<WriteState>,
    pub state: RwLock<Arc<LsmState>>,
    /// One flush at a time, oldest frozen memtable first.
    pub flush_lock: Mutex<()>,
    /// One compaction at a time.
    pub compaction_lock: Mutex<()>,
    pub manifest: Mutex<Manifest>,
    pub next_file_id: AtomicU64,
    pub closed: AtomicBool,
    /// `None` when background work runs inline.
    pub tasks: Option<Sender<Task>>,
    pub strategy: Box<dyn CompactionStrategy>,
}

impl EngineInner {
    pub fn snapshot(&self) -> Arc<LsmState> {
        Arc::clone(&self.state.read())
    }

    pub fn allocate_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn sstable_options(&self) -> SSTableOptions {
        SSTableOptions {
            index_interval: self.config.sparse_index_interval,
            bloom_false_positive_rate: self.config.bloom_false_positive_rate,
        }
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

/// An open Strata database.
///
/// # Write Path
///
/// 1. Assign the next sequence number.
/// 2. Append the record to the WAL (durability gate).
/// 3. Insert into the active Memtable.
/// 4. If the Memtable reached `memtable_size_threshold`, freeze it and hand
///    it to the flusher.
///
/// # Read Path
///
/// Active Memtable, then frozen Memtables (newest first), then SSTables from
/// L0 to the deepest level. The first hit wins; a tombstone reads as absent.
///
/// # Concurrency
///
/// All methods take `&self`; share the engine across threads with `Arc`.
/// Writes are serialized, reads run against an immutable snapshot and never
/// wait for flushes or compactions.
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Opens (or creates) a database in `dir`, recovering any state left by
    /// a previous process.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create `wal/` and `sstables/L<n>/`, delete leftover temp files.
    /// 2. Load SSTables listed in the manifest (or bootstrap it from the
    ///    level directories); delete unlisted tables.
    /// 3. Replay every WAL segment into a fresh Memtable.
    /// 4. Resume sequence numbers after the highest one seen anywhere.
    /// 5. Start a new WAL segment and the background worker.
    ///
    /// # Errors
    ///
    /// Invalid configuration, I/O failure, a corrupt SSTable or manifest, or
    /// WAL corruption that is not a torn tail.
    pub fn open<P: AsRef<Path>>(dir: P, config: EngineConfig) -> Result<Self> {
        let (inner, tasks_rx) = recovery::open_inner(dir.as_ref(), config)?;
        let inner = Arc::new(inner);

        let worker = match tasks_rx {
            Some(rx) => Some(worker::spawn(Arc::clone(&inner), rx)?),
            None => None,
        };

        info!(
            dir = %inner.dirs.root.display(),
            seq = inner.write.lock().seq,
            tables = inner.snapshot().tables().count(),
            background = worker.is_some(),
            "engine opened"
        );

        Ok(Self {
            inner,
            worker: Mutex::new(worker),
        })
    }

    /// Stops the background worker, flushes every memtable and syncs the
    /// WAL. Further operations fail with [`EngineError::Closed`]. Calling
    /// `close` twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(tx) = &self.inner.tasks {
            let _ = tx.send(Task::Shutdown);
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("background worker panicked");
            }
        }

        self.inner.freeze_active()?;
        self.inner.flush_frozen()?;
        self.inner.write.lock().wal.sync()?;

        info!(dir = %self.inner.dirs.root.display(), "engine closed");
        Ok(())
    }

    /// Last assigned sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.inner.write.lock().seq
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.inner.dirs.root
    }

    /// Total number of SSTables across all levels.
    #[must_use]
    pub fn sstable_count(&self) -> usize {
        self.inner.snapshot().tables().count()
    }

    /// Number of SSTables in each level, L0 first.
    #[must_use]
    pub fn level_file_counts(&self) -> Vec<usize> {
        self.inner.snapshot().levels.iter().map(Vec::len).collect()
    }

    /// Memtables frozen but not yet flushed.
    #[must_use]
    pub fn frozen_memtable_count(&self) -> usize {
        self.inner.snapshot().frozen.len()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.snapshot();
        let active = snapshot.active.read();
        f.debug_struct("Engine")
            .field("dir", &self.inner.dirs.root)
            .field("memtable_size", &active.approx_size())
            .field("memtable_entries", &active.len())
            .field("frozen_memtables", &snapshot.frozen.len())
            .field(
                "level_files",
                &snapshot.levels.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Best-effort close on drop.
///
/// Errors are logged: anything not yet flushed is still in the WAL and will
/// be replayed on the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "close on drop failed");
        }
    }
}

#[cfg(test)]
mod tests;
