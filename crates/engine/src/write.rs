//! Write path: `put()`, `delete()`, `flush()`, and the freeze/flush
//! machinery shared with the background worker.
//!
//! Each write is appended to the WAL first, then applied to the active
//! Memtable. A Memtable that reaches the flush threshold is frozen: the WAL
//! rotates so that the frozen Memtable's records all live in older segments,
//! and a fresh Memtable takes its place. Flushing writes the oldest frozen
//! Memtable to an L0 SSTable, registers it, and purges the covered segments.

use memtable::Memtable;
use parking_lot::RwLock;
use sstable::{SSTableReader, SSTableWriter};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use wal::{Wal, WalRecord};

use crate::error::{EngineError, Result};
use crate::state::{table_file_name, FrozenMemtable};
use crate::worker::Task;
use crate::{Engine, EngineInner, WriteState, MAX_FROZEN_MEMTABLES, MAX_KEY_SIZE, MAX_VALUE_SIZE};

impl Engine {
    /// Inserts or overwrites `key`.
    ///
    /// Returns once the record is in the WAL (and on disk, with `wal_sync`)
    /// and visible to readers.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidArgument`] for an empty or oversized key or
    /// value; I/O errors from the WAL, in which case the write did not
    /// happen. Once the WAL append succeeds the write is applied, and a
    /// failed freeze or flush after it is logged rather than returned.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.inner.ensure_open()?;
        validate_key(&key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(EngineError::InvalidArgument(format!(
                "value too large: {} bytes (max {})",
                value.len(),
                MAX_VALUE_SIZE
            )));
        }
        self.inner.write_entry(key, Some(value))
    }

    /// Deletes `key` by writing a tombstone. Deleting an absent key is not
    /// an error.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.inner.ensure_open()?;
        validate_key(&key)?;
        self.inner.write_entry(key, None)
    }

    /// Forces the active Memtable (and any frozen ones) to SSTables now.
    ///
    /// A no-op when nothing is buffered. Compaction checks triggered by the
    /// new tables run afterwards, on the worker or inline.
    pub fn flush(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.freeze_active()?;
        if self.inner.flush_frozen()? > 0 {
            self.inner.schedule_compaction();
        }
        Ok(())
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(EngineError::InvalidArgument("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(EngineError::InvalidArgument(format!(
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

impl EngineInner {
    fn write_entry(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        let frozen_count = {
            let mut w = self.write.lock();
            let seq = w.seq.checked_add(1).ok_or(EngineError::SequenceOverflow)?;
            let record = match value {
                Some(value) => WalRecord::Put { seq, key, value },
                None => WalRecord::Del { seq, key },
            };

            w.wal.append(&record)?;
            w.seq = seq;

            let active = Arc::clone(&self.state.read().active);
            let full = {
                let mut mem = active.write();
                match record {
                    WalRecord::Put { seq, key, value } => mem.put(key, value, seq),
                    WalRecord::Del { seq, key } => mem.delete(key, seq),
                }
                mem.approx_size() >= self.config.memtable_size_threshold
            };

            if !full {
                return Ok(());
            }
            // the write is committed from here on; freeze and flush failures
            // are retried on the next threshold crossing, flush or tick
            match self.freeze_locked(&mut w) {
                Ok(frozen) => frozen,
                Err(e) => {
                    error!(error = %e, "failed to freeze full memtable");
                    return Ok(());
                }
            }
        };

        match &self.tasks {
            Some(tx) if frozen_count <= MAX_FROZEN_MEMTABLES => {
                // a full queue already holds a flush that drains every frozen memtable
                let _ = tx.try_send(Task::Flush);
            }
            _ => match self.flush_frozen() {
                Ok(_) => self.schedule_compaction(),
                Err(e) => error!(error = %e, frozen = frozen_count, "inline flush failed"),
            },
        }
        Ok(())
    }

    /// Freezes the active Memtable if it holds anything.
    pub(crate) fn freeze_active(&self) -> Result<()> {
        let mut w = self.write.lock();
        self.freeze_locked(&mut w)?;
        Ok(())
    }

    /// Swaps in an empty Memtable and rotates the WAL. Returns the number of
    /// frozen Memtables afterwards. Caller holds the writer lock.
    fn freeze_locked(&self, w: &mut WriteState) -> Result<usize> {
        let mut state = self.state.write();
        if state.active.read().is_empty() {
            return Ok(state.frozen.len());
        }

        let wal_boundary = w.wal.rotate()?;
        let mut next = (**state).clone();
        let old = std::mem::replace(&mut next.active, Arc::new(RwLock::new(Memtable::new())));
        next.frozen.insert(
            0,
            Arc::new(FrozenMemtable {
                mem: old,
                wal_boundary,
            }),
        );
        let frozen = next.frozen.len();
        *state = Arc::new(next);

        debug!(wal_boundary, frozen, "memtable frozen");
        Ok(frozen)
    }

    /// Flushes frozen Memtables, oldest first, until none are left. Returns
    /// how many were written.
    pub(crate) fn flush_frozen(&self) -> Result<usize> {
        let mut flushed = 0;
        while self.flush_oldest()? {
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Writes the oldest frozen Memtable to a new L0 SSTable.
    ///
    /// # Steps
    ///
    /// 1. Write `sstables/L0/<file_id>.sst` (temp file + rename).
    /// 2. Save a manifest listing the new table.
    /// 3. Swap in a state with the table in L0 and the Memtable gone.
    /// 4. Purge the WAL segments the Memtable covered.
    ///
    /// A failure before step 3 leaves the Memtable frozen, to be retried.
    fn flush_oldest(&self) -> Result<bool> {
        let _flush = self.flush_lock.lock();
        let frozen = match self.snapshot().frozen.last() {
            Some(f) => Arc::clone(f),
            None => return Ok(false),
        };

        let table = {
            let mem = frozen.mem.read();
            if mem.is_empty() {
                None
            } else {
                let file_id = self.allocate_file_id();
                let path = self.dirs.table_path(0, file_id);
                let info = SSTableWriter::write_from_memtable(&path, &mem, self.sstable_options())?;
                let reader = SSTableReader::open(&path).map_err(|e| {
                    let _ = std::fs::remove_file(&path);
                    e
                })?;
                info!(
                    file = %path.display(),
                    entries = info.entry_count,
                    bytes = info.file_size,
                    "memtable flushed"
                );
                Some((file_id, Arc::new(reader)))
            }
        };

        {
            let mut manifest = self.manifest.lock();
            if let Some((file_id, reader)) = &table {
                let mut next = manifest.clone();
                next.add(0, table_file_name(*file_id));
                if let Err(e) = next.save() {
                    error!(error = %e, "manifest update after flush failed");
                    reader.mark_obsolete();
                    return Err(e);
                }
                *manifest = next;
            }

            let mut state = self.state.write();
            let mut next = (**state).clone();
            next.frozen.retain(|f| !Arc::ptr_eq(f, &frozen));
            if let Some((_, reader)) = table {
                next.levels[0].insert(0, reader);
            }
            *state = Arc::new(next);
        }

        match Wal::purge_before(&self.dirs.wal, frozen.wal_boundary) {
            Ok(purged) => debug!(purged, boundary = frozen.wal_boundary, "wal segments purged"),
            // replay skips records already in sstables; the next purge retries
            Err(e) => warn!(error = %e, "failed to purge wal segments"),
        }
        Ok(true)
    }

    /// Queues a compaction check on the worker, or runs it inline.
    pub(crate) fn schedule_compaction(&self) {
        match &self.tasks {
            Some(tx) => {
                let _ = tx.try_send(Task::Compact);
            }
            None => self.run_pending_compactions(),
        }
    }
}
