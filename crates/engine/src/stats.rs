use crate::Engine;

/// Per-level totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub files: usize,
    pub bytes: u64,
    /// Records, tombstones and shadowed versions included.
    pub entries: u64,
}

/// Point-in-time engine counters, as shown by the `stats` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// One entry per configured level, L0 first.
    pub levels: Vec<LevelStats>,
    /// SSTable records plus Memtable entries. Versions shadowed by newer
    /// ones are counted until compaction removes them.
    pub total_keys: u64,
    /// Tombstones in Memtables and SSTables.
    pub tombstones: u64,
    /// Approximate bytes in the active Memtable.
    pub memtable_bytes: usize,
    pub memtable_entries: usize,
    /// Frozen Memtables waiting for a flush.
    pub frozen_memtables: usize,
    /// Last assigned sequence number.
    pub last_seq: u64,
    /// WAL segment files on disk.
    pub wal_segments: usize,
}

impl EngineStats {
    pub fn sstable_count(&self) -> usize {
        self.levels.iter().map(|l| l.files).sum()
    }

    pub fn sstable_bytes(&self) -> u64 {
        self.levels.iter().map(|l| l.bytes).sum()
    }
}

impl Engine {
    /// Collects [`EngineStats`] from a state snapshot.
    pub fn stats(&self) -> crate::Result<EngineStats> {
        self.inner.ensure_open()?;
        let last_seq = self.inner.write.lock().seq;
        let snapshot = self.inner.snapshot();

        let mut stats = EngineStats {
            last_seq,
            frozen_memtables: snapshot.frozen.len(),
            wal_segments: wal::Wal::segment_ids(&self.inner.dirs.wal)?.len(),
            ..EngineStats::default()
        };

        {
            let active = snapshot.active.read();
            stats.memtable_bytes = active.approx_size();
            stats.memtable_entries = active.len();
            stats.total_keys += active.len() as u64;
            stats.tombstones += active.tombstone_count() as u64;
        }
        for frozen in &snapshot.frozen {
            let mem = frozen.mem.read();
            stats.total_keys += mem.len() as u64;
            stats.tombstones += mem.tombstone_count() as u64;
        }

        for tables in &snapshot.levels {
            let level = LevelStats {
                files: tables.len(),
                bytes: tables.iter().map(|t| t.file_size()).sum(),
                entries: tables.iter().map(|t| t.entry_count()).sum(),
            };
            stats.total_keys += level.entries;
            stats.tombstones += tables.iter().map(|t| t.tombstone_count()).sum::<u64>();
            stats.levels.push(level);
        }
        Ok(stats)
    }
}
