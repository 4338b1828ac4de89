//! Directory of numbered WAL segments.
//!
//! ```text
//! data/wal/
//!   wal-000001.log   <- sealed, covered by a frozen memtable
//!   wal-000002.log   <- sealed
//!   wal-000003.log   <- active, receives appends
//! ```
//!
//! Segment ids only grow. A memtable flush records the id returned by
//! [`Wal::rotate`] when the memtable was frozen; once its SSTable is durable,
//! every segment below that id can be deleted with [`Wal::purge_before`].

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{ReplayStats, WalError, WalReader, WalRecord, WalWriter};

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

/// File name for segment `id`, e.g. `wal-000042.log`.
pub fn segment_file_name(id: u64) -> String {
    format!("{}{:06}{}", SEGMENT_PREFIX, id, SEGMENT_SUFFIX)
}

pub(crate) fn parse_segment_id(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Segmented write-ahead log.
pub struct Wal {
    dir: PathBuf,
    writer: WalWriter,
    active_id: u64,
    max_segment_size: u64,
    sync: bool,
}

impl Wal {
    /// Opens the WAL directory and starts a fresh segment after the highest
    /// existing one. Existing segments are left untouched; replay them with
    /// [`Wal::replay_dir`] first.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        max_segment_size: u64,
        sync: bool,
    ) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let active_id = Self::segment_ids(&dir)?.last().map_or(1, |id| id + 1);
        let writer = WalWriter::create(dir.join(segment_file_name(active_id)), sync)?;
        sync_dir(&dir)?;

        info!(dir = %dir.display(), segment = active_id, "wal opened");
        Ok(Self {
            dir,
            writer,
            active_id,
            max_segment_size,
            sync,
        })
    }

    /// Replays every segment in `dir` in id order.
    ///
    /// A torn tail is tolerated in any segment: each restart seals the
    /// segment that was active at the time of the crash.
    pub fn replay_dir<P, F>(dir: P, mut apply: F) -> Result<ReplayStats, WalError>
    where
        P: AsRef<Path>,
        F: FnMut(WalRecord),
    {
        let dir = dir.as_ref();
        let mut total = ReplayStats::default();
        if !dir.exists() {
            return Ok(total);
        }

        for id in Self::segment_ids(dir)? {
            let path = dir.join(segment_file_name(id));
            let stats = WalReader::open(&path)?.replay(&mut apply).map_err(|e| {
                tracing::error!(segment = %path.display(), error = %e, "wal replay failed");
                e
            })?;
            if stats.torn_tail {
                warn!(
                    segment = %path.display(),
                    valid_bytes = stats.valid_bytes,
                    "ignoring torn tail in wal segment"
                );
            }
            debug!(segment = id, records = stats.records, "replayed wal segment");
            total.records += stats.records;
            total.valid_bytes += stats.valid_bytes;
            total.torn_tail |= stats.torn_tail;
        }
        Ok(total)
    }

    /// Appends a record, first rotating if the active segment has reached its
    /// size bound.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        if self.max_segment_size > 0 && self.writer.len() >= self.max_segment_size {
            self.rotate()?;
        }
        self.writer.append(record)
    }

    /// Seals the active segment and starts a new one. Returns the new
    /// segment's id: every record appended before this call lives in a
    /// segment with a smaller id.
    pub fn rotate(&mut self) -> Result<u64, WalError> {
        if !self.sync {
            self.writer.sync_to_disk()?;
        }
        let next_id = self.active_id + 1;
        let writer = WalWriter::create(self.dir.join(segment_file_name(next_id)), self.sync)?;
        sync_dir(&self.dir)?;

        self.writer = writer;
        self.active_id = next_id;
        debug!(segment = next_id, "wal rotated");
        Ok(next_id)
    }

    /// Deletes every segment with an id below `boundary`. Returns how many
    /// were removed.
    pub fn purge_before<P: AsRef<Path>>(dir: P, boundary: u64) -> Result<usize, WalError> {
        let dir = dir.as_ref();
        let mut removed = 0;
        for id in Self::segment_ids(dir)? {
            if id >= boundary {
                break;
            }
            fs::remove_file(dir.join(segment_file_name(id)))?;
            removed += 1;
        }
        if removed > 0 {
            sync_dir(dir)?;
            debug!(boundary, removed, "purged wal segments");
        }
        Ok(removed)
    }

    /// Sorted ids of the segments present in `dir`.
    pub fn segment_ids<P: AsRef<Path>>(dir: P) -> Result<Vec<u64>, WalError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(parse_segment_id) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Forces the active segment to disk.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.sync_to_disk()
    }

    pub fn active_segment(&self) -> u64 {
        self.active_id
    }

    /// Size of the active segment in bytes.
    pub fn active_segment_len(&self) -> u64 {
        self.writer.len()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("active_id", &self.active_id)
            .field("max_segment_size", &self.max_segment_size)
            .field("sync", &self.sync)
            .finish()
    }
}

/// Persists directory entries (new or removed segment files).
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
