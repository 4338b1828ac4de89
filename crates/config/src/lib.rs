//! # Config - Strata engine tunables
//!
//! [`EngineConfig`] collects every knob the engine reads: memtable flush
//! threshold, WAL segment size and sync policy, compaction triggers and
//! level sizing, SSTable index/bloom parameters, and whether background
//! work runs on a worker thread.
//!
//! ## Environment overrides
//!
//! ```text
//! STRATA_FLUSH_KB               memtable flush threshold in KiB   (default: 4096)
//! STRATA_WAL_SEGMENT_KB         WAL segment rotation size in KiB  (default: 16384)
//! STRATA_WAL_SYNC               fsync every WAL append            (default: true)
//! STRATA_L0_TRIGGER             L0 compaction trigger             (default: 4, 0 = disabled)
//! STRATA_COMPACTION_INTERVAL_MS periodic compaction check          (default: 10000, 0 = disabled)
//! STRATA_BACKGROUND             run flush/compaction on a worker  (default: true)
//! ```
//!
//! Unset or unparseable variables keep their defaults.

use std::time::Duration;
use thiserror::Error;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Rejected configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Engine tunables. Construct with [`EngineConfig::default`] and override
/// fields as needed, or start from [`EngineConfig::from_env`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Memtable size (keys + values, bytes) that triggers a flush.
    pub memtable_size_threshold: usize,
    /// WAL segment size that triggers rotation. 0 disables size-based rotation.
    pub wal_segment_max_size: u64,
    /// fsync every WAL append before acknowledging the write.
    pub wal_sync: bool,
    /// Number of L0 tables that triggers an L0 -> L1 compaction. 0 disables
    /// automatic compaction.
    pub l0_compaction_trigger: usize,
    /// Size bound of L1 in bytes.
    pub level_base_size: u64,
    /// Each level below L1 may hold this many times the previous one.
    pub level_size_multiplier: u64,
    /// Number of levels, L0 included. The last level never compacts further.
    pub max_levels: usize,
    /// Compaction output files are cut once they reach this many bytes.
    pub target_file_size: u64,
    /// One sparse index entry per this many SSTable records.
    pub sparse_index_interval: usize,
    /// Target false positive rate of each SSTable's bloom filter.
    pub bloom_false_positive_rate: f64,
    /// Period of the background compaction check. 0 disables it.
    pub compaction_interval_ms: u64,
    /// Run flushes and compactions on a worker thread. When false they run
    /// inline on the thread that triggered them.
    pub background_work: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memtable_size_threshold: 4 * MIB,
            wal_segment_max_size: 16 * MIB as u64,
            wal_sync: true,
            l0_compaction_trigger: 4,
            level_base_size: 10 * MIB as u64,
            level_size_multiplier: 10,
            max_levels: 7,
            target_file_size: 2 * MIB as u64,
            sparse_index_interval: 100,
            bloom_false_positive_rate: 0.01,
            compaction_interval_ms: 10_000,
            background_work: true,
        }
    }
}

impl EngineConfig {
    /// Defaults with `STRATA_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup` (an environment-like key -> value
    /// source). Values that fail to parse are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring unparseable override");
                    None
                }
            }
        }

        if let Some(kb) = parsed::<usize>(&lookup, "STRATA_FLUSH_KB") {
            self.memtable_size_threshold = kb.saturating_mul(KIB);
        }
        if let Some(kb) = parsed::<u64>(&lookup, "STRATA_WAL_SEGMENT_KB") {
            self.wal_segment_max_size = kb.saturating_mul(KIB as u64);
        }
        if let Some(sync) = parsed(&lookup, "STRATA_WAL_SYNC") {
            self.wal_sync = sync;
        }
        if let Some(trigger) = parsed(&lookup, "STRATA_L0_TRIGGER") {
            self.l0_compaction_trigger = trigger;
        }
        if let Some(ms) = parsed(&lookup, "STRATA_COMPACTION_INTERVAL_MS") {
            self.compaction_interval_ms = ms;
        }
        if let Some(background) = parsed(&lookup, "STRATA_BACKGROUND") {
            self.background_work = background;
        }
        self
    }

    /// Checks that every field is usable.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.memtable_size_threshold == 0 {
            return invalid("memtable_size_threshold", "must be greater than zero");
        }
        if self.sparse_index_interval == 0 {
            return invalid("sparse_index_interval", "must be greater than zero");
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return invalid("bloom_false_positive_rate", "must be in (0, 1)");
        }
        if self.max_levels < 2 {
            return invalid("max_levels", "need at least L0 and L1");
        }
        if self.level_base_size == 0 {
            return invalid("level_base_size", "must be greater than zero");
        }
        if self.level_size_multiplier < 2 {
            return invalid("level_size_multiplier", "must be at least 2");
        }
        if self.target_file_size == 0 {
            return invalid("target_file_size", "must be greater than zero");
        }
        Ok(())
    }

    /// Size bound of `level` (>= 1): `level_base_size * multiplier^(level - 1)`.
    /// Saturates instead of overflowing for deep levels.
    pub fn level_max_bytes(&self, level: usize) -> u64 {
        let exp = level.saturating_sub(1).min(u32::MAX as usize) as u32;
        self.level_size_multiplier
            .checked_pow(exp)
            .and_then(|m| m.checked_mul(self.level_base_size))
            .unwrap_or(u64::MAX)
    }

    /// The periodic compaction check interval, if enabled.
    pub fn compaction_interval(&self) -> Option<Duration> {
        (self.compaction_interval_ms > 0).then(|| Duration::from_millis(self.compaction_interval_ms))
    }
}

#[cfg(test)]
mod tests;
