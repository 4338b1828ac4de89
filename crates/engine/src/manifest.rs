//! # Manifest - SSTable level metadata
//!
//! Records which SSTable files belong to which level, and their order within
//! the level, so the engine can rebuild its LSM shape after a restart.
//!
//! ## File format
//!
//! `data/sstables/MANIFEST`, one table per line, newest first within a level:
//!
//! ```text
//! # Strata SSTable Manifest
//! # Format: L<level>:<filename>
//! L0:00000000000000000007.sst
//! L0:00000000000000000006.sst
//! L1:00000000000000000004.sst
//! L1:00000000000000000005.sst
//! ```
//!
//! Lines starting with `#` and blank lines are ignored.
//!
//! ## Crash safety
//!
//! The manifest is rewritten whole: written to `MANIFEST.tmp`, fsynced, then
//! renamed over the old file. A table exists for the engine only once a
//! manifest naming it has been renamed into place.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Name of the manifest file within the SSTable directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Level assignment of one SSTable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstMeta {
    /// Base name inside `L<level>/`.
    pub filename: String,
    pub level: usize,
}

/// In-memory copy of the manifest. Edits are local until [`save`](Manifest::save).
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    pub entries: Vec<SstMeta>,
}

impl Manifest {
    /// An empty manifest that will be written to `sst_dir/MANIFEST`.
    pub fn new(sst_dir: &Path) -> Self {
        Self {
            path: sst_dir.join(MANIFEST_FILENAME),
            entries: Vec::new(),
        }
    }

    /// Loads `sst_dir/MANIFEST`, or `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// [`EngineError::Manifest`] if the file exists but cannot be parsed.
    pub fn load(sst_dir: &Path) -> Result<Option<Self>> {
        let path = sst_dir.join(MANIFEST_FILENAME);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            entries.push(parse_line(trimmed).map_err(|reason| {
                EngineError::Manifest(format!("line {}: {}: {}", line_num + 1, reason, trimmed))
            })?);
        }

        Ok(Some(Self { path, entries }))
    }

    /// Atomically replaces the manifest on disk with this copy.
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            self.write_contents(&mut f)?;
            f.flush()?;
            f.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(EngineError::Manifest(format!(
                "failed to install {}: {}",
                self.path.display(),
                e
            )));
        }
        if let Some(dir) = self.path.parent() {
            if let Ok(d) = File::open(dir) {
                let _ = d.sync_all();
            }
        }
        Ok(())
    }

    fn write_contents(&self, f: &mut File) -> Result<()> {
        let mut buf = String::with_capacity(64 + self.entries.len() * 32);
        buf.push_str("# Strata SSTable Manifest\n");
        buf.push_str("# Format: L<level>:<filename>\n");
        for entry in &self.entries {
            buf.push_str(&format!("L{}:{}\n", entry.level, entry.filename));
        }
        f.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// File names of `level` in manifest order.
    pub fn level_files(&self, level: usize) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.filename.as_str())
            .collect()
    }

    /// Deepest level mentioned, if any.
    pub fn max_level(&self) -> Option<usize> {
        self.entries.iter().map(|e| e.level).max()
    }

    pub fn contains(&self, level: usize, filename: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.level == level && e.filename == filename)
    }

    /// Adds a table in front of the other tables of its level (newest first).
    pub fn add(&mut self, level: usize, filename: String) {
        let at = self
            .entries
            .iter()
            .position(|e| e.level >= level)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, SstMeta { filename, level });
    }

    /// Appends a table after the other tables of its level.
    pub fn push_back(&mut self, level: usize, filename: String) {
        let at = self
            .entries
            .iter()
            .position(|e| e.level > level)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, SstMeta { filename, level });
    }

    /// Drops every entry matching one of `tables`.
    pub fn remove(&mut self, tables: &[(usize, String)]) {
        self.entries
            .retain(|e| !tables.iter().any(|(l, f)| *l == e.level && *f == e.filename));
    }
}

fn parse_line(line: &str) -> std::result::Result<SstMeta, &'static str> {
    let (level, filename) = line
        .split_once(':')
        .ok_or("invalid format (expected 'L<n>:<filename>')")?;
    let level = level
        .strip_prefix('L')
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or("invalid level")?;
    if filename.is_empty() || filename.contains('/') || filename.contains('\\') {
        return Err("invalid file name");
    }
    Ok(SstMeta {
        filename: filename.to_string(),
        level,
    })
}
