//! Compaction: merges SSTables into the next level down.
//!
//! A [`CompactionStrategy`] decides *what* to merge; this module performs the
//! merge. Inputs are streamed through a [`MergeIterator`] so memory stays
//! bounded by one record per input plus the output's index and bloom filter.
//! Outputs are cut at `target_file_size` and registered in a single manifest
//! update; inputs are retired afterwards and their files deleted once no
//! reader holds them.
//!
//! ## Size-tiered policy
//!
//! ```text
//! L0  count >= l0_compaction_trigger           -> merge L0 + L1 into L1
//! Ln  bytes >  base * multiplier^(n-1), n >= 1 -> merge Ln + Ln+1 into Ln+1
//! ```
//!
//! The last level never compacts further. Tombstones are dropped only when
//! no level below the target holds any table, so no older version can
//! resurface.

use config::EngineConfig;
use sstable::{MergeIterator, MergeSource, SSTableBuilder, SSTableReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::state::file_name_of;
use crate::{Engine, EngineInner};

/// One merge job.
#[derive(Debug, Clone)]
pub struct CompactionTask {
    /// Level whose size or count triggered the job.
    pub level: usize,
    /// Level that receives the output.
    pub target_level: usize,
    /// `(level, table)` pairs, newest first.
    pub inputs: Vec<(usize, Arc<SSTableReader>)>,
    /// Whether tombstones can be discarded instead of written out.
    pub drop_tombstones: bool,
}

/// Chooses the next compaction, if any.
pub trait CompactionStrategy: Send + Sync {
    /// `levels[0]` is newest first; deeper levels are in key order.
    fn pick(&self, levels: &[Vec<Arc<SSTableReader>>], config: &EngineConfig) -> Option<CompactionTask>;
}

/// Count-triggered L0, size-triggered deeper levels. See the module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SizeTieredStrategy;

impl CompactionStrategy for SizeTieredStrategy {
    fn pick(&self, levels: &[Vec<Arc<SSTableReader>>], config: &EngineConfig) -> Option<CompactionTask> {
        let trigger = config.l0_compaction_trigger;
        if trigger == 0 || levels.len() < 2 {
            return None;
        }

        if levels[0].len() >= trigger {
            return Some(merge_into_next(levels, 0));
        }

        for level in 1..levels.len() - 1 {
            let bytes: u64 = levels[level].iter().map(|t| t.file_size()).sum();
            if bytes > config.level_max_bytes(level) {
                return Some(merge_into_next(levels, level));
            }
        }
        None
    }
}

fn merge_into_next(levels: &[Vec<Arc<SSTableReader>>], level: usize) -> CompactionTask {
    let target_level = level + 1;
    let inputs = [level, target_level]
        .into_iter()
        .flat_map(|l| levels[l].iter().map(move |t| (l, Arc::clone(t))))
        .collect();
    CompactionTask {
        level,
        target_level,
        inputs,
        drop_tombstones: levels[target_level + 1..].iter().all(Vec::is_empty),
    }
}

impl Engine {
    /// Forces a full compaction: every SSTable of every level is merged into
    /// one sorted run at the deepest occupied level (at least L1). Since
    /// nothing older remains, tombstones are dropped.
    ///
    /// Memtables are not flushed first; call [`flush`](Engine::flush) for
    /// that.
    pub fn compact(&self) -> Result<()> {
        self.inner.ensure_open()?;
        let _compaction = self.inner.compaction_lock.lock();

        let snapshot = self.inner.snapshot();
        let inputs: Vec<_> = snapshot.tables().map(|(l, t)| (l, Arc::clone(t))).collect();
        if inputs.is_empty() {
            return Ok(());
        }
        let target_level = snapshot.deepest_occupied().unwrap_or(0).max(1);

        self.inner.run_compaction(CompactionTask {
            level: 0,
            target_level,
            inputs,
            drop_tombstones: true,
        })
    }
}

impl EngineInner {
    /// Runs strategy-picked compactions until none is due. Failures are
    /// logged and left for the next check.
    pub(crate) fn run_pending_compactions(&self) {
        // each round moves data down a level, so this terminates well before
        for _ in 0..self.config.max_levels * 4 {
            match self.compact_once() {
                Ok(true) => continue,
                Ok(false) => return,
                Err(e) => {
                    error!(error = %e, "compaction failed, will retry");
                    return;
                }
            }
        }
    }

    /// Runs one picked compaction. Returns whether there was one.
    fn compact_once(&self) -> Result<bool> {
        let _compaction = self.compaction_lock.lock();
        let snapshot = self.snapshot();
        match self.strategy.pick(&snapshot.levels, &self.config) {
            Some(task) => {
                self.run_compaction(task)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Merges `task.inputs` into new tables at `task.target_level` and swaps
    /// them in. Caller holds `compaction_lock`.
    ///
    /// On failure no input is touched: partial outputs are deleted and the
    /// manifest and level state stay as they were.
    fn run_compaction(&self, task: CompactionTask) -> Result<()> {
        let input_bytes: u64 = task.inputs.iter().map(|(_, t)| t.file_size()).sum();
        let input_entries: u64 = task.inputs.iter().map(|(_, t)| t.entry_count()).sum();
        info!(
            level = task.level,
            target = task.target_level,
            inputs = task.inputs.len(),
            bytes = input_bytes,
            "compaction started"
        );

        let sources = task
            .inputs
            .iter()
            .map(|(_, t)| t.iter().map(|it| Box::new(it) as MergeSource<'static>))
            .collect::<sstable::Result<Vec<_>>>()?;

        // size each output's bloom filter for its share of the input
        let per_file = if input_bytes > self.config.target_file_size {
            (input_entries as u128 * self.config.target_file_size as u128 / input_bytes as u128) as usize + 1
        } else {
            input_entries as usize
        };

        let mut written = Vec::new();
        let outputs = match self.write_outputs(MergeIterator::new(sources), &task, per_file, &mut written) {
            Ok(outputs) => outputs,
            Err(e) => {
                for path in &written {
                    let _ = std::fs::remove_file(path);
                }
                return Err(e);
            }
        };

        self.install(&task, outputs)?;
        for (_, table) in &task.inputs {
            table.mark_obsolete();
        }
        Ok(())
    }

    /// Streams the merge into size-capped tables. Paths of finished tables
    /// are pushed to `written` as they complete so the caller can clean up.
    fn write_outputs(
        &self,
        merge: MergeIterator<'_>,
        task: &CompactionTask,
        per_file: usize,
        written: &mut Vec<PathBuf>,
    ) -> Result<Vec<Arc<SSTableReader>>> {
        let mut outputs = Vec::new();
        let mut builder: Option<SSTableBuilder> = None;
        let mut dropped = 0u64;

        for item in merge {
            let (key, entry) = item?;
            if task.drop_tombstones && entry.is_tombstone() {
                dropped += 1;
                continue;
            }

            if builder.is_none() {
                let path = self.dirs.table_path(task.target_level, self.allocate_file_id());
                builder = Some(SSTableBuilder::create(&path, per_file, self.sstable_options())?);
            }
            let mut full = false;
            if let Some(b) = builder.as_mut() {
                b.add(&key, &entry)?;
                full = b.data_size() >= self.config.target_file_size;
            }
            if full {
                if let Some(b) = builder.take() {
                    outputs.push(self.finish_output(b, written)?);
                }
            }
        }
        if let Some(b) = builder.take() {
            outputs.push(self.finish_output(b, written)?);
        }

        debug!(outputs = outputs.len(), tombstones_dropped = dropped, "compaction merge done");
        Ok(outputs)
    }

    fn finish_output(&self, builder: SSTableBuilder, written: &mut Vec<PathBuf>) -> Result<Arc<SSTableReader>> {
        let info = builder.finish()?;
        written.push(info.path.clone());
        Ok(Arc::new(SSTableReader::open(&info.path)?))
    }

    /// Registers `outputs` and retires the inputs: manifest first, then the
    /// in-memory levels.
    fn install(&self, task: &CompactionTask, outputs: Vec<Arc<SSTableReader>>) -> Result<()> {
        let mut manifest = self.manifest.lock();
        let mut next = manifest.clone();
        let retired: Vec<(usize, String)> = task
            .inputs
            .iter()
            .map(|(l, t)| (*l, file_name_of(t)))
            .collect();
        next.remove(&retired);
        for table in &outputs {
            next.push_back(task.target_level, file_name_of(table));
        }
        if let Err(e) = next.save() {
            warn!(error = %e, "manifest update after compaction failed, discarding outputs");
            for table in &outputs {
                table.mark_obsolete();
            }
            return Err(e);
        }
        *manifest = next;

        let mut state = self.state.write();
        let mut levels = state.levels.clone();
        for tables in levels.iter_mut() {
            tables.retain(|t| !task.inputs.iter().any(|(_, input)| Arc::ptr_eq(t, input)));
        }
        let output_count = outputs.len();
        levels[task.target_level].extend(outputs);
        let mut next_state = (**state).clone();
        next_state.levels = levels;
        *state = Arc::new(next_state);

        info!(
            target = task.target_level,
            retired = retired.len(),
            outputs = output_count,
            "compaction installed"
        );
        Ok(())
    }
}
