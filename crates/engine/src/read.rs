//! Read path: `get()` and `scan()`.
//!
//! Both work on an [`LsmState`](crate::state::LsmState) snapshot, so they
//! never block writers, flushes or compactions. Tables retired while a read
//! is in flight stay on disk until the read drops its handles.

use memtable::{Memtable, ValueEntry};
use sstable::{vec_source, MergeIterator, MergeSource};

use crate::error::Result;
use crate::Engine;

impl Engine {
    /// Looks up `key`, returning its live value.
    ///
    /// Checks the active Memtable, the frozen Memtables (newest first), then
    /// SSTables level by level. The first version found wins; a tombstone
    /// yields `None`.
    ///
    /// # Errors
    ///
    /// I/O failure or a corrupt SSTable on the lookup path. Corruption is
    /// never skipped over.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.get_entry(key)?.and_then(|e| e.value))
    }

    /// Like [`get`](Engine::get) but returns the winning version itself,
    /// tombstones included, with its sequence number.
    pub fn get_entry(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        self.inner.ensure_open()?;
        let snapshot = self.inner.snapshot();

        if let Some(entry) = snapshot.active.read().get_entry(key) {
            return Ok(Some(entry.clone()));
        }
        for frozen in &snapshot.frozen {
            if let Some(entry) = frozen.mem.read().get_entry(key) {
                return Ok(Some(entry.clone()));
            }
        }
        for (_, table) in snapshot.tables() {
            if let Some(entry) = table.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Returns up to `limit` live `(key, value)` pairs whose key starts with
    /// `prefix`, in ascending key order. An empty prefix matches every key.
    ///
    /// Memtables and SSTables are merged with the same newest-wins rule as
    /// compaction; tombstones hide older versions and are not returned.
    ///
    /// # Errors
    ///
    /// I/O failure or a corrupt SSTable in the scanned range.
    pub fn scan(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.ensure_open()?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let snapshot = self.inner.snapshot();

        let mut sources: Vec<MergeSource<'static>> = Vec::new();
        sources.push(vec_source(prefixed(&snapshot.active.read(), prefix)));
        for frozen in &snapshot.frozen {
            sources.push(vec_source(prefixed(&frozen.mem.read(), prefix)));
        }
        for (_, table) in snapshot.tables() {
            if !table.may_hold_prefix(prefix) {
                continue;
            }
            sources.push(Box::new(table.iter_from(prefix)?));
        }

        let mut out = Vec::new();
        for item in MergeIterator::new(sources) {
            let (key, entry) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(value) = entry.value {
                out.push((key, value));
                if out.len() == limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}

/// Copies the entries of `mem` under `prefix`, tombstones included.
fn prefixed(mem: &Memtable, prefix: &[u8]) -> Vec<(Vec<u8>, ValueEntry)> {
    mem.range_from(prefix)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, e)| (k.to_vec(), e.clone()))
        .collect()
}
