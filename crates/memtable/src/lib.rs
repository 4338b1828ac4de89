//! In-memory write buffer backed by an arena skip list.
//!
//! Every key holds exactly one [`ValueEntry`]: the version with the highest
//! sequence number seen so far. A delete is stored as a tombstone
//! (`value == None`) so it can shadow older versions in SSTables.

pub mod skiplist;

pub use skiplist::SkipList;

/// ValueEntry stores the sequence number and the optional value.
/// `value == None` signifies a tombstone (delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: u64,
    pub value: Option<Vec<u8>>,
}

impl ValueEntry {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Debug)]
pub struct Memtable {
    list: SkipList<ValueEntry>,
    approx_size: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            list: SkipList::new(),
            approx_size: 0,
        }
    }

    /// Same as [`new`](Memtable::new) with deterministic skip-list heights.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            list: SkipList::with_seed(seed),
            approx_size: 0,
        }
    }

    /// Put a key with a seq number. Overwrites existing entry if seq is newer.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, seq: u64) {
        self.upsert(key, Some(value), seq);
    }

    /// Delete: add a tombstone with seq
    pub fn delete(&mut self, key: Vec<u8>, seq: u64) {
        self.upsert(key, None, seq);
    }

    fn upsert(&mut self, key: Vec<u8>, value: Option<Vec<u8>>, seq: u64) {
        let new_len = value.as_ref().map_or(0, Vec::len);

        if let Some(existing) = self.list.get_mut(&key) {
            if existing.seq >= seq {
                return;
            }
            let old_len = existing.value.as_ref().map_or(0, Vec::len);
            existing.seq = seq;
            existing.value = value;
            self.approx_size = self.approx_size.saturating_sub(old_len) + new_len;
            return;
        }

        self.approx_size += key.len() + new_len;
        self.list.insert(key, ValueEntry { seq, value });
    }

    /// Get the latest value if present and not a tombstone
    pub fn get(&self, key: &[u8]) -> Option<(u64, Vec<u8>)> {
        self.list
            .get(key)
            .and_then(|e| e.value.as_ref().map(|v| (e.seq, v.clone())))
    }

    /// Raw entry for `key`, tombstones included.
    pub fn get_entry(&self, key: &[u8]) -> Option<&ValueEntry> {
        self.list.get(key)
    }

    /// Ordered iterator over entries (key, ValueEntry)
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &ValueEntry)> {
        self.list.iter()
    }

    /// Ordered iterator starting at the first key `>= start`.
    pub fn range_from<'a>(
        &'a self,
        start: &[u8],
    ) -> impl Iterator<Item = (&'a [u8], &'a ValueEntry)> {
        self.list.range_from(start)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Bytes of keys plus live values held by this memtable.
    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.list.get(key).is_some()
    }

    /// Number of tombstones currently buffered.
    pub fn tombstone_count(&self) -> usize {
        self.list.iter().filter(|(_, e)| e.is_tombstone()).count()
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
