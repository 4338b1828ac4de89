//! K-way merge over sorted entry streams.
//!
//! Produces `(key, ValueEntry)` pairs in ascending key order. When the same
//! key appears in several sources only the entry with the **highest sequence
//! number** is emitted (newest wins); older duplicates are dropped.
//!
//! This is the core primitive for compaction and range scans: the sources
//! may be [`SSTableIterator`](crate::SSTableIterator)s, memtable snapshots, or
//! anything else yielding sorted, per-source-unique keys.
//!
//! Tombstones are passed through; callers filter or drop them.

use memtable::ValueEntry;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Result, SSTableError};

/// One sorted input of a [`MergeIterator`].
pub type MergeSource<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, ValueEntry)>> + 'a>;

/// The current head of one source.
struct HeapEntry {
    key: Vec<u8>,
    entry: ValueEntry,
    /// Index into `sources`; lower wins a (key, seq) tie.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: smallest key first, then highest seq,
        // then lowest source index.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.entry.seq.cmp(&other.entry.seq))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sorted sources into one deduplicated sorted stream.
///
/// Lazy: each source is advanced only when its head has been consumed. The
/// first error from any source is yielded once, after which the iterator is
/// exhausted.
pub struct MergeIterator<'a> {
    sources: Vec<MergeSource<'a>>,
    heap: BinaryHeap<HeapEntry>,
    primed: bool,
    failed: bool,
}

impl<'a> MergeIterator<'a> {
    /// Creates a merge over `sources`. Pass newer sources first: an equal
    /// `(key, seq)` pair resolves toward the lower index.
    pub fn new(sources: Vec<MergeSource<'a>>) -> Self {
        let heap = BinaryHeap::with_capacity(sources.len());
        Self {
            sources,
            heap,
            primed: false,
            failed: false,
        }
    }

    /// Pulls the next head of `source` into the heap.
    fn advance(&mut self, source: usize) -> Result<()> {
        match self.sources[source].next() {
            Some(Ok((key, entry))) => {
                self.heap.push(HeapEntry { key, entry, source });
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }

    fn prime(&mut self) -> Result<()> {
        self.primed = true;
        for source in 0..self.sources.len() {
            self.advance(source)?;
        }
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, ValueEntry)>> {
        if !self.primed {
            self.prime()?;
        }

        let top = match self.heap.pop() {
            Some(top) => top,
            None => return Ok(None),
        };
        self.advance(top.source)?;

        // drain older versions of the same key
        while self.heap.peek().is_some_and(|dup| dup.key == top.key) {
            if let Some(dup) = self.heap.pop() {
                self.advance(dup.source)?;
            }
        }

        Ok(Some((top.key, top.entry)))
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<(Vec<u8>, ValueEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_entry() {
            Ok(Some(pair)) => Some(Ok(pair)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Wraps an in-memory sorted vector as a merge source.
pub fn vec_source<'a>(entries: Vec<(Vec<u8>, ValueEntry)>) -> MergeSource<'a> {
    Box::new(entries.into_iter().map(Ok::<_, SSTableError>))
}
