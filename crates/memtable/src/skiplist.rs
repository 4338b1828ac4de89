//! Arena-backed skip list.
//!
//! Nodes live in a single `Vec` and link to each other by `u32` index. Every
//! node's tower of forward links is a slice of one shared `links` arena, so
//! an insert allocates nothing beyond its key. Nodes are never removed; an
//! overwrite replaces the value in place.
//!
//! ```text
//! Level 2:  HEAD ────────────► 20 ──────────────────► 50 ──► NIL
//! Level 1:  HEAD ──► 10 ─────► 20 ────► 35 ─────────► 50 ──► NIL
//! Level 0:  HEAD ──► 10 ─────► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► NIL
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Maximum tower height. With p = 1/2 this comfortably covers tens of
/// millions of entries.
pub const MAX_HEIGHT: usize = 16;

struct Node<V> {
    key: Vec<u8>,
    value: V,
    /// Start of this node's tower in `SkipList::links`: the following node
    /// on level `l` is `links[tower + l]`.
    tower: usize,
}

/// An ordered map from byte keys to `V` with O(log n) expected insert and
/// lookup. Keys compare byte-lexicographically.
///
/// Not internally synchronized: callers wrap it in their own lock. Holds
/// at most `u32::MAX` keys.
pub struct SkipList<V> {
    nodes: Vec<Node<V>>,
    /// Towers of all nodes, back to back, in insertion order.
    links: Vec<Option<u32>>,
    /// Forward pointers of the head sentinel, one per level.
    head: [Option<u32>; MAX_HEIGHT],
    /// Highest level currently in use (at least 1).
    height: usize,
    rng: StdRng,
}

impl<V> SkipList<V> {
    /// Creates an empty list seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates an empty list with a fixed seed, giving reproducible tower
    /// heights.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            head: [None; MAX_HEIGHT],
            height: 1,
            rng,
        }
    }

    /// Inserts `key`, replacing and returning the previous value if the key
    /// was already present.
    pub fn insert(&mut self, key: Vec<u8>, value: V) -> Option<V> {
        let mut update: [Option<u32>; MAX_HEIGHT] = [None; MAX_HEIGHT];
        let found = self.seek(&key, Some(&mut update));

        if let Some(idx) = found {
            let node = &mut self.nodes[idx as usize];
            if node.key == key {
                return Some(std::mem::replace(&mut node.value, value));
            }
        }

        let height = self.random_height();
        if height > self.height {
            // levels above the old height start at the head sentinel, which
            // `update` already encodes as `None`
            self.height = height;
        }

        let idx = self.nodes.len() as u32;
        let tower = self.links.len();
        for (level, prev) in update.iter().enumerate().take(height) {
            let next = self.next_of(*prev, level);
            self.links.push(next);
        }
        self.nodes.push(Node { key, value, tower });

        for (level, prev) in update.iter().enumerate().take(height) {
            self.set_next(*prev, level, Some(idx));
        }

        None
    }

    /// Looks up `key`, descending from the highest populated level.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.seek(key, None)
            .map(|idx| &self.nodes[idx as usize])
            .filter(|node| node.key == key)
            .map(|node| &node.value)
    }

    /// Mutable lookup; the key itself can never change.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let idx = self.seek(key, None)? as usize;
        let node = &mut self.nodes[idx];
        (node.key == key).then_some(&mut node.value)
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current tower height of the list.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Forward links stored across all towers.
    #[cfg(test)]
    pub(crate) fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Ascending iterator over every entry. Each call starts over.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            list: self,
            cur: self.head[0],
        }
    }

    /// Ascending iterator starting at the first key `>= start`.
    pub fn range_from(&self, start: &[u8]) -> Iter<'_, V> {
        Iter {
            list: self,
            cur: self.seek(start, None),
        }
    }

    /// Returns the first node whose key is `>= key`. When `update` is given,
    /// it receives the rightmost node before that position on every level
    /// (`None` meaning the head sentinel).
    fn seek(
        &self,
        key: &[u8],
        mut update: Option<&mut [Option<u32>; MAX_HEIGHT]>,
    ) -> Option<u32> {
        let mut cur: Option<u32> = None;
        for level in (0..self.height).rev() {
            while let Some(next) = self.next_of(cur, level) {
                if self.nodes[next as usize].key.as_slice() < key {
                    cur = Some(next);
                } else {
                    break;
                }
            }
            if let Some(u) = update.as_deref_mut() {
                u[level] = cur;
            }
        }
        self.next_of(cur, 0)
    }

    fn next_of(&self, node: Option<u32>, level: usize) -> Option<u32> {
        match node {
            None => self.head[level],
            Some(idx) => self.links[self.nodes[idx as usize].tower + level],
        }
    }

    fn set_next(&mut self, node: Option<u32>, level: usize, target: Option<u32>) {
        match node {
            None => self.head[level] = target,
            Some(idx) => {
                let slot = self.nodes[idx as usize].tower + level;
                self.links[slot] = target;
            }
        }
    }

    /// Fair coin flips, capped at [`MAX_HEIGHT`].
    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < MAX_HEIGHT && self.rng.gen_bool(0.5) {
            height += 1;
        }
        height
    }
}

impl<V> Default for SkipList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for SkipList<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipList")
            .field("len", &self.nodes.len())
            .field("height", &self.height)
            .finish()
    }
}

/// Level-0 walk over a [`SkipList`].
pub struct Iter<'a, V> {
    list: &'a SkipList<V>,
    cur: Option<u32>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let node = &self.list.nodes[idx as usize];
        self.cur = self.list.links[node.tower];
        Some((node.key.as_slice(), &node.value))
    }
}
