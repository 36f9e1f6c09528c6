//! Content-addressed dedup index (spec §4.4 L4).
//!
//! The design notes (spec §9) allow keying the `hash -> id` map directly by
//! the 128-bit hash instead of a pointer into the hash table, "unless
//! memory-frugal benchmarks require otherwise" — we take that option: one
//! `u128` is cheaper to reason about than a raw pointer into a
//! [`vdb_storage::ChunkedVec`] and avoids unsafe code entirely.

use rustc_hash::FxHashMap;
use vdb_core::Hash128;

/// `hash -> id` map used to answer `have_seen` and to decide whether
/// `add` appends a new row or bumps an existing one's counters.
#[derive(Debug, Default)]
pub struct DedupIndex {
    by_hash: FxHashMap<u128, u64>,
}

impl DedupIndex {
    pub fn new() -> Self {
        DedupIndex::default()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Looks up the id already assigned to `hash`, if any.
    pub fn get(&self, hash: Hash128) -> Option<u64> {
        self.by_hash.get(&hash.0).copied()
    }

    /// Records that `hash` maps to `id`. Installed once, at insert time;
    /// never overwritten afterwards (spec §3 invariant 6: `bytes[id]`
    /// never changes once written, so neither does its hash).
    pub fn insert(&mut self, hash: Hash128, id: u64) {
        self.by_hash.insert(hash.0, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit_after_insert() {
        let mut idx = DedupIndex::new();
        let h = Hash128::of(b"hello");
        assert_eq!(idx.get(h), None);
        idx.insert(h, 7);
        assert_eq!(idx.get(h), Some(7));
    }

    #[test]
    fn distinct_hashes_never_collide_in_the_map() {
        let mut idx = DedupIndex::new();
        idx.insert(Hash128::of(b"a"), 0);
        idx.insert(Hash128::of(b"b"), 1);
        assert_eq!(idx.get(Hash128::of(b"a")), Some(0));
        assert_eq!(idx.get(Hash128::of(b"b")), Some(1));
    }
}
