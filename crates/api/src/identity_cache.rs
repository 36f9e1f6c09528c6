//! Advisory object-identity cache (spec §4.4 step 1, §9 "Replacing the
//! identity-cache based on host object addresses").
//!
//! The original shortcut keys a cache by a live host object's address and
//! skips hashing entirely when the host marks the object "maybe shared"
//! and immutable-ish. That is unsound across a moving garbage collector
//! unless the host promises non-movability, which this workspace's
//! embedding host does not. Per §9's portable design, the cache here is
//! advisory and size-bounded: the caller supplies an opaque `u64` token
//! (standing in for a host object address) only when `was_flagged`
//! reports the value as traced and possibly shared; a miss — including an
//! evicted entry — always falls back to the normal hash-and-lookup path,
//! so correctness never depends on the cache being right.

use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Bounded, least-recently-used `token -> id` cache. Never grows past
/// `capacity` entries; the oldest entry is evicted (lazily, via the
/// recency queue) to make room for a new one.
pub struct IdentityCache {
    capacity: usize,
    entries: FxHashMap<u64, u64>,
    recency: VecDeque<u64>,
}

impl IdentityCache {
    pub fn new(capacity: usize) -> Self {
        IdentityCache {
            capacity,
            entries: FxHashMap::default(),
            recency: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the id cached for `token`, if present.
    pub fn get(&self, token: u64) -> Option<u64> {
        self.entries.get(&token).copied()
    }

    /// Records `token -> id`, evicting the least-recently-inserted entry
    /// first if the cache is at capacity.
    pub fn insert(&mut self, token: u64, id: u64) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&token) {
            while self.entries.len() >= self.capacity {
                let Some(oldest) = self.recency.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
            }
            self.recency.push_back(token);
        }
        self.entries.insert(token, id);
    }

    /// Removes a token the host has told us is no longer safe to trust
    /// (e.g. an escape notification after a GC move).
    pub fn invalidate(&mut self, token: u64) {
        self.entries.remove(&token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_insert() {
        let mut cache = IdentityCache::new(4);
        cache.insert(0xABCD, 3);
        assert_eq!(cache.get(0xABCD), Some(3));
    }

    #[test]
    fn evicts_oldest_once_over_capacity() {
        let mut cache = IdentityCache::new(2);
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.insert(3, 30);
        assert_eq!(cache.get(1), None);
        assert_eq!(cache.get(2), Some(20));
        assert_eq!(cache.get(3), Some(30));
    }

    #[test]
    fn invalidate_removes_a_single_entry() {
        let mut cache = IdentityCache::new(4);
        cache.insert(1, 10);
        cache.invalidate(1);
        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn zero_capacity_cache_never_caches_anything() {
        let mut cache = IdentityCache::new(0);
        cache.insert(1, 10);
        assert_eq!(cache.get(1), None);
    }
}
