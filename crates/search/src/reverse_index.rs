//! Bucketed reverse index for high-cardinality keys (spec §4.6).
//!
//! A plain `key -> bitmap` map would need one bitmap file per distinct
//! package, function, or class name, which is wasteful when most keys
//! carry only a handful of ids. `ReverseIndex` instead groups
//! property-sorted keys into bins capped at `threshold` ids each; a lookup
//! does a binary search over bin boundaries and returns the bin's bitmap
//! together with a flag saying whether the bin holds exactly one key (the
//! answer is exact) or several (the caller must refine by scanning ids in
//! the bin against their actual key).

use roaring::RoaringTreemap;
use std::collections::BTreeMap;

const DEFAULT_THRESHOLD: usize = 100;

#[derive(Debug, Clone)]
struct Bin {
    min_key: u32,
    max_key: u32,
    bitmap: RoaringTreemap,
}

/// A `property id -> bitmap of value ids` index, bucketed for compactness.
#[derive(Debug, Clone)]
pub struct ReverseIndex {
    threshold: usize,
    bins: Vec<Bin>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        ReverseIndex::with_threshold(DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        ReverseIndex {
            threshold,
            bins: Vec::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Rebuilds the index from a complete `property -> ids` map, grouping
    /// consecutive properties into bins until a bin's cardinality exceeds
    /// `threshold`.
    pub fn rebuild(&mut self, properties: &BTreeMap<u32, Vec<u64>>) {
        self.bins.clear();
        let mut current: Option<Bin> = None;

        for (&key, ids) in properties {
            let bin = current.get_or_insert_with(|| Bin {
                min_key: key,
                max_key: key,
                bitmap: RoaringTreemap::new(),
            });
            bin.max_key = key;
            for &id in ids {
                bin.bitmap.insert(id);
            }
            if bin.bitmap.len() as usize > self.threshold {
                self.bins.push(current.take().unwrap());
            }
        }
        if let Some(bin) = current {
            self.bins.push(bin);
        }
    }

    /// Looks up `property`, returning its bitmap (cloned) and whether the
    /// containing bin represents exactly this one key.
    pub fn get(&self, property: u32) -> Option<(RoaringTreemap, bool)> {
        if self.bins.is_empty() {
            return None;
        }
        let idx = match self.bins.binary_search_by_key(&property, |b| b.min_key) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let bin = &self.bins[idx];
        if property > bin.max_key {
            return None;
        }
        Some((bin.bitmap.clone(), bin.min_key == bin.max_key))
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Iterates bins as `(min_key, max_key, bitmap)`, used by the on-disk
    /// persistence layer (spec §6 `classnames_index_<k>.ror`) to write one
    /// file per bin without exposing the `Bin` type itself.
    pub fn bins_iter(&self) -> impl Iterator<Item = (u32, u32, &RoaringTreemap)> {
        self.bins.iter().map(|b| (b.min_key, b.max_key, &b.bitmap))
    }

    /// Reconstructs a `ReverseIndex` directly from its bins, as read back
    /// from disk — cheaper than re-deriving them from a key->ids map via
    /// [`ReverseIndex::rebuild`].
    pub fn from_bins(threshold: usize, bins: Vec<(u32, u32, RoaringTreemap)>) -> Self {
        ReverseIndex {
            threshold,
            bins: bins
                .into_iter()
                .map(|(min_key, max_key, bitmap)| Bin {
                    min_key,
                    max_key,
                    bitmap,
                })
                .collect(),
        }
    }
}

impl Default for ReverseIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BTreeMap<u32, Vec<u64>> {
        let mut m = BTreeMap::new();
        m.insert(1, vec![10, 11]);
        m.insert(2, vec![12]);
        m.insert(3, vec![13, 14, 15]);
        m
    }

    #[test]
    fn low_cardinality_keys_share_one_bin() {
        let mut idx = ReverseIndex::with_threshold(100);
        idx.rebuild(&sample());
        let (bitmap, single) = idx.get(2).unwrap();
        assert!(!single);
        assert!(bitmap.contains(10));
        assert!(bitmap.contains(13));
    }

    #[test]
    fn a_key_that_alone_exceeds_threshold_gets_its_own_bin() {
        let mut properties = BTreeMap::new();
        properties.insert(5u32, (0..200u64).collect());
        properties.insert(6u32, vec![500]);
        let mut idx = ReverseIndex::with_threshold(100);
        idx.rebuild(&properties);
        let (bitmap, single) = idx.get(5).unwrap();
        assert!(single);
        assert_eq!(bitmap.len(), 200);
    }

    #[test]
    fn unknown_key_below_first_bin_returns_none() {
        let mut idx = ReverseIndex::with_threshold(100);
        idx.rebuild(&sample());
        assert!(idx.get(0).is_none());
    }
}
