//! Fixed compressed-bitmap indexes over type, length, dimensionality,
//! NA-presence, attribute-presence, and class-presence (spec §4.6).

use crate::reverse_index::ReverseIndex;
use once_cell::sync::Lazy;
use roaring::RoaringTreemap;
use std::collections::BTreeMap;
use vdb_core::model::ValueType;

/// Number of buckets in the length axis: `{0,1,...,100}` fine-grained,
/// then 10 log-spaced buckets per decade up to `10^11` (spec §4.6).
pub const NB_LENGTH_BUCKETS: usize = 200;
/// Number of buckets in the dimensionality axis: `{0,1,2,3,4,>4}`.
pub const NB_NDIMS_BUCKETS: usize = 6;

static LENGTH_INTERVALS: Lazy<[u64; NB_LENGTH_BUCKETS]> = Lazy::new(|| {
    let mut intervals = [0u64; NB_LENGTH_BUCKETS];
    for i in 0..=100 {
        intervals[i] = i as u64;
    }
    let remaining = NB_LENGTH_BUCKETS - 101;
    for j in 0..remaining {
        let exponent = 2.0 + 9.0 * (j as f64 + 1.0) / remaining as f64;
        intervals[101 + j] = 10f64.powf(exponent).round() as u64;
    }
    intervals
});

/// Lower bound of each length bucket, ascending. The boundaries are fixed
/// by the bucket count and formula above, so they're computed once and
/// shared across every call.
pub fn length_intervals() -> [u64; NB_LENGTH_BUCKETS] {
    *LENGTH_INTERVALS
}

/// Maps a length to its bucket index via the boundaries from
/// [`length_intervals`].
pub fn bucket_for_length(length: u64, intervals: &[u64; NB_LENGTH_BUCKETS]) -> usize {
    match intervals.binary_search(&length) {
        Ok(i) => i,
        Err(0) => 0,
        Err(i) => i - 1,
    }
}

/// Maps a dimensionality count to its bucket index: `0,1,2,3,4` map
/// directly, anything higher falls in the `>4` bucket.
pub fn bucket_for_ndims(n_dims: u32) -> usize {
    (n_dims as usize).min(NB_NDIMS_BUCKETS - 1)
}

/// The complete set of search indexes for one database (spec §4.6, §6
/// `search_index/` directory).
pub struct BitmapIndexSet {
    pub types: Vec<RoaringTreemap>,
    pub na: RoaringTreemap,
    pub class: RoaringTreemap,
    pub vector: RoaringTreemap,
    pub attributes: RoaringTreemap,
    pub lengths: Vec<RoaringTreemap>,
    pub ndims: Vec<RoaringTreemap>,
    pub classnames: ReverseIndex,
    pub packages: ReverseIndex,
    pub functions: ReverseIndex,
    /// Full `key -> ids` membership backing the reverse indexes above.
    /// `ReverseIndex` only keeps its binned bitmaps, which aren't
    /// reversible, so an incremental `build_indexes` call needs this to
    /// re-bin the old and new members together.
    pub classname_members: BTreeMap<u32, Vec<u64>>,
    pub package_members: BTreeMap<u32, Vec<u64>>,
    pub function_members: BTreeMap<u32, Vec<u64>>,
    pub length_intervals: [u64; NB_LENGTH_BUCKETS],
    /// Number of values already folded into these bitmaps; `build_indexes`
    /// resumes from here instead of rescanning from zero (spec §4.6
    /// "Build").
    pub last_computed: u64,
}

impl BitmapIndexSet {
    pub fn new() -> Self {
        BitmapIndexSet {
            types: (0..ValueType::COUNT).map(|_| RoaringTreemap::new()).collect(),
            na: RoaringTreemap::new(),
            class: RoaringTreemap::new(),
            vector: RoaringTreemap::new(),
            attributes: RoaringTreemap::new(),
            lengths: (0..NB_LENGTH_BUCKETS).map(|_| RoaringTreemap::new()).collect(),
            ndims: (0..NB_NDIMS_BUCKETS).map(|_| RoaringTreemap::new()).collect(),
            classnames: ReverseIndex::new(),
            packages: ReverseIndex::new(),
            functions: ReverseIndex::new(),
            classname_members: BTreeMap::new(),
            package_members: BTreeMap::new(),
            function_members: BTreeMap::new(),
            length_intervals: length_intervals(),
            last_computed: 0,
        }
    }

    /// Returns the bitmap for type tag `tag`, or the "any" bitmap (spec
    /// §4.6: by convention the flip of the empty set over `[0, n_values)`)
    /// when `tag` is out of the fixed type range.
    pub fn type_bitmap(&self, tag: u32) -> &RoaringTreemap {
        &self.types[(tag as usize).min(self.types.len() - 1)]
    }
}

impl Default for BitmapIndexSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_intervals_are_strictly_increasing() {
        let intervals = length_intervals();
        for w in intervals.windows(2) {
            assert!(w[1] > w[0], "{} should be > {}", w[1], w[0]);
        }
    }

    #[test]
    fn small_lengths_bucket_one_to_one() {
        let intervals = length_intervals();
        assert_eq!(bucket_for_length(0, &intervals), 0);
        assert_eq!(bucket_for_length(50, &intervals), 50);
        assert_eq!(bucket_for_length(100, &intervals), 100);
    }

    #[test]
    fn large_lengths_fall_into_log_spaced_buckets() {
        let intervals = length_intervals();
        let bucket_1e6 = bucket_for_length(1_000_000, &intervals);
        let bucket_1e3 = bucket_for_length(1_000, &intervals);
        assert!(bucket_1e6 > bucket_1e3);
        assert!(bucket_1e6 < NB_LENGTH_BUCKETS);
    }

    #[test]
    fn ndims_above_four_collapse_to_the_overflow_bucket() {
        assert_eq!(bucket_for_ndims(0), 0);
        assert_eq!(bucket_for_ndims(4), 4);
        assert_eq!(bucket_for_ndims(5), 5);
        assert_eq!(bucket_for_ndims(9000), 5);
    }
}
