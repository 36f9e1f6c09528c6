//! Predicate composition, bitmap algebra, and uniform sampling (spec §4.6
//! L7 "Query engine").
//!
//! A [`Query`] is a set of optional predicates plus a list of `queries`
//! sub-clauses that union together. [`Query::update`] folds every
//! predicate into a single cached bitmap (`index_cache`); everything else
//! — [`Query::sample`], [`Query::sample_n`], [`Query::view`] — just reads
//! that cache. A query remembers whether it has ever been computed and at
//! what `nb_values` it was last computed at, so `update` is a no-op once
//! the database has stopped growing since the last call.

use crate::bitmap_index::{bucket_for_length, bucket_for_ndims, BitmapIndexSet, NB_NDIMS_BUCKETS};
use crate::builder::IndexContext;
use rand::Rng;
use roaring::RoaringTreemap;
use vdb_core::error::Result;

/// A composable predicate over the value store (spec §4.6 "Query").
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub type_tag: Option<u32>,
    pub is_vector: Option<bool>,
    pub has_na: Option<bool>,
    pub has_attributes: Option<bool>,
    pub has_class: Option<bool>,
    pub length: Option<u64>,
    pub ndims: Option<u32>,
    pub class_names: Vec<u32>,
    pub packages: Vec<u32>,
    pub functions: Vec<u32>,
    /// Sub-queries that union together to form the base set before the
    /// other predicates of this query are applied on top.
    pub queries: Vec<Query>,

    cache: RoaringTreemap,
    initialized: bool,
    computed_through: u64,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn with_type(mut self, type_tag: u32) -> Self {
        self.type_tag = Some(type_tag);
        self
    }

    pub fn with_is_vector(mut self, v: bool) -> Self {
        self.is_vector = Some(v);
        self
    }

    pub fn with_has_na(mut self, v: bool) -> Self {
        self.has_na = Some(v);
        self
    }

    pub fn with_has_attributes(mut self, v: bool) -> Self {
        self.has_attributes = Some(v);
        self
    }

    pub fn with_has_class(mut self, v: bool) -> Self {
        self.has_class = Some(v);
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_ndims(mut self, ndims: u32) -> Self {
        self.ndims = Some(ndims);
        self
    }

    pub fn with_class_name(mut self, class_name_id: u32) -> Self {
        self.class_names.push(class_name_id);
        self
    }

    pub fn with_package(mut self, package_id: u32) -> Self {
        self.packages.push(package_id);
        self
    }

    pub fn with_function(mut self, function_id: u32) -> Self {
        self.functions.push(function_id);
        self
    }

    pub fn union_with(mut self, other: Query) -> Self {
        self.queries.push(other);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Recomputes `index_cache` if the database has appended since the
    /// last call (spec §4.6 "Query rebuild trigger").
    pub fn update(&mut self, ctx: &dyn IndexContext, index: &BitmapIndexSet) -> Result<()> {
        let nb_values = ctx.nb_values();
        if self.initialized && self.computed_through == nb_values {
            return Ok(());
        }

        let mut cache = self.base_bitmap(ctx, index, nb_values)?;

        apply_bool(&mut cache, self.is_vector, &index.vector);
        apply_bool(&mut cache, self.has_na, &index.na);
        apply_bool(&mut cache, self.has_attributes, &index.attributes);
        apply_bool(&mut cache, self.has_class, &index.class);

        if let Some(length) = self.length {
            let bucket = bucket_for_length(length, &index.length_intervals);
            cache &= &index.lengths[bucket];
            let lower = index.length_intervals[bucket];
            let upper = index
                .length_intervals
                .get(bucket + 1)
                .copied()
                .unwrap_or(u64::MAX);
            if upper - lower > 1 {
                refine(&mut cache, ctx, |meta| meta.length == length)?;
            }
        }

        if let Some(ndims) = self.ndims {
            let bucket = bucket_for_ndims(ndims);
            cache &= &index.ndims[bucket];
            if bucket == NB_NDIMS_BUCKETS - 1 {
                refine(&mut cache, ctx, |meta| meta.n_dims == ndims)?;
            }
        }

        if !self.class_names.is_empty() {
            let matches = reverse_index_union(&self.class_names, &index.classnames, ctx, |c, id| {
                c.class_name_ids(id)
            })?;
            cache &= &matches;
        }
        if !self.packages.is_empty() {
            let matches = reverse_index_union(&self.packages, &index.packages, ctx, |c, id| {
                c.package_ids(id)
            })?;
            cache &= &matches;
        }
        if !self.functions.is_empty() {
            let matches = reverse_index_union(&self.functions, &index.functions, ctx, |c, id| {
                c.function_ids(id)
            })?;
            cache &= &matches;
        }

        self.cache = cache;
        self.initialized = true;
        self.computed_through = nb_values;
        Ok(())
    }

    fn base_bitmap(
        &mut self,
        ctx: &dyn IndexContext,
        index: &BitmapIndexSet,
        nb_values: u64,
    ) -> Result<RoaringTreemap> {
        if !self.queries.is_empty() {
            let mut union = RoaringTreemap::new();
            for sub in &mut self.queries {
                sub.update(ctx, index)?;
                union |= sub.view();
            }
            return Ok(union);
        }
        if let Some(tag) = self.type_tag {
            return Ok(index.type_bitmap(tag).clone());
        }
        let mut all = RoaringTreemap::new();
        if nb_values > 0 {
            all.insert_range(0..nb_values);
        }
        Ok(all)
    }

    /// The computed result set. Empty (and meaningless) until [`Query::update`]
    /// has run at least once.
    pub fn view(&self) -> &RoaringTreemap {
        &self.cache
    }

    pub fn cardinality(&self) -> u64 {
        self.cache.len()
    }

    /// Draws one id uniformly at random from the result set.
    pub fn sample(&self, rng: &mut impl Rng) -> Option<u64> {
        let n = self.cache.len();
        if n == 0 {
            return None;
        }
        let k = rng.gen_range(0..n);
        self.cache.select(k)
    }

    /// Reservoir-samples `n` distinct ids from the result set (spec §4.6
    /// "`sample_n(n, rng)` performs reservoir sampling over the bitmap
    /// iterator").
    pub fn sample_n(&self, n: usize, rng: &mut impl Rng) -> Vec<u64> {
        let mut reservoir: Vec<u64> = Vec::with_capacity(n);
        for (i, id) in self.cache.iter().enumerate() {
            if i < n {
                reservoir.push(id);
            } else {
                let j = rng.gen_range(0..=i);
                if j < n {
                    reservoir[j] = id;
                }
            }
        }
        reservoir
    }
}

/// Applies a boolean predicate: AND with the index's bitmap if `true`, AND
/// with its complement over `[min(cache), max(cache)]` if `false` (spec
/// §4.6 step 1).
fn apply_bool(cache: &mut RoaringTreemap, predicate: Option<bool>, set: &RoaringTreemap) {
    let Some(want) = predicate else { return };
    if want {
        *cache &= set;
        return;
    }
    let (Some(min), Some(max)) = (cache.min(), cache.max()) else {
        return;
    };
    let mut complement = RoaringTreemap::new();
    complement.insert_range(min..=max);
    complement -= set;
    *cache &= complement;
}

/// Linear refinement: keeps only ids in `cache` whose static metadata
/// satisfies `keep` (spec §4.6 steps 2–3, the length- and ndims-bucket
/// refinement passes).
fn refine(
    cache: &mut RoaringTreemap,
    ctx: &dyn IndexContext,
    keep: impl Fn(&vdb_core::model::StaticMeta) -> bool,
) -> Result<()> {
    let mut kept = RoaringTreemap::new();
    for id in cache.iter() {
        if keep(&ctx.static_meta(id)?) {
            kept.insert(id);
        }
    }
    *cache = kept;
    Ok(())
}

/// Unions the matches for a set of reverse-index keys, refining any bin
/// that holds more than one key by checking each candidate id's actual
/// membership via `ids_for` (spec §4.6 steps 4–5).
fn reverse_index_union(
    keys: &[u32],
    index: &crate::reverse_index::ReverseIndex,
    ctx: &dyn IndexContext,
    ids_for: impl Fn(&dyn IndexContext, u64) -> Result<Vec<u32>>,
) -> Result<RoaringTreemap> {
    let mut result = RoaringTreemap::new();
    for &key in keys {
        let Some((bitmap, single)) = index.get(key) else {
            continue;
        };
        if single {
            result |= &bitmap;
            continue;
        }
        for id in bitmap.iter() {
            if ids_for(ctx, id)?.contains(&key) {
                result.insert(id);
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap_index::BitmapIndexSet;
    use vdb_core::model::{StaticMeta, ValueType};

    struct FakeContext {
        metas: Vec<StaticMeta>,
    }

    impl IndexContext for FakeContext {
        fn nb_values(&self) -> u64 {
            self.metas.len() as u64
        }
        fn static_meta(&self, id: u64) -> Result<StaticMeta> {
            Ok(self.metas[id as usize])
        }
        fn has_na(&self, _id: u64) -> Result<bool> {
            Ok(false)
        }
        fn class_name_ids(&self, _id: u64) -> Result<Vec<u32>> {
            Ok(vec![])
        }
        fn package_ids(&self, _id: u64) -> Result<Vec<u32>> {
            Ok(vec![])
        }
        fn function_ids(&self, _id: u64) -> Result<Vec<u32>> {
            Ok(vec![])
        }
    }

    fn meta(type_tag: ValueType, length: u64) -> StaticMeta {
        StaticMeta {
            type_tag: type_tag.tag(),
            size_bytes: 8 * length,
            length,
            n_attributes: 0,
            n_dims: 0,
            n_rows: length as u32,
        }
    }

    #[test]
    fn type_predicate_selects_only_that_type() {
        let ctx = FakeContext {
            metas: vec![meta(ValueType::Double, 3), meta(ValueType::Integer, 3)],
        };
        let mut index = BitmapIndexSet::new();
        crate::builder::build_indexes(&ctx, &mut index).unwrap();

        let mut q = Query::new().with_type(ValueType::Double.tag());
        q.update(&ctx, &index).unwrap();
        assert!(q.view().contains(0));
        assert!(!q.view().contains(1));
        assert_eq!(q.cardinality(), 1);
    }

    #[test]
    fn false_predicate_takes_the_complement() {
        let ctx = FakeContext {
            metas: vec![meta(ValueType::Double, 1), meta(ValueType::Double, 5)],
        };
        let mut index = BitmapIndexSet::new();
        crate::builder::build_indexes(&ctx, &mut index).unwrap();

        let mut q = Query::new()
            .with_type(ValueType::Double.tag())
            .with_is_vector(false);
        q.update(&ctx, &index).unwrap();
        assert!(q.view().contains(0));
        assert!(!q.view().contains(1));
    }

    #[test]
    fn update_is_a_no_op_once_computed_through_matches() {
        let ctx = FakeContext {
            metas: vec![meta(ValueType::Double, 1)],
        };
        let mut index = BitmapIndexSet::new();
        crate::builder::build_indexes(&ctx, &mut index).unwrap();

        let mut q = Query::new().with_type(ValueType::Double.tag());
        q.update(&ctx, &index).unwrap();
        assert!(q.is_initialized());
        // Second call with an unchanged nb_values must not panic or change
        // the cached result.
        q.update(&ctx, &index).unwrap();
        assert_eq!(q.cardinality(), 1);
    }

    #[test]
    fn sample_n_returns_distinct_ids_from_the_result_set() {
        let ctx = FakeContext {
            metas: (0..20).map(|_| meta(ValueType::Double, 1)).collect(),
        };
        let mut index = BitmapIndexSet::new();
        crate::builder::build_indexes(&ctx, &mut index).unwrap();

        let mut q = Query::new().with_type(ValueType::Double.tag());
        q.update(&ctx, &index).unwrap();
        let mut rng = rand::thread_rng();
        let sampled = q.sample_n(5, &mut rng);
        assert_eq!(sampled.len(), 5);
        for id in &sampled {
            assert!(q.view().contains(*id));
        }
    }
}
