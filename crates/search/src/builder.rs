//! Sharded index construction (spec §4.6 "Build").
//!
//! `vdb-search` has no notion of how values, provenance, or class names
//! are stored — that lives in `vdb-storage`/`vdb-api` — so the builder
//! takes an [`IndexContext`] the caller implements over its own tables.
//! This keeps the dependency arrow pointing the right way: `vdb-api`
//! depends on `vdb-search`, not the reverse.

use crate::bitmap_index::{bucket_for_length, bucket_for_ndims, BitmapIndexSet};
use std::collections::BTreeMap;
use vdb_core::error::Result;
use vdb_core::model::StaticMeta;

/// Everything the index builder and the query engine need to read about a
/// value, without owning the storage layer themselves.
pub trait IndexContext {
    fn nb_values(&self) -> u64;
    fn static_meta(&self, id: u64) -> Result<StaticMeta>;
    /// Whether the value at `id` contains at least one NA element. Requires
    /// decoding the value bytes (spec §4.6 "slow path").
    fn has_na(&self, id: u64) -> Result<bool>;
    /// Class-name ids attached to the value at `id`, in declaration order.
    fn class_name_ids(&self, id: u64) -> Result<Vec<u32>>;
    /// Package ids the value at `id` originated from.
    fn package_ids(&self, id: u64) -> Result<Vec<u32>>;
    /// Function ids the value at `id` originated from.
    fn function_ids(&self, id: u64) -> Result<Vec<u32>>;
}

/// Builds or incrementally extends `index` to cover every id in
/// `[index.last_computed, ctx.nb_values())`.
pub fn build_indexes(ctx: &dyn IndexContext, index: &mut BitmapIndexSet) -> Result<()> {
    let start = index.last_computed;
    let end = ctx.nb_values();
    if start >= end {
        return Ok(());
    }

    // Seed from the member maps left by the previous build so this call's
    // `ReverseIndex::rebuild` (which always takes the complete key->ids
    // map, not a delta) doesn't drop ids indexed before `start`.
    let mut classnames: BTreeMap<u32, Vec<u64>> = index.classname_members.clone();
    let mut packages: BTreeMap<u32, Vec<u64>> = index.package_members.clone();
    let mut functions: BTreeMap<u32, Vec<u64>> = index.function_members.clone();

    for id in start..end {
        let meta = ctx.static_meta(id)?;
        index.types[meta.type_tag as usize % index.types.len()].insert(id);

        let is_vector = meta.length != 1 && meta.type_tag != vdb_core::ValueType::Environment.tag();
        if is_vector {
            index.vector.insert(id);
        }
        if meta.n_attributes > 0 {
            index.attributes.insert(id);
        }

        let length_bucket = bucket_for_length(meta.length, &index.length_intervals);
        index.lengths[length_bucket].insert(id);
        let ndims_bucket = bucket_for_ndims(meta.n_dims);
        index.ndims[ndims_bucket].insert(id);

        if ctx.has_na(id)? {
            index.na.insert(id);
        }
        let class_ids = ctx.class_name_ids(id)?;
        if !class_ids.is_empty() {
            index.class.insert(id);
            for class_id in class_ids {
                classnames.entry(class_id).or_default().push(id);
            }
        }
        for package_id in ctx.package_ids(id)? {
            packages.entry(package_id).or_default().push(id);
        }
        for function_id in ctx.function_ids(id)? {
            functions.entry(function_id).or_default().push(id);
        }
    }

    index.classnames.rebuild(&classnames);
    index.packages.rebuild(&packages);
    index.functions.rebuild(&functions);
    index.classname_members = classnames;
    index.package_members = packages;
    index.function_members = functions;
    for bitmap in index
        .types
        .iter_mut()
        .chain(index.lengths.iter_mut())
        .chain(index.ndims.iter_mut())
        .chain([&mut index.na, &mut index.class, &mut index.vector, &mut index.attributes])
    {
        bitmap.run_optimize();
    }

    index.last_computed = end;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use vdb_core::model::ValueType;

    struct FakeContext {
        metas: Vec<StaticMeta>,
        na: RefCell<Vec<bool>>,
        classes: Vec<Vec<u32>>,
        packages: Vec<Vec<u32>>,
    }

    impl IndexContext for FakeContext {
        fn nb_values(&self) -> u64 {
            self.metas.len() as u64
        }
        fn static_meta(&self, id: u64) -> Result<StaticMeta> {
            Ok(self.metas[id as usize])
        }
        fn has_na(&self, id: u64) -> Result<bool> {
            Ok(self.na.borrow()[id as usize])
        }
        fn class_name_ids(&self, id: u64) -> Result<Vec<u32>> {
            Ok(self.classes[id as usize].clone())
        }
        fn package_ids(&self, id: u64) -> Result<Vec<u32>> {
            Ok(self.packages[id as usize].clone())
        }
        fn function_ids(&self, _id: u64) -> Result<Vec<u32>> {
            Ok(vec![])
        }
    }

    fn meta(type_tag: ValueType, length: u64, n_attributes: u64) -> StaticMeta {
        StaticMeta {
            type_tag: type_tag.tag(),
            size_bytes: 8 * length,
            length,
            n_attributes,
            n_dims: 0,
            n_rows: length as u32,
        }
    }

    #[test]
    fn build_indexes_populates_fixed_bitmaps() {
        let ctx = FakeContext {
            metas: vec![meta(ValueType::Double, 5, 0), meta(ValueType::Integer, 1, 1)],
            na: RefCell::new(vec![true, false]),
            classes: vec![vec![], vec![3]],
            packages: vec![vec![1], vec![1, 2]],
        };
        let mut index = BitmapIndexSet::new();
        build_indexes(&ctx, &mut index).unwrap();

        assert!(index.types[ValueType::Double.tag() as usize].contains(0));
        assert!(index.types[ValueType::Integer.tag() as usize].contains(1));
        assert!(index.vector.contains(0));
        assert!(!index.vector.contains(1));
        assert!(index.na.contains(0));
        assert!(!index.na.contains(1));
        assert!(index.class.contains(1));
        assert_eq!(index.last_computed, 2);
    }

    #[test]
    fn a_second_build_call_only_scans_the_new_tail() {
        let ctx = FakeContext {
            metas: vec![meta(ValueType::Double, 5, 0)],
            na: RefCell::new(vec![false]),
            classes: vec![vec![]],
            packages: vec![vec![]],
        };
        let mut index = BitmapIndexSet::new();
        build_indexes(&ctx, &mut index).unwrap();
        assert_eq!(index.last_computed, 1);

        let ctx2 = FakeContext {
            metas: vec![meta(ValueType::Double, 5, 0), meta(ValueType::Integer, 2, 0)],
            na: RefCell::new(vec![false, false]),
            classes: vec![vec![], vec![]],
            packages: vec![vec![], vec![]],
        };
        build_indexes(&ctx2, &mut index).unwrap();
        assert_eq!(index.last_computed, 2);
        assert!(index.types[ValueType::Integer.tag() as usize].contains(1));
    }

    #[test]
    fn incremental_build_keeps_earlier_reverse_index_entries() {
        let ctx = FakeContext {
            metas: vec![meta(ValueType::Double, 5, 1)],
            na: RefCell::new(vec![false]),
            classes: vec![vec![3]],
            packages: vec![vec![1]],
        };
        let mut index = BitmapIndexSet::new();
        build_indexes(&ctx, &mut index).unwrap();
        assert!(index.classnames.get(3).unwrap().0.contains(0));

        let ctx2 = FakeContext {
            metas: vec![meta(ValueType::Double, 5, 1), meta(ValueType::Integer, 2, 0)],
            na: RefCell::new(vec![false, false]),
            classes: vec![vec![3], vec![]],
            packages: vec![vec![1], vec![]],
        };
        build_indexes(&ctx2, &mut index).unwrap();
        // id 0's membership in classname 3 must survive the second,
        // incremental build even though id 0 is outside the new tail.
        let (bitmap, _) = index.classnames.get(3).unwrap();
        assert!(bitmap.contains(0));
        assert!(index.packages.get(1).unwrap().0.contains(0));
    }
}
