//! Merging two databases together (spec §4.8).
//!
//! Interning tables are reconciled first so that every origin, class, and
//! source-database name can be remapped into the target's id space before
//! any value moves; after that, each value is either found by content
//! hash (and its provenance unioned in) or appended fresh.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use vdb_core::error::Result;
use vdb_core::model::StaticMeta;
use vdb_core::{codec, Hash128, Location};
use vdb_storage::{InterningTable, VariableTable};

use crate::database::Database;

/// Maps a source database's local interning ids onto a target database's
/// ids, built once per merge by [`Database::pre_merge_interning`].
struct InterningRemaps {
    packages: Vec<u32>,
    functions: Vec<u32>,
    params: Vec<u32>,
    classes: Vec<u32>,
    dbnames: Vec<u32>,
}

struct PrecomputedAdd {
    source_id: u64,
    bytes: Vec<u8>,
    hash: Hash128,
}

fn remap_table(source: &mut InterningTable, target: &mut InterningTable) -> Result<Vec<u32>> {
    let n = source.nb_values();
    let mut out = Vec::with_capacity(n as usize);
    for id in 0..n as u32 {
        let s = source.read(id)?;
        out.push(target.intern(&s)?);
    }
    Ok(out)
}

fn precompute_chunk(data_path: &Path, start: u64, end: u64) -> Result<Vec<PrecomputedAdd>> {
    let mut reader = VariableTable::open(data_path)?;
    let mut out = Vec::with_capacity((end - start) as usize);
    for source_id in start..end {
        let bytes = reader.read(source_id)?;
        let hash = Hash128::of(&bytes);
        out.push(PrecomputedAdd {
            source_id,
            bytes,
            hash,
        });
    }
    Ok(out)
}

impl Database {
    fn pre_merge_interning(&mut self, source: &mut Database) -> Result<InterningRemaps> {
        Ok(InterningRemaps {
            packages: remap_table(&mut source.packages, &mut self.packages)?,
            functions: remap_table(&mut source.functions, &mut self.functions)?,
            params: remap_table(&mut source.params, &mut self.params)?,
            classes: remap_table(&mut source.classnames, &mut self.classnames)?,
            dbnames: remap_table(&mut source.dbnames, &mut self.dbnames)?,
        })
    }

    fn union_provenance(&mut self, target_id: u64, source: &Database, source_id: u64, remaps: &InterningRemaps) {
        for loc in source.provenance.origins(source_id) {
            let remapped = if loc.is_return_value() {
                Location::return_value(
                    remaps.packages[loc.package as usize],
                    remaps.functions[loc.function as usize],
                )
            } else {
                Location::new(
                    remaps.packages[loc.package as usize],
                    remaps.functions[loc.function as usize],
                    remaps.params[loc.parameter as usize],
                )
            };
            self.provenance.add_origin(target_id, remapped);
        }

        let classes: Vec<u32> = source
            .provenance
            .classes(source_id)
            .iter()
            .map(|&c| remaps.classes[c as usize])
            .collect();
        self.provenance.union_classes(target_id, &classes);

        for &call_id in source.provenance.call_ids(source_id) {
            self.provenance.push_call_id(target_id, call_id);
        }

        for &dbname_id in source.provenance.dbnames(source_id) {
            self.provenance.add_dbname(target_id, remaps.dbnames[dbname_id as usize]);
        }
    }

    /// Dedups or appends one value carried over from `source`, unioning in
    /// its provenance either way. Returns the id it landed at in `self`
    /// and whether that id is newly inserted. Shared by [`Database::merge_in`],
    /// [`Database::parallel_merge_in`], and [`Database::merge_into`].
    fn apply_merge_item(
        &mut self,
        source: &Database,
        source_id: u64,
        bytes: Vec<u8>,
        hash: Hash128,
        remaps: &InterningRemaps,
    ) -> Result<(u64, bool)> {
        if let Some(target_id) = self.dedup.get(hash) {
            let source_rt = source.runtime_meta.get_loaded(source_id)?;
            let mut rt = self.runtime_meta.get_loaded(target_id)?;
            rt.n_calls += source_rt.n_calls;
            rt.n_merges += 1;
            self.runtime_meta.write(target_id, rt)?;

            if let (Some(target_dc), Some(source_dc)) = (self.debug_counters.as_mut(), source.debug_counters.as_ref()) {
                let mut t = target_dc.get_loaded(target_id)?;
                let s = source_dc.get_loaded(source_id)?;
                t.n_maybe_shared += s.n_maybe_shared;
                t.n_sexp_address_opt += s.n_sexp_address_opt;
                target_dc.write(target_id, t)?;
            }

            self.union_provenance(target_id, source, source_id, remaps);
            Ok((target_id, false))
        } else {
            let value = codec::decode(&bytes)?;
            let size_bytes = bytes.len() as u64;
            let target_id = self.values.borrow_mut().append(&bytes)?;
            self.hashes.append(hash)?;
            self.static_meta.append(StaticMeta::derive(&value, size_bytes))?;

            let mut rt = source.runtime_meta.get_loaded(source_id)?;
            rt.n_merges += 1;
            self.runtime_meta.append(rt)?;

            if let Some(target_dc) = self.debug_counters.as_mut() {
                let carried = match source.debug_counters.as_ref() {
                    Some(source_dc) => source_dc.get_loaded(source_id)?,
                    None => Default::default(),
                };
                target_dc.append(carried)?;
            }

            self.provenance.push_empty();
            self.dedup.insert(hash, target_id);
            self.union_provenance(target_id, source, source_id, remaps);
            Ok((target_id, true))
        }
    }

    fn sexp_table_path(&self) -> PathBuf {
        self.dir.join(crate::config::SEXP_TABLE)
    }

    /// Merges every value in `other` into `self` (spec §4.8). Returns the
    /// number of values that were not already present in `self`.
    pub fn merge_in(&mut self, other: &mut Database) -> Result<u64> {
        let remaps = self.pre_merge_interning(other)?;
        let mut n_new = 0u64;
        for source_id in 0..other.nb_values() {
            let bytes = other.values.borrow_mut().read(source_id)?;
            let hash = Hash128::of(&bytes);
            let (_, newly_inserted) = self.apply_merge_item(other, source_id, bytes, hash, &remaps)?;
            if newly_inserted {
                n_new += 1;
            }
        }
        Ok(n_new)
    }

    /// Same merge as [`Database::merge_in`], but shards `other`'s id range
    /// across worker threads to precompute each value's bytes and content
    /// hash in parallel (each worker opens its own independent
    /// [`VariableTable`] handle onto `other`'s data file — reading is safe
    /// to fan out, but the single seek cursor a `VariableTable` holds is
    /// not) before reducing them into `self` serially.
    pub fn parallel_merge_in(&mut self, other: &mut Database, min_chunk_size: usize) -> Result<u64> {
        let n = other.nb_values();
        if n == 0 {
            return Ok(0);
        }

        let data_path = other.sexp_table_path();
        let chunk_size = min_chunk_size.max(1) as u64;
        let mut bounds = Vec::new();
        let mut start = 0u64;
        while start < n {
            let end = (start + chunk_size).min(n);
            bounds.push((start, end));
            start = end;
        }

        let shards: Vec<Vec<PrecomputedAdd>> = std::thread::scope(|scope| -> Result<Vec<Vec<PrecomputedAdd>>> {
            let handles: Vec<_> = bounds
                .iter()
                .map(|&(s, e)| {
                    let path = data_path.clone();
                    scope.spawn(move || precompute_chunk(&path, s, e))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("merge precompute shard panicked"))
                .collect()
        })?;

        let remaps = self.pre_merge_interning(other)?;
        let mut n_new = 0u64;
        for shard in shards {
            for item in shard {
                let (_, newly_inserted) = self.apply_merge_item(other, item.source_id, item.bytes, item.hash, &remaps)?;
                if newly_inserted {
                    n_new += 1;
                }
            }
        }
        Ok(n_new)
    }

    /// Merges `self` into `other`, the reverse direction of
    /// [`Database::merge_in`]. Returns the id each of `self`'s values
    /// ended up at in `other`.
    pub fn merge_into(&mut self, other: &mut Database) -> Result<FxHashMap<u64, u64>> {
        let remaps = other.pre_merge_interning(self)?;
        let mut remap = FxHashMap::default();
        for source_id in 0..self.nb_values() {
            let bytes = self.values.borrow_mut().read(source_id)?;
            let hash = Hash128::of(&bytes);
            let (target_id, _) = other.apply_merge_item(self, source_id, bytes, hash, &remaps)?;
            remap.insert(source_id, target_id);
        }
        Ok(remap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{OpenMode, Parameter};
    use vdb_core::value::Data;
    use vdb_core::Value;

    fn int_vec(values: &[i32]) -> Value {
        Value::new(Data::Integer(values.iter().map(|&v| Some(v)).collect()))
    }

    #[test]
    fn scenario_3_merge_in_only_counts_new_values() {
        // spec §8 scenario 3
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();

        let mut d1 = Database::open(dir1.path(), OpenMode::Write, true).unwrap();
        let shared_id = d1.add(&int_vec(&[1, 2, 3])).unwrap().id().unwrap();

        let mut d2 = Database::open(dir2.path(), OpenMode::Write, true).unwrap();
        d2.add(&int_vec(&[4, 5])).unwrap();
        d2.add(&int_vec(&[1, 2, 3])).unwrap();

        let n_new = d1.merge_in(&mut d2).unwrap();
        assert_eq!(n_new, 1);
        assert_eq!(d1.nb_values(), 2);

        let (_, rt) = d1.get_metadata(shared_id).unwrap();
        assert_eq!(rt.n_merges, 1);
    }

    #[test]
    fn merge_unions_provenance_across_databases() {
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();

        let mut d1 = Database::open(dir1.path(), OpenMode::Write, true).unwrap();
        let v = int_vec(&[1, 2, 3]);
        let id = d1
            .add_with_origin(&v, "pkgA", "f", Parameter::Named("x"), 1)
            .unwrap()
            .id()
            .unwrap();

        let mut d2 = Database::open(dir2.path(), OpenMode::Write, true).unwrap();
        d2.add_with_origin(&v, "pkgB", "g", Parameter::Named("y"), 7)
            .unwrap();

        d1.merge_in(&mut d2).unwrap();

        let locations = d1.source_locations(id).unwrap();
        assert_eq!(locations.len(), 2);
        assert!(locations.iter().any(|l| l.package == "pkgA" && l.function == "f"));
        assert!(locations.iter().any(|l| l.package == "pkgB" && l.function == "g"));
    }

    #[test]
    fn merge_in_is_idempotent_on_repeated_merges() {
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();

        let mut d1 = Database::open(dir1.path(), OpenMode::Write, true).unwrap();
        d1.add(&int_vec(&[1, 2, 3])).unwrap();

        let mut d2 = Database::open(dir2.path(), OpenMode::Write, true).unwrap();
        d2.add(&int_vec(&[4, 5])).unwrap();

        assert_eq!(d1.merge_in(&mut d2).unwrap(), 1);
        assert_eq!(d1.merge_in(&mut d2).unwrap(), 0);
        assert_eq!(d1.nb_values(), 2);
    }

    #[test]
    fn merge_into_returns_a_complete_remap() {
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();

        let mut d1 = Database::open(dir1.path(), OpenMode::Write, true).unwrap();
        let a = d1.add(&int_vec(&[1])).unwrap().id().unwrap();
        let b = d1.add(&int_vec(&[2])).unwrap().id().unwrap();

        let mut d2 = Database::open(dir2.path(), OpenMode::Write, true).unwrap();
        d2.add(&int_vec(&[1])).unwrap();

        let remap = d1.merge_into(&mut d2).unwrap();
        assert_eq!(remap.len(), 2);
        assert!(remap.contains_key(&a));
        assert!(remap.contains_key(&b));
        assert_eq!(d2.nb_values(), 2);
    }

    #[test]
    fn parallel_merge_in_matches_serial_merge() {
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();

        let mut d1 = Database::open(dir1.path(), OpenMode::Write, true).unwrap();
        let mut d2 = Database::open(dir2.path(), OpenMode::Write, true).unwrap();
        for i in 0..20 {
            d2.add(&int_vec(&[i])).unwrap();
        }

        let n_new = d1.parallel_merge_in(&mut d2, 4).unwrap();
        assert_eq!(n_new, 20);
        assert_eq!(d1.nb_values(), 20);
    }
}
