//! The database façade (spec §4.1, L8): the single entry point that wires
//! storage, durability, and search together behind `open`/`add`/`get`/
//! `merge`/`check`.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use vdb_core::codec;
use vdb_core::error::{Error, Result};
use vdb_core::model::{DebugCounters, RuntimeMeta, StaticMeta};
use vdb_core::{Hash128, Location, Value};
use vdb_durability::{verify_table_counts, LockFile};
use vdb_search::{build_indexes as run_build_indexes, persist, BitmapIndexSet, IndexContext, Query};
use vdb_storage::{FixedTable, InterningTable, VariableTable};

use crate::config::{self, DbConfig};
use crate::dedup::DedupIndex;
use crate::identity_cache::IdentityCache;
use crate::provenance::ProvenanceStore;

/// Least-recently-used bound for the advisory identity cache (spec §4.4
/// step 1). Arbitrary but generous enough that a single call's worth of
/// repeated arguments never gets evicted mid-call.
const DEFAULT_IDENTITY_CACHE_CAPACITY: usize = 4096;

/// How a database was opened (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only: no lock is taken, `add` is expected never to be called.
    Read,
    /// Exclusive writer: takes the `.LOCK` file for the session.
    Write,
    /// Like `Write`, but the caller intends to call `merge_in`/
    /// `parallel_merge_in` rather than `add` directly.
    Merge,
}

fn requires_lock(mode: OpenMode) -> bool {
    matches!(mode, OpenMode::Write | OpenMode::Merge)
}

/// Outcome of an `add` call (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The value is present in the store, whether it was already there or
    /// was just inserted.
    Stored {
        hash: Hash128,
        id: u64,
        newly_inserted: bool,
    },
    /// The value's type is never stored as a top-level id (spec §9
    /// "Environments and cycles").
    NotStored,
}

impl AddOutcome {
    pub fn id(&self) -> Option<u64> {
        match self {
            AddOutcome::Stored { id, .. } => Some(*id),
            AddOutcome::NotStored => None,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(
            self,
            AddOutcome::Stored {
                newly_inserted: true,
                ..
            }
        )
    }
}

/// Which parameter position a value was observed at (spec §3).
pub enum Parameter<'a> {
    Named(&'a str),
    ReturnValue,
}

/// Stands in for a host object's address: the caller supplies `token` only
/// when the host reports the value as traced and possibly shared (spec
/// §4.4 step 1, §9).
#[derive(Debug, Clone, Copy)]
pub struct IdentityHint {
    pub token: u64,
    pub was_flagged: bool,
}

/// One resolved source location (spec §4.5 `source_locations`): a
/// package/function name pair and the parameter name, or `None` for a
/// return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub package: String,
    pub function: String,
    pub parameter: Option<String>,
}

enum DebugBump {
    MaybeShared,
    AddressOpt,
}

/// The value database (spec §4.1). Owns every on-disk table for one
/// directory and the in-memory indexes built on top of them.
pub struct Database {
    pub(crate) dir: PathBuf,
    mode: OpenMode,
    quiet: bool,
    opened_pid: u32,
    pub(crate) config: DbConfig,
    lock: Option<LockFile>,

    pub(crate) values: RefCell<VariableTable>,
    pub(crate) hashes: FixedTable<Hash128>,
    pub(crate) static_meta: FixedTable<StaticMeta>,
    pub(crate) runtime_meta: FixedTable<RuntimeMeta>,
    pub(crate) debug_counters: Option<FixedTable<DebugCounters>>,

    pub(crate) dedup: DedupIndex,
    identity_cache: IdentityCache,
    pub(crate) provenance: ProvenanceStore,

    pub(crate) packages: InterningTable,
    pub(crate) functions: InterningTable,
    pub(crate) params: InterningTable,
    pub(crate) classnames: InterningTable,
    pub(crate) dbnames: InterningTable,
    #[allow(dead_code)] // reserved for generic-string attributes (spec §3); no caller needs it yet.
    strings: InterningTable,

    search_index: BitmapIndexSet,
}

impl Database {
    /// Opens (or creates) a database rooted at `dir` (spec §4.1).
    ///
    /// `Write`/`Merge` opens take the `.LOCK` file; if one is already
    /// present from a previous unclean shutdown, a slow integrity check
    /// runs first and, if it finds anything fixable, repairs it
    /// automatically before the lock is replaced.
    pub fn open(dir: impl AsRef<Path>, mode: OpenMode, quiet: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::io("create database directory", &dir, e))?;

        let lock_present = LockFile::exists(&dir);
        let (mut cfg, created) = DbConfig::open_or_create(&dir)?;
        if created {
            if !quiet {
                tracing::info!(dir = %dir.display(), "creating fresh database directory");
            }
            cfg.save()?;
        }

        let mut values = VariableTable::open(dir.join(config::SEXP_TABLE))?;
        let mut hashes: FixedTable<Hash128> = FixedTable::open(dir.join(config::HASHES_TABLE))?;
        let mut static_meta: FixedTable<StaticMeta> = FixedTable::open(dir.join(config::STATIC_META))?;
        let mut runtime_meta: FixedTable<RuntimeMeta> = FixedTable::open(dir.join(config::RUNTIME_META))?;
        let mut debug_counters = if cfg.debug_counters_enabled() {
            Some(FixedTable::<DebugCounters>::open(dir.join(config::DEBUG_COUNTERS))?)
        } else {
            None
        };

        hashes.load_all()?;
        static_meta.load_all()?;
        runtime_meta.load_all()?;
        if let Some(dc) = &mut debug_counters {
            dc.load_all()?;
        }

        // A previous clean close guarantees every per-value table agrees
        // with `config.conf`; skip the check if a stale lock shows the
        // previous session never got that far (spec §9 9a: the check is a
        // strict `!=`, run only when its premise — a clean prior close —
        // actually holds).
        if !created && !lock_present {
            let expected = cfg.nb_values()?;
            let mut counts = vec![
                ("sexp_table", values.nb_values()),
                ("hashes_table", hashes.nb_values()),
                ("static_meta", static_meta.nb_values()),
                ("runtime_meta", runtime_meta.nb_values()),
            ];
            if let Some(dc) = &debug_counters {
                if dc.nb_values() != 0 {
                    counts.push(("debug_counters", dc.nb_values()));
                }
            }
            verify_table_counts(expected, &counts)?;
        }

        let provenance = ProvenanceStore::open(&dir)?;
        let packages = InterningTable::open(dir.join(config::PACKAGES_TABLE))?;
        let functions = InterningTable::open(dir.join(config::FUNCTIONS_TABLE))?;
        let params = InterningTable::open(dir.join(config::PARAMS_TABLE))?;
        let classnames = InterningTable::open(dir.join(config::CLASSNAMES_TABLE))?;
        let dbnames = InterningTable::open(dir.join(config::DBNAMES_TABLE))?;
        let strings = InterningTable::open(dir.join(config::GENERIC_STRINGS_TABLE))?;
        let search_index = persist::load(&dir.join(config::SEARCH_INDEX_DIR))?;

        let mut dedup = DedupIndex::new();
        for id in 0..hashes.nb_values() {
            dedup.insert(hashes.get_loaded(id)?, id);
        }

        let mut db = Database {
            dir,
            mode,
            quiet,
            opened_pid: std::process::id(),
            config: cfg,
            lock: None,
            values: RefCell::new(values),
            hashes,
            static_meta,
            runtime_meta,
            debug_counters,
            dedup,
            identity_cache: IdentityCache::new(DEFAULT_IDENTITY_CACHE_CAPACITY),
            provenance,
            packages,
            functions,
            params,
            classnames,
            dbnames,
            strings,
            search_index,
        };

        if requires_lock(mode) {
            if lock_present {
                if !quiet {
                    tracing::warn!(dir = %db.dir.display(), "unclean shutdown detected, running integrity check");
                }
                let offending = db.check(true)?;
                if !offending.is_empty() {
                    db.repair()?;
                    let still_offending = db.check(true)?;
                    if !still_offending.is_empty() {
                        return Err(Error::Corruption {
                            offending_ids: still_offending,
                        });
                    }
                }
                LockFile::clear_stale(&db.dir)?;
            }
            db.lock = Some(LockFile::acquire(&db.dir)?);
        }

        Ok(db)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn nb_values(&self) -> u64 {
        self.static_meta.nb_values()
    }

    pub fn nb_packages(&self) -> u64 {
        self.packages.nb_values().saturating_sub(1)
    }

    pub fn nb_functions(&self) -> u64 {
        self.functions.nb_values().saturating_sub(1)
    }

    pub fn nb_parameters(&self) -> u64 {
        self.params.nb_values().saturating_sub(1)
    }

    fn check_not_forked(&self) -> Result<()> {
        let current = std::process::id();
        if current != self.opened_pid {
            return Err(Error::ForkedProcess {
                opened_pid: self.opened_pid,
                current_pid: current,
            });
        }
        Ok(())
    }

    fn bump_debug(&mut self, id: u64, which: DebugBump) -> Result<()> {
        if let Some(dc) = &mut self.debug_counters {
            let mut counters = dc.get_loaded(id)?;
            match which {
                DebugBump::MaybeShared => counters.n_maybe_shared += 1,
                DebugBump::AddressOpt => counters.n_sexp_address_opt += 1,
            }
            dc.write(id, counters)?;
        }
        Ok(())
    }

    /// Enables debug-mode counters, backfilling a zeroed row for every
    /// value already present (spec §3).
    pub fn enable_debug_counters(&mut self) -> Result<()> {
        if self.debug_counters.is_some() {
            return Ok(());
        }
        let mut dc: FixedTable<DebugCounters> = FixedTable::open(self.dir.join(config::DEBUG_COUNTERS))?;
        dc.load_all()?;
        for _ in 0..self.nb_values() {
            dc.append(DebugCounters::default())?;
        }
        self.debug_counters = Some(dc);
        self.config.enable_debug_counters();
        Ok(())
    }

    fn add_inner(&mut self, value: &Value, hint: Option<IdentityHint>) -> Result<AddOutcome> {
        self.check_not_forked()?;
        if !value.value_type().is_storable() {
            return Ok(AddOutcome::NotStored);
        }

        // Step 1, spec §4.4: a traced, possibly-shared value's identity
        // token short-circuits hashing and serialization entirely. A miss
        // here — including an evicted token — just falls through to the
        // normal path below.
        if let Some(h) = &hint {
            if h.was_flagged {
                if let Some(id) = self.identity_cache.get(h.token) {
                    let hash = self.hashes.get_loaded(id)?;
                    self.bump_debug(id, DebugBump::AddressOpt)?;
                    return Ok(AddOutcome::Stored {
                        hash,
                        id,
                        newly_inserted: false,
                    });
                }
            }
        }

        let bytes = codec::encode(value);
        let hash = Hash128::of(&bytes);

        let (id, newly_inserted) = match self.dedup.get(hash) {
            Some(id) => {
                let mut rt = self.runtime_meta.get_loaded(id)?;
                rt.n_calls += 1;
                self.runtime_meta.write(id, rt)?;
                self.bump_debug(id, DebugBump::MaybeShared)?;
                (id, false)
            }
            None => {
                let size_bytes = bytes.len() as u64;
                let id = self.values.borrow_mut().append(&bytes)?;
                self.hashes.append(hash)?;
                self.static_meta.append(StaticMeta::derive(value, size_bytes))?;
                self.runtime_meta.append(RuntimeMeta::first_seen())?;
                if let Some(dc) = &mut self.debug_counters {
                    dc.append(DebugCounters::default())?;
                }
                self.provenance.push_empty();
                if !value.attributes.class.is_empty() {
                    let class_ids = value
                        .attributes
                        .class
                        .iter()
                        .map(|c| self.classnames.intern(c))
                        .collect::<Result<Vec<_>>>()?;
                    self.provenance.set_classes(id, class_ids);
                }
                self.dedup.insert(hash, id);
                (id, true)
            }
        };

        if let Some(h) = hint {
            self.identity_cache.insert(h.token, id);
        }

        Ok(AddOutcome::Stored {
            hash,
            id,
            newly_inserted,
        })
    }

    /// Inserts (or dedups) `value` (spec §4.4).
    pub fn add(&mut self, value: &Value) -> Result<AddOutcome> {
        self.add_inner(value, None)
    }

    /// Like [`Database::add`], but offers the identity-cache shortcut a
    /// caller holding a live host object can use (spec §4.4 step 1).
    pub fn add_traced(&mut self, value: &Value, hint: IdentityHint) -> Result<AddOutcome> {
        self.add_inner(value, Some(hint))
    }

    fn record_origin(
        &mut self,
        id: u64,
        package: &str,
        function: &str,
        parameter: Parameter<'_>,
        call_id: u64,
    ) -> Result<()> {
        let package_id = self.packages.intern(package)?;
        let function_id = self.functions.intern(function)?;
        let location = match parameter {
            Parameter::ReturnValue => Location::return_value(package_id, function_id),
            Parameter::Named(p) => Location::new(package_id, function_id, self.params.intern(p)?),
        };
        self.provenance.add_origin(id, location);
        self.provenance.push_call_id(id, call_id);
        Ok(())
    }

    /// Inserts `value` and records where it was observed (spec §4.4,
    /// §4.5). Origin and call-id bookkeeping happens whether `value` was
    /// already present or just inserted.
    pub fn add_with_origin(
        &mut self,
        value: &Value,
        package: &str,
        function: &str,
        parameter: Parameter<'_>,
        call_id: u64,
    ) -> Result<AddOutcome> {
        let outcome = self.add(value)?;
        if let AddOutcome::Stored { id, .. } = outcome {
            self.record_origin(id, package, function, parameter, call_id)?;
        }
        Ok(outcome)
    }

    /// Looks up `value`'s id without inserting it.
    pub fn have_seen(&mut self, value: &Value) -> Result<Option<u64>> {
        if !value.value_type().is_storable() {
            return Ok(None);
        }
        let bytes = codec::encode(value);
        Ok(self.dedup.get(Hash128::of(&bytes)))
    }

    pub fn get_value(&mut self, id: u64) -> Result<Value> {
        let bytes = self.values.borrow_mut().read(id)?;
        codec::decode(&bytes)
    }

    pub fn get_metadata(&self, id: u64) -> Result<(StaticMeta, RuntimeMeta)> {
        Ok((self.static_meta.get_loaded(id)?, self.runtime_meta.get_loaded(id)?))
    }

    /// Resolves `id`'s origins back to package/function/parameter names
    /// (spec §4.5).
    pub fn source_locations(&mut self, id: u64) -> Result<Vec<ResolvedLocation>> {
        let locations: Vec<Location> = self.provenance.origins(id).copied().collect();
        let mut out = Vec::with_capacity(locations.len());
        for loc in locations {
            let package = self.packages.read(loc.package)?;
            let function = self.functions.read(loc.function)?;
            let parameter = if loc.is_return_value() {
                None
            } else {
                Some(self.params.read(loc.parameter)?)
            };
            out.push(ResolvedLocation {
                package,
                function,
                parameter,
            });
        }
        Ok(out)
    }

    /// Ids of every value observed at `(package, function)`, across all
    /// parameters and the return value (spec §4.5 convenience query).
    pub fn values_from_origin(&mut self, package: &str, function: &str) -> Result<Vec<u64>> {
        let Some(package_id) = self.packages.id_of(package) else {
            return Ok(Vec::new());
        };
        let Some(function_id) = self.functions.id_of(function) else {
            return Ok(Vec::new());
        };
        let mut query = Query::new().with_package(package_id).with_function(function_id);
        self.update_query(&mut query)?;
        Ok(query.view().iter().collect())
    }

    /// Call ids recorded against every value observed at `(package,
    /// function)` (spec §4.5 convenience query).
    pub fn values_from_calls(&mut self, package: &str, function: &str) -> Result<Vec<u64>> {
        let ids = self.values_from_origin(package, function)?;
        let mut calls = Vec::new();
        for id in ids {
            calls.extend(self.provenance.call_ids(id).iter().copied());
        }
        Ok(calls)
    }

    /// Builds (or incrementally extends) the search indexes to cover every
    /// value currently in the store (spec §4.6).
    pub fn build_indexes(&mut self) -> Result<()> {
        let mut index = std::mem::take(&mut self.search_index);
        let result = run_build_indexes(self, &mut index);
        self.search_index = index;
        result?;
        self.config.set_index_last_computed(self.search_index.last_computed);
        Ok(())
    }

    pub fn has_search_index(&self) -> bool {
        self.config.has_search_index()
    }

    /// Rebuilds the search indexes if needed, then recomputes `query`'s
    /// result set against them (spec §4.6 "Query rebuild trigger").
    pub fn update_query(&mut self, query: &mut Query) -> Result<()> {
        self.build_indexes()?;
        query.update(self, &self.search_index)
    }

    pub fn sample_value(&mut self, rng: &mut impl Rng) -> Result<Option<(u64, Value)>> {
        let mut query = Query::new();
        self.sample_value_with_query(&mut query, rng)
    }

    pub fn sample_value_with_query(&mut self, query: &mut Query, rng: &mut impl Rng) -> Result<Option<(u64, Value)>> {
        self.update_query(query)?;
        match query.sample(rng) {
            Some(id) => Ok(Some((id, self.get_value(id)?))),
            None => Ok(None),
        }
    }

    pub fn sample_index(&mut self, query: &mut Query, rng: &mut impl Rng) -> Result<Option<u64>> {
        self.update_query(query)?;
        Ok(query.sample(rng))
    }

    pub fn view_values(&mut self, query: &mut Query) -> Result<Vec<(u64, Value)>> {
        self.update_query(query)?;
        let ids: Vec<u64> = query.view().iter().collect();
        ids.into_iter().map(|id| Ok((id, self.get_value(id)?))).collect()
    }

    pub fn view_metadata(&mut self, query: &mut Query) -> Result<Vec<(u64, StaticMeta, RuntimeMeta)>> {
        self.update_query(query)?;
        let ids: Vec<u64> = query.view().iter().collect();
        ids.into_iter()
            .map(|id| {
                let (static_meta, runtime_meta) = self.get_metadata(id)?;
                Ok((id, static_meta, runtime_meta))
            })
            .collect()
    }

    pub fn view_origins(&mut self, query: &mut Query) -> Result<Vec<(u64, Vec<ResolvedLocation>)>> {
        self.update_query(query)?;
        let ids: Vec<u64> = query.view().iter().collect();
        ids.into_iter().map(|id| Ok((id, self.source_locations(id)?))).collect()
    }

    /// Applies `f` to every value in the store, in id order.
    pub fn map<R>(&mut self, f: impl Fn(&Value) -> R) -> Result<Vec<R>> {
        let n = self.nb_values();
        (0..n).map(|id| Ok(f(&self.get_value(id)?))).collect()
    }

    /// Applies `f` to every value matched by `query`.
    pub fn map_query<R>(&mut self, query: &mut Query, f: impl Fn(&Value) -> R) -> Result<Vec<R>> {
        self.update_query(query)?;
        let ids: Vec<u64> = query.view().iter().collect();
        ids.into_iter().map(|id| Ok(f(&self.get_value(id)?))).collect()
    }

    /// Ids of every value in the store for which `f` holds.
    pub fn filter_index(&mut self, f: impl Fn(&Value) -> bool) -> Result<Vec<u64>> {
        let n = self.nb_values();
        let mut out = Vec::new();
        for id in 0..n {
            if f(&self.get_value(id)?) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Ids matched by `query` for which `f` additionally holds.
    pub fn filter_index_query(&mut self, query: &mut Query, f: impl Fn(&Value) -> bool) -> Result<Vec<u64>> {
        self.update_query(query)?;
        let ids: Vec<u64> = query.view().iter().collect();
        let mut out = Vec::new();
        for id in ids {
            if f(&self.get_value(id)?) {
                out.push(id);
            }
        }
        Ok(out)
    }

    fn flush_all(&mut self) -> Result<()> {
        self.values.borrow_mut().flush()?;
        self.hashes.flush()?;
        self.static_meta.flush()?;
        self.runtime_meta.flush()?;
        if let Some(dc) = &mut self.debug_counters {
            dc.flush()?;
        }
        self.provenance.flush(&self.dir)?;
        self.packages.flush()?;
        self.functions.flush()?;
        self.params.flush()?;
        self.classnames.flush()?;
        self.dbnames.flush()?;
        self.strings.flush()?;
        if self.search_index.last_computed > 0 {
            persist::save(&self.dir.join(config::SEARCH_INDEX_DIR), &self.search_index)?;
        }
        self.config.set_nb_values(self.nb_values());
        self.config.save()?;
        Ok(())
    }

    /// Flushes every table and releases the writer lock, surfacing any
    /// error instead of only logging it the way [`Drop`] does.
    pub fn close(mut self) -> Result<()> {
        self.flush_all()?;
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        std::mem::forget(self);
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            tracing::error!(dir = %self.dir.display(), error = %e, "failed to flush database on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdb_core::model::ValueType;
    use vdb_core::value::{na_double, Attributes, Data};
    use vdb_search::Query;

    fn int_vec(values: &[i32]) -> Value {
        Value::new(Data::Integer(values.iter().map(|&v| Some(v)).collect()))
    }

    fn double_vec(values: &[f64]) -> Value {
        Value::new(Data::Double(values.to_vec()))
    }

    #[test]
    fn add_dedups_and_counts_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();

        let v = int_vec(&[1, 2, 3]);
        let first = db.add(&v).unwrap();
        let second = db.add(&v).unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.id(), second.id());
        assert_eq!(db.nb_values(), 1);

        let (_, rt) = db.get_metadata(first.id().unwrap()).unwrap();
        assert_eq!(rt.n_calls, 2);
    }

    #[test]
    fn distinct_values_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();

        let a = db.add(&int_vec(&[1, 2, 3])).unwrap();
        let b = db.add(&double_vec(&[1.0, na_double(), 3.0])).unwrap();

        assert_eq!(db.nb_values(), 2);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn environment_and_closure_are_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();

        assert_eq!(db.add(&Value::new(Data::Environment)).unwrap(), AddOutcome::NotStored);
        assert_eq!(db.add(&Value::new(Data::Closure)).unwrap(), AddOutcome::NotStored);
        assert_eq!(db.nb_values(), 0);
    }

    #[test]
    fn get_value_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();
        let v = int_vec(&[4, 5, 6]);
        let id = db.add(&v).unwrap().id().unwrap();
        assert_eq!(db.get_value(id).unwrap(), v);
    }

    #[test]
    fn origin_recorded_once_for_repeated_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();
        let v = int_vec(&[1, 2, 3]);

        let id = db
            .add_with_origin(&v, "pkg", "f", Parameter::Named("x"), 1)
            .unwrap()
            .id()
            .unwrap();
        db.add_with_origin(&v, "pkg", "f", Parameter::Named("x"), 2)
            .unwrap();

        let locations = db.source_locations(id).unwrap();
        assert_eq!(
            locations,
            vec![ResolvedLocation {
                package: "pkg".to_string(),
                function: "f".to_string(),
                parameter: Some("x".to_string()),
            }]
        );
    }

    #[test]
    fn return_value_origin_has_no_parameter_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();
        let v = int_vec(&[7]);
        let id = db
            .add_with_origin(&v, "pkg", "f", Parameter::ReturnValue, 1)
            .unwrap()
            .id()
            .unwrap();
        let locations = db.source_locations(id).unwrap();
        assert_eq!(locations[0].parameter, None);
    }

    #[test]
    fn reopen_after_close_preserves_values_and_origins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let v = int_vec(&[1, 2, 3]);
        {
            let mut db = Database::open(&path, OpenMode::Write, true).unwrap();
            db.add_with_origin(&v, "pkg", "f", Parameter::Named("x"), 1)
                .unwrap();
            db.close().unwrap();
        }
        let mut db = Database::open(&path, OpenMode::Read, true).unwrap();
        assert_eq!(db.nb_values(), 1);
        assert_eq!(db.get_value(0).unwrap(), v);
        assert_eq!(db.source_locations(0).unwrap().len(), 1);
    }

    #[test]
    fn scenario_1_na_index_after_build() {
        // spec §8 scenario 1
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();

        db.add(&int_vec(&[1, 2, 3])).unwrap();
        db.add(&int_vec(&[1, 2, 3])).unwrap();
        db.add(&double_vec(&[1.0, na_double(), 3.0])).unwrap();

        assert_eq!(db.nb_values(), 2);
        let (_, rt) = db.get_metadata(0).unwrap();
        assert_eq!(rt.n_calls, 2);

        db.build_indexes().unwrap();
        let mut query = Query::new().with_has_na(true);
        db.update_query(&mut query).unwrap();
        let ids: Vec<u64> = query.view().iter().collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn scenario_2_origin_added_twice_stays_single_entry() {
        // spec §8 scenario 2, §9 9b
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();
        let id = db.add(&int_vec(&[1, 2, 3])).unwrap().id().unwrap();

        db.add_with_origin(&int_vec(&[1, 2, 3]), "pkg", "f", Parameter::Named("x"), 1)
            .unwrap();
        db.add_with_origin(&int_vec(&[1, 2, 3]), "pkg", "f", Parameter::Named("x"), 2)
            .unwrap();

        assert_eq!(db.source_locations(id).unwrap().len(), 1);
    }

    #[test]
    fn config_mismatch_is_detected() {
        // spec §9 9a: table counts are compared strictly against config.conf.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        {
            let mut db = Database::open(&path, OpenMode::Write, true).unwrap();
            db.add(&int_vec(&[1, 2, 3])).unwrap();
            db.close().unwrap();
        }
        // Corrupt the recorded count so it disagrees with every table.
        let cfg_path = path.join(config::CONFIG_FILE);
        let contents = fs::read_to_string(&cfg_path).unwrap();
        let rewritten: String = contents
            .lines()
            .map(|line| {
                if line.starts_with("nb_values=") {
                    "nb_values=99".to_string()
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&cfg_path, rewritten).unwrap();

        let err = Database::open(&path, OpenMode::Read, true).unwrap_err();
        assert!(matches!(err, Error::ConfigInconsistency { .. }));
    }

    #[test]
    fn forked_process_rejects_add() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();
        db.opened_pid = db.opened_pid.wrapping_add(1);
        let err = db.add(&int_vec(&[1])).unwrap_err();
        assert!(matches!(err, Error::ForkedProcess { .. }));
    }

    #[test]
    fn class_attribute_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();
        let v = Value::with_attributes(
            Data::Integer(vec![Some(1)]),
            Attributes {
                class: vec!["foo".to_string()],
                ..Default::default()
            },
        );
        let id = db.add(&v).unwrap().id().unwrap();
        assert_eq!(db.value_type_of(id), ValueType::Integer);
    }

    impl Database {
        fn value_type_of(&mut self, id: u64) -> ValueType {
            self.get_value(id).unwrap().value_type()
        }
    }
}

impl IndexContext for Database {
    fn nb_values(&self) -> u64 {
        self.static_meta.nb_values()
    }

    fn static_meta(&self, id: u64) -> Result<StaticMeta> {
        self.static_meta.get_loaded(id)
    }

    fn has_na(&self, id: u64) -> Result<bool> {
        let bytes = self.values.borrow_mut().read(id)?;
        codec::ValueView::parse(&bytes)?.has_na()
    }

    fn class_name_ids(&self, id: u64) -> Result<Vec<u32>> {
        Ok(self.provenance.classes(id).to_vec())
    }

    fn package_ids(&self, id: u64) -> Result<Vec<u32>> {
        Ok(self.provenance.origins(id).map(|l| l.package).collect())
    }

    fn function_ids(&self, id: u64) -> Result<Vec<u32>> {
        Ok(self.provenance.origins(id).map(|l| l.function).collect())
    }
}
