//! Per-value provenance: origins, classes, call ids, and source-db names
//! (spec §3, §4.5 L5).
//!
//! All four tables are kept fully in memory and snapshotted to disk only
//! on close, via the durability layer's rename-swap
//! ([`vdb_durability::rewrite_variable_table`]) — entries already on disk
//! are mutated in place here (a new origin added to an existing id, a
//! class id appended, ...), which the append-only variable table can't
//! represent directly. A `dirty` flag per table means an unmodified table
//! skips its rewrite entirely at close.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::path::{Path, PathBuf};
use vdb_core::error::Result;
use vdb_core::Location;
use vdb_storage::VariableTable;

/// Most values carry a handful of class ids at most; inline storage avoids
/// a heap allocation per value for the common case.
type ClassList = SmallVec<[u32; 4]>;
/// Most values are called far fewer than eight times before a merge or
/// query touches them.
type CallIdList = SmallVec<[u64; 8]>;

/// On-disk record: `u32 count` followed by `count` fixed-size elements.
fn encode_u32_set(ids: impl Iterator<Item = u32> + ExactSizeIterator) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + ids.len() * 4);
    buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
    for id in ids {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    buf
}

fn decode_u32_list(bytes: &[u8]) -> Vec<u32> {
    if bytes.len() < 4 {
        return Vec::new();
    }
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let start = 4 + i * 4;
        out.push(u32::from_le_bytes(bytes[start..start + 4].try_into().unwrap()));
    }
    out
}

fn encode_u64_list(ids: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + ids.len() * 8);
    buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
    for id in ids {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    buf
}

fn decode_u64_list(bytes: &[u8]) -> Vec<u64> {
    if bytes.len() < 4 {
        return Vec::new();
    }
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let start = 4 + i * 8;
        out.push(u64::from_le_bytes(bytes[start..start + 8].try_into().unwrap()));
    }
    out
}

fn encode_locations(locs: &FxHashSet<Location>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + locs.len() * Location::ENCODED_LEN);
    buf.extend_from_slice(&(locs.len() as u32).to_le_bytes());
    for loc in locs {
        buf.extend_from_slice(&loc.encode());
    }
    buf
}

fn decode_locations(bytes: &[u8]) -> FxHashSet<Location> {
    if bytes.len() < 4 {
        return FxHashSet::default();
    }
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let mut out = FxHashSet::default();
    for i in 0..count {
        let start = 4 + i * Location::ENCODED_LEN;
        out.insert(Location::decode(&bytes[start..start + Location::ENCODED_LEN]));
    }
    out
}

/// Per-id origins, classes, call ids, and source-db names.
pub struct ProvenanceStore {
    origins: Vec<FxHashSet<Location>>,
    classes: Vec<ClassList>,
    call_ids: Vec<CallIdList>,
    dbnames: Vec<FxHashSet<u32>>,
    origins_dirty: bool,
    classes_dirty: bool,
    call_ids_dirty: bool,
    dbnames_dirty: bool,
}

impl ProvenanceStore {
    /// Loads the four provenance tables from `dir`, or starts empty if
    /// they don't exist yet.
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(ProvenanceStore {
            origins: load_list(&dir.join("origins.bin"), decode_locations)?,
            classes: load_list(&dir.join("classes.bin"), |b| ClassList::from_vec(decode_u32_list(b)))?,
            call_ids: load_list(&dir.join("call_ids.bin"), |b| CallIdList::from_vec(decode_u64_list(b)))?,
            dbnames: load_list(&dir.join("dbs.bin"), |b| decode_u32_list(b).into_iter().collect())?,
            origins_dirty: false,
            classes_dirty: false,
            call_ids_dirty: false,
            dbnames_dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// Appends the empty provenance rows for a freshly inserted id (spec
    /// §4.4 step 4: "append empty entries in runtime/origins/classes/
    /// call-ids/dbnames").
    pub fn push_empty(&mut self) {
        self.origins.push(FxHashSet::default());
        self.classes.push(ClassList::new());
        self.call_ids.push(CallIdList::new());
        self.dbnames.push(FxHashSet::default());
        self.origins_dirty = true;
        self.classes_dirty = true;
        self.call_ids_dirty = true;
        self.dbnames_dirty = true;
    }

    /// Single-level append of one origin to `id`'s set (spec §9 open
    /// question 9b: the append is flat, never re-entrant). Returns
    /// whether the tuple was not already present.
    pub fn add_origin(&mut self, id: u64, location: Location) -> bool {
        let inserted = self.origins[id as usize].insert(location);
        if inserted {
            self.origins_dirty = true;
        }
        inserted
    }

    pub fn origins(&self, id: u64) -> impl Iterator<Item = &Location> {
        self.origins[id as usize].iter()
    }

    pub fn classes(&self, id: u64) -> &[u32] {
        &self.classes[id as usize]
    }

    /// Sets the class list for a freshly inserted id. Only valid while the
    /// list is still empty (classes "never shrink", spec §3 lifecycle);
    /// afterwards use [`ProvenanceStore::union_classes`].
    pub fn set_classes(&mut self, id: u64, class_ids: Vec<u32>) {
        debug_assert!(self.classes[id as usize].is_empty());
        if !class_ids.is_empty() {
            self.classes[id as usize] = ClassList::from_vec(class_ids);
            self.classes_dirty = true;
        }
    }

    /// Appends any class ids from `incoming` not already present, in their
    /// incoming order, preserving the existing prefix (spec §4.8 merge:
    /// "union provenance sets"; classes carry a semantically significant
    /// order, so a union appends rather than re-sorts).
    pub fn union_classes(&mut self, id: u64, incoming: &[u32]) {
        let existing = &mut self.classes[id as usize];
        for &class_id in incoming {
            if !existing.contains(&class_id) {
                existing.push(class_id);
                self.classes_dirty = true;
            }
        }
    }

    pub fn push_call_id(&mut self, id: u64, call_id: u64) {
        self.call_ids[id as usize].push(call_id);
        self.call_ids_dirty = true;
    }

    pub fn call_ids(&self, id: u64) -> &[u64] {
        &self.call_ids[id as usize]
    }

    pub fn add_dbname(&mut self, id: u64, dbname_id: u32) {
        if self.dbnames[id as usize].insert(dbname_id) {
            self.dbnames_dirty = true;
        }
    }

    pub fn dbnames(&self, id: u64) -> impl Iterator<Item = &u32> {
        self.dbnames[id as usize].iter()
    }

    /// Pads or truncates every table to exactly `n` rows, used by the
    /// integrity checker's repair path. Provenance is only snapshotted on a
    /// clean close, so a crash-session's on-disk state is always a prefix
    /// of (or equal to) the fast-check tables at crash time: repair almost
    /// always pads, truncation is a defensive fallback.
    pub fn resize_to(&mut self, n: u64) {
        let n = n as usize;
        if self.origins.len() < n {
            while self.origins.len() < n {
                self.push_empty();
            }
            return;
        }
        if self.origins.len() > n {
            self.origins.truncate(n);
            self.classes.truncate(n);
            self.call_ids.truncate(n);
            self.dbnames.truncate(n);
            self.origins_dirty = true;
            self.classes_dirty = true;
            self.call_ids_dirty = true;
            self.dbnames_dirty = true;
        }
    }

    /// Rewrites any provenance table that changed since open/last flush,
    /// via the rename-swap discipline in [`vdb_durability::snapshot`].
    pub fn flush(&mut self, dir: &Path) -> Result<()> {
        if self.origins_dirty {
            let origins = &self.origins;
            vdb_durability::rewrite_variable_table(&dir.join("origins.bin"), |t| {
                for set in origins {
                    t.append(&encode_locations(set))?;
                }
                Ok(())
            })?;
            self.origins_dirty = false;
        }
        if self.classes_dirty {
            let classes = &self.classes;
            vdb_durability::rewrite_variable_table(&dir.join("classes.bin"), |t| {
                for class_ids in classes {
                    t.append(&encode_u32_set(class_ids.iter().copied()))?;
                }
                Ok(())
            })?;
            self.classes_dirty = false;
        }
        if self.call_ids_dirty {
            let call_ids = &self.call_ids;
            vdb_durability::rewrite_variable_table(&dir.join("call_ids.bin"), |t| {
                for ids in call_ids {
                    t.append(&encode_u64_list(ids))?;
                }
                Ok(())
            })?;
            self.call_ids_dirty = false;
        }
        if self.dbnames_dirty {
            let dbnames = &self.dbnames;
            vdb_durability::rewrite_variable_table(&dir.join("dbs.bin"), |t| {
                for set in dbnames {
                    t.append(&encode_u32_set(set.iter().copied()))?;
                }
                Ok(())
            })?;
            self.dbnames_dirty = false;
        }
        Ok(())
    }
}

fn load_list<T>(path: &PathBuf, decode: impl Fn(&[u8]) -> T) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut table = VariableTable::open(path)?;
    let mut out = Vec::with_capacity(table.nb_values() as usize);
    for i in 0..table.nb_values() {
        out.push(decode(&table.read(i)?));
    }
    Ok(out)
}
