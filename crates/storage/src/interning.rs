//! Interning table: dense integer ids for repeated small strings (spec §3,
//! L3).
//!
//! Used for package, function, parameter, class, database, and generic
//! string names. Id 0 is always the empty string, reserved as the
//! "absent" sentinel; every other id is assigned in first-seen order and
//! is stable across reopen because the backing [`VariableTable`] is
//! itself append-only.

use crate::variable_table::VariableTable;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use vdb_core::error::Result;

/// A `string -> id` interning table backed by a length-prefixed UTF-8
/// variable table (spec §6 `*.txt` files).
pub struct InterningTable {
    strings: VariableTable,
    ids: FxHashMap<String, u32>,
}

impl InterningTable {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut strings = VariableTable::open(path)?;
        let mut ids = FxHashMap::default();

        if strings.nb_values() == 0 {
            strings.append(b"")?;
        }
        for i in 0..strings.nb_values() {
            let bytes = strings.read(i)?;
            let s = String::from_utf8_lossy(&bytes).into_owned();
            ids.entry(s).or_insert(i as u32);
        }

        Ok(InterningTable { strings, ids })
    }

    pub fn nb_values(&self) -> u64 {
        self.strings.nb_values()
    }

    /// Returns `s`'s id, interning it if this is the first time it is seen.
    pub fn intern(&mut self, s: &str) -> Result<u32> {
        if let Some(&id) = self.ids.get(s) {
            return Ok(id);
        }
        let id = self.strings.append(s.as_bytes())? as u32;
        self.ids.insert(s.to_string(), id);
        Ok(id)
    }

    /// Looks up an existing id without interning.
    pub fn id_of(&self, s: &str) -> Option<u32> {
        self.ids.get(s).copied()
    }

    /// Resolves an id back to its string.
    pub fn read(&mut self, id: u32) -> Result<String> {
        let bytes = self.strings.read(id as u64)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Fsyncs the backing variable table and its offset sidecar.
    pub fn flush(&mut self) -> Result<()> {
        self.strings.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_string_is_id_zero() {
        let dir = tempdir().unwrap();
        let mut t = InterningTable::open(dir.path().join("names.bin")).unwrap();
        assert_eq!(t.read(0).unwrap(), "");
        assert_eq!(t.intern("").unwrap(), 0);
    }

    #[test]
    fn repeated_strings_reuse_the_same_id() {
        let dir = tempdir().unwrap();
        let mut t = InterningTable::open(dir.path().join("names.bin")).unwrap();
        let a1 = t.intern("alpha").unwrap();
        let b = t.intern("beta").unwrap();
        let a2 = t.intern("alpha").unwrap();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn ids_are_stable_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("names.bin");
        let alpha_id = {
            let mut t = InterningTable::open(&path).unwrap();
            t.intern("alpha").unwrap()
        };
        let mut t = InterningTable::open(&path).unwrap();
        assert_eq!(t.id_of("alpha"), Some(alpha_id));
        assert_eq!(t.intern("alpha").unwrap(), alpha_id);
    }
}
