//! Integrity checking and repair (spec §4.7).

use vdb_core::codec;
use vdb_core::error::Result;
use vdb_core::model::StaticMeta;
use vdb_core::Hash128;
use vdb_durability::{recovery_target, CheckReport};

use crate::database::Database;
use crate::dedup::DedupIndex;

impl Database {
    /// Checks every value's on-disk metadata against what re-deriving it
    /// from the raw bytes produces. `slow` additionally re-hashes each
    /// value against its recorded hash and walks the raw value table's
    /// framing, catching the half-appended-record case a fast pass can't
    /// see (spec §4.7, §9 9a). Returns the ids found inconsistent.
    pub fn check(&mut self, slow: bool) -> Result<Vec<u64>> {
        let mut report = CheckReport::new();
        let n = self.static_meta.nb_values();

        for id in 0..n {
            let recorded = self.static_meta.get_loaded(id)?;
            let bytes = match self.values.borrow_mut().read(id) {
                Ok(b) => b,
                Err(_) => {
                    report.record(id);
                    continue;
                }
            };
            let value = match codec::decode(&bytes) {
                Ok(v) => v,
                Err(_) => {
                    report.record(id);
                    continue;
                }
            };
            let derived = StaticMeta::derive(&value, bytes.len() as u64);
            if derived != recorded {
                report.record(id);
                continue;
            }

            if slow {
                match self.hashes.get_loaded(id) {
                    Ok(stored_hash) => {
                        let rehash = Hash128::of(&codec::encode(&value));
                        if rehash != stored_hash {
                            report.record(id);
                        }
                    }
                    Err(_) => report.record(id),
                }
            }
        }

        if slow {
            let walk = self.values.borrow_mut().walk_and_validate()?;
            for id in walk.well_formed_records..n {
                report.record(id);
            }
        }

        Ok(report.offending_ids)
    }

    /// Truncates every per-value table down to the shortest one and
    /// rebuilds in-memory indexes to match, recovering from a crash that
    /// left tables that should move in lockstep disagreeing on count
    /// (spec §4.7, §8 scenario 5, §9 9a).
    pub fn repair(&mut self) -> Result<()> {
        let counts = [
            ("sexp_table", self.values.borrow().nb_values()),
            ("hashes_table", self.hashes.nb_values()),
            ("static_meta", self.static_meta.nb_values()),
            ("runtime_meta", self.runtime_meta.nb_values()),
        ];
        let target = recovery_target(&counts);

        self.values.borrow_mut().truncate_to_count(target)?;
        self.hashes.truncate_to(target)?;
        self.hashes.load_all()?;
        self.static_meta.truncate_to(target)?;
        self.static_meta.load_all()?;
        self.runtime_meta.truncate_to(target)?;
        self.runtime_meta.load_all()?;
        if let Some(dc) = &mut self.debug_counters {
            if dc.nb_values() != target {
                dc.truncate_to(target)?;
                dc.load_all()?;
            }
        }
        self.provenance.resize_to(target);

        self.rebuild_dedup_index()?;
        self.config.set_nb_values(target);
        self.config.save()?;
        Ok(())
    }

    pub(crate) fn rebuild_dedup_index(&mut self) -> Result<()> {
        let mut dedup = DedupIndex::new();
        for id in 0..self.hashes.nb_values() {
            dedup.insert(self.hashes.get_loaded(id)?, id);
        }
        self.dedup = dedup;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::database::{Database, OpenMode};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use vdb_core::value::Data;
    use vdb_core::Value;

    fn int_vec(values: &[i32]) -> Value {
        Value::new(Data::Integer(values.iter().map(|&v| Some(v)).collect()))
    }

    #[test]
    fn clean_database_has_no_offending_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path(), OpenMode::Write, true).unwrap();
        db.add(&int_vec(&[1, 2, 3])).unwrap();
        db.add(&int_vec(&[4, 5])).unwrap();
        assert!(db.check(true).unwrap().is_empty());
    }

    #[test]
    fn scenario_5_truncated_hash_table_is_detected_and_repaired() {
        // spec §8 scenario 5: a crash between "append value bytes" and
        // "append hash" leaves the hash table short of the value table.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        {
            let mut db = Database::open(&path, OpenMode::Write, true).unwrap();
            db.add(&int_vec(&[1, 2, 3])).unwrap();
            db.add(&int_vec(&[4, 5])).unwrap();
            db.close().unwrap();
        }

        // Drop the hash table's last record from both the data file and
        // its sidecar count, as if `flush_all` crashed after flushing
        // `sexp_table`/`static_meta` but before flushing `hashes_table`.
        let hashes_path = path.join("hashes_table.bin");
        let len = std::fs::metadata(&hashes_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&hashes_path).unwrap();
        file.set_len(len - 16).unwrap();
        std::fs::write(path.join("hashes_table.conf"), "nb_values=1\nrecord_size=16\n").unwrap();

        // Re-create an unclean-shutdown lock so `open` runs the repair path.
        std::fs::write(path.join(".LOCK"), b"stale").unwrap();

        let db = Database::open(&path, OpenMode::Write, true).unwrap();
        assert_eq!(db.nb_values(), 1);
    }

    #[test]
    fn corrupted_value_bytes_are_reported_by_slow_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        {
            let mut db = Database::open(&path, OpenMode::Write, true).unwrap();
            db.add(&int_vec(&[1, 2, 3])).unwrap();
            db.close().unwrap();
        }

        let data_path = path.join("sexp_table.bin");
        let mut file = OpenOptions::new().write(true).open(&data_path).unwrap();
        // Flip a byte inside the encoded payload, past the 8-byte size +
        // 1-byte flags frame header, so the re-hash on the slow pass no
        // longer matches.
        file.seek(SeekFrom::Start(12)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let mut db = Database::open(&path, OpenMode::Read, true).unwrap();
        let offending = db.check(true).unwrap();
        assert_eq!(offending, vec![0]);
    }
}
