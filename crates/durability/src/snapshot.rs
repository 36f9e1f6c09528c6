//! Rename-swap rewriting for whole-table snapshots (spec §4.5, §5).
//!
//! Most tables in vdb are pure appends and never need this: a crash mid
//! append just leaves a dangling tail that recovery truncates away. The
//! provenance tables (origins, classes, call ids, generic names) are
//! different — closing the database rewrites each one wholesale from its
//! in-memory state, because entries already on disk are mutated in place
//! (a new location added to an existing origin, for instance) rather than
//! only appended. Rewriting a live data file in place would leave a reader
//! looking at a half-written file if the process died mid-rewrite, so the
//! rewrite always goes to a fresh `-new` file first and is swapped into
//! place by rename, which POSIX guarantees is atomic.

use std::fs;
use std::path::{Path, PathBuf};
use vdb_core::error::{Error, Result};
use vdb_storage::VariableTable;

/// Rewrites the variable table at `data_path` from scratch: `write_records`
/// is handed a fresh, empty table to append the complete new contents to,
/// after which the new data and offset files are fsynced and renamed over
/// the originals.
pub fn rewrite_variable_table<F>(data_path: &Path, write_records: F) -> Result<()>
where
    F: FnOnce(&mut VariableTable) -> Result<()>,
{
    let new_data_path = staging_path(data_path);
    let new_offsets_path = offsets_path_for(&new_data_path);

    {
        let mut new_table = VariableTable::open(&new_data_path)?;
        write_records(&mut new_table)?;
        new_table.flush()?;
    }

    fs::rename(&new_data_path, data_path)
        .map_err(|e| Error::io("rename snapshot into place", data_path, e))?;
    let offsets_path = offsets_path_for(data_path);
    fs::rename(&new_offsets_path, &offsets_path)
        .map_err(|e| Error::io("rename snapshot offsets into place", &offsets_path, e))?;

    // The offsets file is itself a `FixedTable`, whose row count lives in a
    // `.conf` sidecar (fixed_table.rs) rather than being derivable from file
    // length alone. Swap that sidecar too, or a reopened table re-reads the
    // pre-rewrite count against the post-rewrite data.
    let new_offsets_sidecar = sidecar_path(&new_offsets_path);
    let offsets_sidecar = sidecar_path(&offsets_path);
    fs::rename(&new_offsets_sidecar, &offsets_sidecar)
        .map_err(|e| Error::io("rename snapshot offsets sidecar into place", &offsets_sidecar, e))?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("table");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("bin");
    path.with_file_name(format!("{stem}-new.{ext}"))
}

fn offsets_path_for(data_path: &Path) -> PathBuf {
    let stem = data_path.file_stem().and_then(|s| s.to_str()).unwrap_or("table");
    let ext = data_path.extension().and_then(|s| s.to_str()).unwrap_or("bin");
    data_path.with_file_name(format!("{stem}_offsets.{ext}"))
}

fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("conf")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rewrite_replaces_contents_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("origins.bin");
        {
            let mut t = VariableTable::open(&path).unwrap();
            t.append(b"old-1").unwrap();
            t.append(b"old-2").unwrap();
        }

        rewrite_variable_table(&path, |t| {
            t.append(b"new-1")?;
            Ok(())
        })
        .unwrap();

        let mut t = VariableTable::open(&path).unwrap();
        assert_eq!(t.nb_values(), 1);
        assert_eq!(t.read(0).unwrap(), b"new-1");
    }

    #[test]
    fn staging_files_do_not_survive_a_successful_rewrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("origins.bin");
        rewrite_variable_table(&path, |t| {
            t.append(b"only")?;
            Ok(())
        })
        .unwrap();
        assert!(!staging_path(&path).exists());
        assert!(!staging_path(&offsets_path_for(&path)).exists());
    }
}
