//! The `.LOCK` writer-exclusion protocol (spec §4.1, §7 item 8).
//!
//! A single `.LOCK` file in the database directory marks that some process
//! opened the database for writing and has not yet closed it cleanly. It
//! contains nothing but the opening process's pid and a timestamp, both
//! informational: presence of the file is the actual signal.
//!
//! `LockFile::acquire` is the only way to create one, and it refuses to run
//! if a lock already exists rather than silently stealing it — callers that
//! want to recover from an unclean shutdown must explicitly remove the
//! stale lock (after running an integrity check) and acquire again.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use vdb_core::error::{Error, Result};

const LOCK_FILE_NAME: &str = ".LOCK";

/// A held writer lock. Removes `.LOCK` when dropped.
pub struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    /// Path of the lock file for a database rooted at `db_dir`.
    pub fn path_for(db_dir: &Path) -> PathBuf {
        db_dir.join(LOCK_FILE_NAME)
    }

    /// Returns whether a lock is currently present.
    pub fn exists(db_dir: &Path) -> bool {
        Self::path_for(db_dir).exists()
    }

    /// Creates `.LOCK`, failing with [`Error::UncleanShutdown`] if one is
    /// already present. Callers should only call this after confirming (or
    /// repairing) the stale lock's implications, per spec §4.1.
    pub fn acquire(db_dir: &Path) -> Result<Self> {
        let path = Self::path_for(db_dir);
        if path.exists() {
            return Err(Error::UncleanShutdown { lock_path: path });
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::io("create lock file", &path, e))?;
        let contents = format!("pid={}\nopened_at={}\n", std::process::id(), Utc::now().to_rfc3339());
        file.write_all(contents.as_bytes())
            .map_err(|e| Error::io("write lock file", &path, e))?;
        file.sync_all()
            .map_err(|e| Error::io("fsync lock file", &path, e))?;
        Ok(LockFile {
            path,
            released: false,
        })
    }

    /// Removes a stale lock left by a previous unclean shutdown. Callers
    /// must have already validated the database (spec §4.1: integrity
    /// check before clearing a stale lock) before calling this.
    pub fn clear_stale(db_dir: &Path) -> Result<()> {
        let path = Self::path_for(db_dir);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io("remove stale lock file", &path, e)),
        }
    }

    /// Releases the lock early, surfacing any I/O error instead of logging
    /// it on drop.
    pub fn release(mut self) -> Result<()> {
        self.remove()
    }

    fn remove(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        fs::remove_file(&self.path).map_err(|e| Error::io("remove lock file", &self.path, e))?;
        self.released = true;
        Ok(())
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.remove() {
                tracing::error!(error = %e, path = %self.path.display(), "failed to remove lock file on close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_drop_leaves_no_lock_behind() {
        let dir = tempdir().unwrap();
        assert!(!LockFile::exists(dir.path()));
        {
            let _lock = LockFile::acquire(dir.path()).unwrap();
            assert!(LockFile::exists(dir.path()));
        }
        assert!(!LockFile::exists(dir.path()));
    }

    #[test]
    fn second_acquire_while_held_is_rejected() {
        let dir = tempdir().unwrap();
        let _lock = LockFile::acquire(dir.path()).unwrap();
        let err = LockFile::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, Error::UncleanShutdown { .. }));
    }

    #[test]
    fn clear_stale_allows_reacquiring() {
        let dir = tempdir().unwrap();
        let lock = LockFile::acquire(dir.path()).unwrap();
        std::mem::forget(lock); // simulate a crash: no Drop runs
        assert!(LockFile::exists(dir.path()));

        LockFile::clear_stale(dir.path()).unwrap();
        assert!(!LockFile::exists(dir.path()));
        let _lock = LockFile::acquire(dir.path()).unwrap();
    }
}
