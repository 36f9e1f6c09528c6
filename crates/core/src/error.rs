//! Error types shared across the vdb workspace.
//!
//! `Error` is the single error enum returned by every public entry point in
//! `vdb-core`, `vdb-storage`, `vdb-durability`, `vdb-search`, and `vdb-api`.
//! Its variants mirror the error taxonomy of the on-disk format: a version
//! mismatch or a configuration inconsistency aborts `open` outright, a
//! corruption report is recoverable and leaves the database open for
//! inspection, and an I/O error is propagated with enough context (path,
//! operation) to act on without re-opening the file.
//!
//! ## Propagation policy
//!
//! - `VersionMismatch`, `ConfigInconsistency`: fatal at `open`, never seen
//!   once a database is open.
//! - `UncleanShutdown`, `Corruption`, `Codec`, `ForkedProcess`: recoverable,
//!   surfaced to the caller.
//! - `IndexOutOfRange`: programmer error, callers should treat as fatal.
//! - `Io`: bubbled up unchanged, with path/operation context attached.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the vdb workspace.
#[derive(Debug, Error)]
pub enum Error {
    /// The on-disk configuration declares a library version incompatible
    /// with the version currently running (spec §4.1 version rule).
    #[error(
        "database version {stored} is not compatible with library version {running}"
    )]
    VersionMismatch {
        /// Version recorded in `config.conf`.
        stored: String,
        /// Version of the running library.
        running: String,
    },

    /// A per-table row count disagrees with the `nb_values` recorded in
    /// `config.conf` (spec §3 invariant 1).
    #[error("configuration inconsistency: table '{table}' has {actual} rows, expected {expected}")]
    ConfigInconsistency {
        /// Name of the table whose count disagreed.
        table: &'static str,
        /// Count declared by `config.conf`.
        expected: u64,
        /// Count observed by opening the table.
        actual: u64,
    },

    /// `.LOCK` was present when opening for write: the previous writer did
    /// not shut down cleanly.
    #[error("unclean shutdown detected ({lock_path})")]
    UncleanShutdown {
        /// Path of the stale lock file.
        lock_path: PathBuf,
    },

    /// A fast- or slow-pass integrity check found mismatched records.
    #[error("corruption detected in {offending_ids:?} value(s)")]
    Corruption {
        /// Ids that failed a fast- or slow-pass check.
        offending_ids: Vec<u64>,
    },

    /// An id was requested outside `[0, n_values)`.
    #[error("index {index} out of range (0..{len})")]
    IndexOutOfRange {
        /// The requested index.
        index: u64,
        /// The current number of values.
        len: u64,
    },

    /// Underlying file operation failed.
    #[error("I/O error during {operation} on {path}: {source}")]
    Io {
        /// What was being attempted (`"open"`, `"append"`, `"flush"`, ...).
        operation: &'static str,
        /// Path of the file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The byte codec failed to encode or decode a value; the caller's
    /// `add` treats this as "not stored" rather than propagating a panic.
    #[error("codec error: {0}")]
    Codec(String),

    /// `add` was called from a forked child that has not reopened the
    /// database; per spec §7 item 8 this is a no-op, not a hard failure.
    #[error("process forked since open (pid changed from {opened_pid} to {current_pid}); reopen the database")]
    ForkedProcess {
        /// Pid captured at `open` time.
        opened_pid: u32,
        /// Pid observed at the time of the failed call.
        current_pid: u32,
    },

    /// A bitmap or reverse-index file failed to parse.
    #[error("search index error: {0}")]
    Index(String),
}

impl Error {
    /// Wraps an I/O error with the operation and path that produced it.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Formats a version quadruple the way `config.conf` stores it.
pub fn format_version(major: u32, minor: u32, patch: u32, devel: u32) -> String {
    format!("{major}.{minor}.{patch}.{devel}")
}
