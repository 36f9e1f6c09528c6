//! `config.conf` wiring for an on-disk database (spec §4.1, §6).
//!
//! [`vdb_core::config::Config`] is the generic key=value reader/writer;
//! this module is the database-specific schema on top of it: which keys
//! exist, their defaults on a fresh directory, and the version/table-count
//! checks `Database::open` runs before trusting the rest of the files.

use std::path::Path;
use vdb_core::config::Config;
use vdb_core::error::Result;
use vdb_core::version;

/// File names under the database directory (spec §6 directory layout).
pub const CONFIG_FILE: &str = "config.conf";
pub const SEXP_TABLE: &str = "sexp_table.bin";
pub const HASHES_TABLE: &str = "hashes_table.bin";
pub const RUNTIME_META: &str = "runtime_meta.bin";
pub const STATIC_META: &str = "static_meta.bin";
pub const DEBUG_COUNTERS: &str = "debug_counters.bin";
pub const PACKAGES_TABLE: &str = "packages.txt";
pub const FUNCTIONS_TABLE: &str = "functions.txt";
pub const PARAMS_TABLE: &str = "params.txt";
pub const CLASSNAMES_TABLE: &str = "classnames.bin";
pub const DBNAMES_TABLE: &str = "dbnames.bin";
pub const GENERIC_STRINGS_TABLE: &str = "strings.txt";
pub const SEARCH_INDEX_DIR: &str = "search_index";

/// Database-level configuration, loaded from or written to `config.conf`.
pub struct DbConfig {
    inner: Config,
    path: std::path::PathBuf,
}

impl DbConfig {
    /// Loads `config.conf` from `dir` if present, validating the version
    /// rule (spec §4.1); otherwise stamps a fresh one with the running
    /// library's version and default table paths.
    pub fn open_or_create(dir: &Path) -> Result<(Self, bool)> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            let inner = Config::load(&path)?;
            version::check_compatible(&inner)?;
            Ok((DbConfig { inner, path }, false))
        } else {
            let mut inner = Config::new();
            version::write_version(&mut inner);
            inner.set("nb_values", "0");
            inner.set("sexp_table", SEXP_TABLE);
            inner.set("hashes_table", HASHES_TABLE);
            inner.set("runtime_meta", RUNTIME_META);
            inner.set("static_meta", STATIC_META);
            inner.set("index_last_computed", "0");
            inner.set("index_generated", "false");
            Ok((DbConfig { inner, path }, true))
        }
    }

    pub fn nb_values(&self) -> Result<u64> {
        self.inner.get_u64("nb_values")
    }

    pub fn set_nb_values(&mut self, n: u64) {
        self.inner.set("nb_values", n.to_string());
    }

    pub fn debug_counters_enabled(&self) -> bool {
        self.inner.has("debug_counters")
    }

    pub fn enable_debug_counters(&mut self) {
        self.inner.set("debug_counters", DEBUG_COUNTERS);
    }

    pub fn index_last_computed(&self) -> Result<u64> {
        self.inner.get_u64("index_last_computed")
    }

    pub fn set_index_last_computed(&mut self, n: u64) {
        self.inner.set("index_last_computed", n.to_string());
        self.inner.set("index_generated", "true");
    }

    pub fn has_search_index(&self) -> bool {
        self.inner.get("index_generated").map(|v| v == "true").unwrap_or(false)
    }

    pub fn set_compilation_time(&mut self, rfc3339: &str) {
        self.inner.set("compilation_time", rfc3339);
    }

    pub fn save(&self) -> Result<()> {
        self.inner.write_atomic(&self.path)
    }
}
