//! `vdb-durability`: crash-safety primitives shared by the vdb façade
//! (spec §4.1, §4.5, §4.7, §5).
//!
//! - [`lock`]: the `.LOCK` writer-exclusion protocol.
//! - [`snapshot`]: rename-swap whole-table rewriting for the provenance
//!   tables.
//! - [`recovery`]: open-time row-count consistency checks and the
//!   integrity checker's report type.

pub mod lock;
pub mod recovery;
pub mod snapshot;

pub use lock::LockFile;
pub use recovery::{recovery_target, verify_table_counts, CheckReport};
pub use snapshot::rewrite_variable_table;
