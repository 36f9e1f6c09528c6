//! `vdb-api`: the database façade (spec §4.1, L8) plus the dedup,
//! identity-cache, and provenance layers it's built from (spec §4.4,
//! §4.5, L4–L5).
//!
//! [`database::Database`] is the only type most callers need: it wires
//! together `vdb-storage`'s tables, `vdb-durability`'s lock and
//! crash-safety protocol, and `vdb-search`'s index/query engine behind
//! the operations enumerated in spec §4.1. [`merge`] and [`check`] are
//! split into their own modules because each is sizeable on its own, but
//! both are `impl Database` blocks — there is exactly one façade type.

pub mod check;
pub mod config;
pub mod database;
pub mod dedup;
pub mod identity_cache;
pub mod merge;
pub mod provenance;

pub use database::{AddOutcome, Database, IdentityHint, OpenMode, Parameter};
pub use dedup::DedupIndex;
pub use identity_cache::IdentityCache;
pub use provenance::ProvenanceStore;
pub use vdb_search::Query;
