//! `vdb-storage`: the on-disk append-only storage engine (spec §4.2–§4.3,
//! L1–L3).
//!
//! - [`fixed_table`]: fixed-width record tables with an optional
//!   in-memory mirror.
//! - [`variable_table`]: variable-size payload tables addressed by an
//!   offset `FixedTable<u64>`.
//! - [`stable_vec`]: the chunked vector that gives `FixedTable`'s mirror
//!   stable element addresses.
//! - [`interning`]: dense-id string interning built on a variable table.

pub mod fixed_table;
pub mod interning;
pub mod stable_vec;
pub mod variable_table;

pub use fixed_table::{FixedRecord, FixedTable};
pub use interning::InterningTable;
pub use stable_vec::ChunkedVec;
pub use variable_table::{FrameWalkResult, VariableTable};
