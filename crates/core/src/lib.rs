//! `vdb-core`: the value model, byte codec, content hash, and error types
//! shared by every other crate in the workspace.
//!
//! Nothing in this crate touches a filesystem; it is the pure, in-memory
//! foundation the storage, durability, search, and façade layers build on.

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod location;
pub mod model;
pub mod value;
pub mod version;

pub use error::{Error, Result};
pub use hash::Hash128;
pub use location::Location;
pub use model::{DebugCounters, RuntimeMeta, StaticMeta, ValueType, RETURN_VALUE_PARAM};
pub use value::{Attributes, Data, Value};
