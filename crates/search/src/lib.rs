//! `vdb-search`: compressed bitmap indexes and the query engine (spec
//! §4.6, L6–L7).
//!
//! - [`bitmap_index`]: the fixed type/length/ndims/NA/class/attribute
//!   bitmaps and the bucketing math behind the length and ndims axes.
//! - [`reverse_index`]: the bucketed `key -> bitmap` index used for
//!   high-cardinality keys (class names, packages, functions).
//! - [`builder`]: sharded, incremental index construction over an
//!   [`builder::IndexContext`] the caller implements.
//! - [`query`]: predicate composition, bitmap algebra, and uniform
//!   sampling over a built [`bitmap_index::BitmapIndexSet`].
//! - [`persist`]: saves and loads a [`bitmap_index::BitmapIndexSet`] to
//!   the `search_index/` directory of an on-disk database.

pub mod bitmap_index;
pub mod builder;
pub mod persist;
pub mod query;
pub mod reverse_index;

pub use bitmap_index::{BitmapIndexSet, NB_LENGTH_BUCKETS, NB_NDIMS_BUCKETS};
pub use builder::{build_indexes, IndexContext};
pub use query::Query;
pub use reverse_index::ReverseIndex;
