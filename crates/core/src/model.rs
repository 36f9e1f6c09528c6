//! Fixed-width record types backing `static_meta.bin`, `runtime_meta.bin`,
//! and `debug_counters.bin` (spec §3, §6).
//!
//! Every type here has a manual `encode`/`decode` pair instead of a derived
//! `serde` impl: these records sit on the hot path of `add` and are read
//! back by id, so their on-disk layout must be a fixed number of bytes with
//! no framing overhead, independent of whatever `serde` would choose.
//! Multi-byte fields are little-endian, matching the rest of the on-disk
//! format.

use crate::error::{Error, Result};

/// Type discriminant for a stored value (spec §4.6 `types_index[0..26]`).
///
/// Slots 16–25 are reserved for structured/generic value kinds the codec
/// may introduce without changing the search-index layout; `from_tag`
/// maps any tag in that range to [`ValueType::Reserved`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ValueType {
    Null = 0,
    Logical = 1,
    Integer = 2,
    Double = 3,
    Complex = 4,
    Character = 5,
    Raw = 6,
    List = 7,
    Closure = 8,
    Environment = 9,
    Symbol = 10,
    Language = 11,
    Promise = 12,
    Special = 13,
    Builtin = 14,
    S4 = 15,
    Reserved = 16,
}

impl ValueType {
    /// Number of fixed type-index bitmaps the search layer maintains.
    pub const COUNT: u32 = 26;

    /// Maps a raw tag (as stored in `static_meta.type_tag`) to a `ValueType`.
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            0 => ValueType::Null,
            1 => ValueType::Logical,
            2 => ValueType::Integer,
            3 => ValueType::Double,
            4 => ValueType::Complex,
            5 => ValueType::Character,
            6 => ValueType::Raw,
            7 => ValueType::List,
            8 => ValueType::Closure,
            9 => ValueType::Environment,
            10 => ValueType::Symbol,
            11 => ValueType::Language,
            12 => ValueType::Promise,
            13 => ValueType::Special,
            14 => ValueType::Builtin,
            15 => ValueType::S4,
            _ => ValueType::Reserved,
        }
    }

    /// The raw tag stored in `static_meta.type_tag`.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Whether the core ever stores this type as a top-level id.
    ///
    /// Environments and closures hold cyclic references to other values;
    /// the codec elides them at serialize time and `add` returns
    /// "not stored" for them (spec §9 "Environments and cycles").
    pub fn is_storable(self) -> bool {
        !matches!(self, ValueType::Environment | ValueType::Closure)
    }
}

/// Immutable metadata derived once at `add` time (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticMeta {
    pub type_tag: u32,
    pub size_bytes: u64,
    pub length: u64,
    pub n_attributes: u64,
    pub n_dims: u32,
    pub n_rows: u32,
}

impl StaticMeta {
    /// On-disk record size in bytes.
    pub const ENCODED_LEN: usize = 4 + 8 + 8 + 8 + 4 + 4;

    /// Derives the immutable metadata for a freshly-encoded value (spec
    /// §4.4 "Static-meta derivation"). `size_bytes` is the length of the
    /// value's canonical encoding, not of any in-memory representation.
    pub fn derive(value: &crate::value::Value, size_bytes: u64) -> Self {
        StaticMeta {
            type_tag: value.raw_type_tag(),
            size_bytes,
            length: value.length(),
            n_attributes: value.n_attributes(),
            n_dims: value.n_dims(),
            n_rows: value.n_rows(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        ValueType::from_tag(self.type_tag)
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..4].copy_from_slice(&self.type_tag.to_le_bytes());
        buf[4..12].copy_from_slice(&self.size_bytes.to_le_bytes());
        buf[12..20].copy_from_slice(&self.length.to_le_bytes());
        buf[20..28].copy_from_slice(&self.n_attributes.to_le_bytes());
        buf[28..32].copy_from_slice(&self.n_dims.to_le_bytes());
        buf[32..36].copy_from_slice(&self.n_rows.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::ENCODED_LEN {
            return Err(Error::Codec(format!(
                "static_meta record has {} bytes, expected {}",
                buf.len(),
                Self::ENCODED_LEN
            )));
        }
        Ok(StaticMeta {
            type_tag: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            size_bytes: u64::from_le_bytes(buf[4..12].try_into().unwrap()),
            length: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            n_attributes: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
            n_dims: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            n_rows: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
        })
    }
}

/// Mutable counters updated on every re-observation of a value (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeMeta {
    pub n_calls: u64,
    pub n_merges: u32,
}

impl RuntimeMeta {
    pub const ENCODED_LEN: usize = 8 + 4;

    /// Runtime metadata for a value's first observation.
    pub fn first_seen() -> Self {
        RuntimeMeta {
            n_calls: 1,
            n_merges: 0,
        }
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..8].copy_from_slice(&self.n_calls.to_le_bytes());
        buf[8..12].copy_from_slice(&self.n_merges.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::ENCODED_LEN {
            return Err(Error::Codec(format!(
                "runtime_meta record has {} bytes, expected {}",
                buf.len(),
                Self::ENCODED_LEN
            )));
        }
        Ok(RuntimeMeta {
            n_calls: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            n_merges: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        })
    }
}

/// Optional debug-mode counters (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugCounters {
    pub n_maybe_shared: u64,
    pub n_sexp_address_opt: u64,
}

impl DebugCounters {
    pub const ENCODED_LEN: usize = 8 + 8;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..8].copy_from_slice(&self.n_maybe_shared.to_le_bytes());
        buf[8..16].copy_from_slice(&self.n_sexp_address_opt.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::ENCODED_LEN {
            return Err(Error::Codec(format!(
                "debug_counters record has {} bytes, expected {}",
                buf.len(),
                Self::ENCODED_LEN
            )));
        }
        Ok(DebugCounters {
            n_maybe_shared: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            n_sexp_address_opt: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        })
    }
}

/// Sentinel parameter id meaning "this origin is the function's return
/// value" rather than a named parameter (spec §3).
pub const RETURN_VALUE_PARAM: u32 = u32::MAX;
