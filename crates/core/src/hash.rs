//! 128-bit content hash used to dedup values (spec §4.4).
//!
//! The hash function is fixed across writers and readers, on-disk included:
//! XXH3-128 over the canonical serialized bytes of a value. It is not a
//! cryptographic hash, but its collision probability on random input
//! (≤ 2⁻¹²⁰) is low enough that a hit is treated as definitive equality —
//! the store never falls back to a byte-for-byte comparison on lookup.

use std::hash::{Hash, Hasher};

/// A 128-bit content hash, stored on disk as 16 native-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hash128(pub u128);

impl Hash128 {
    /// Size in bytes of the on-disk representation.
    pub const ENCODED_LEN: usize = 16;

    /// Computes the content hash of a byte slice.
    pub fn of(bytes: &[u8]) -> Self {
        Hash128(xxhash_rust::xxh3::xxh3_128(bytes))
    }

    /// Encodes as 16 little-endian bytes, matching the fixed-table record
    /// layout used by `hashes_table.bin`.
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    /// Decodes from 16 little-endian bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Hash128(u128::from_le_bytes(bytes))
    }

    /// Splits into two 64-bit halves, used by the in-memory dedup map's
    /// custom hasher/equality (spec §9: "a custom hasher hashes the 128-bit
    /// value, a custom equality compares both halves").
    pub fn halves(self) -> (u64, u64) {
        ((self.0 >> 64) as u64, self.0 as u64)
    }
}

impl Hash for Hash128 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (hi, lo) = self.halves();
        state.write_u64(hi);
        state.write_u64(lo);
    }
}

impl std::fmt::Display for Hash128 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let bytes = b"the quick brown fox";
        assert_eq!(Hash128::of(bytes), Hash128::of(bytes));
    }

    #[test]
    fn round_trips_through_bytes() {
        let h = Hash128::of(b"round trip me");
        assert_eq!(Hash128::from_bytes(h.to_bytes()), h);
    }

    #[test]
    fn distinct_inputs_differ() {
        assert_ne!(Hash128::of(b"a"), Hash128::of(b"b"));
    }
}
