//! Provenance location tuple (spec §3, §4.5).

use crate::model::RETURN_VALUE_PARAM;

/// Where a value was observed: a `(package, function, parameter)` triple
/// of interned ids. `parameter == RETURN_VALUE_PARAM` means "this is the
/// function's return value" rather than a named argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub package: u32,
    pub function: u32,
    pub parameter: u32,
}

impl Location {
    pub const ENCODED_LEN: usize = 12;

    pub fn new(package: u32, function: u32, parameter: u32) -> Self {
        Location {
            package,
            function,
            parameter,
        }
    }

    pub fn return_value(package: u32, function: u32) -> Self {
        Location::new(package, function, RETURN_VALUE_PARAM)
    }

    pub fn is_return_value(&self) -> bool {
        self.parameter == RETURN_VALUE_PARAM
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..4].copy_from_slice(&self.package.to_le_bytes());
        buf[4..8].copy_from_slice(&self.function.to_le_bytes());
        buf[8..12].copy_from_slice(&self.parameter.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        Location {
            package: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            function: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            parameter: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_value_sentinel_round_trips() {
        let loc = Location::return_value(3, 7);
        assert!(loc.is_return_value());
        assert_eq!(Location::decode(&loc.encode()), loc);
    }
}
