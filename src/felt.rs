use std::{fmt, str::FromStr};

use alloy_primitives::U256;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Starknet field prime, `2^251 + 17 * 2^192 + 1`.
pub const FIELD_PRIME: U256 = U256::from_limbs([1, 0, 0, 0x0800_0000_0000_0011]);

// sn_keccak("Transfer")
const TRANSFER_SELECTOR_BYTES: [u8; 32] = [
    0x00, 0x99, 0xcd, 0x8b, 0xde, 0x55, 0x78, 0x14,
    0x84, 0x2a, 0x31, 0x21, 0xe8, 0xdd, 0xfd, 0x43,
    0x3a, 0x53, 0x9b, 0x8c, 0x9f, 0x14, 0xbf, 0x31,
    0xeb, 0xf1, 0x08, 0xd1, 0x2e, 0x61, 0x96, 0xe9,
];

pub static TRANSFER_SELECTOR: Lazy<Felt> =
    Lazy::new(|| Felt(U256::from_be_bytes(TRANSFER_SELECTOR_BYTES)));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeltError {
    #[error("empty field element")]
    Empty,
    #[error("invalid hex field element: {0}")]
    InvalidHex(String),
    #[error("invalid decimal field element: {0}")]
    InvalidDecimal(String),
    #[error("field element byte sequence too long: {0} bytes")]
    TooLong(usize),
    #[error("value {0} is not below the field prime")]
    OutOfRange(String),
}

/// A Starknet field element.
///
/// Nodes and indexing services hand felts back as hex strings, decimal strings,
/// JSON numbers or raw bytes. Every one of those funnels into this type, and all
/// decode logic works on [`Felt::to_hex`] / [`Felt::to_u256`] only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Felt(U256);

impl Felt {
    pub const ZERO: Felt = Felt(U256::ZERO);

    pub fn from_u256(value: U256) -> Result<Self, FeltError> {
        if value >= FIELD_PRIME {
            return Err(FeltError::OutOfRange(format!("{value:#x}")));
        }
        Ok(Felt(value))
    }

    pub fn from_hex(s: &str) -> Result<Self, FeltError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() {
            return Err(FeltError::Empty);
        }
        if digits.len() > 64 {
            return Err(FeltError::InvalidHex(s.to_string()));
        }
        let value =
            U256::from_str_radix(digits, 16).map_err(|_| FeltError::InvalidHex(s.to_string()))?;
        Self::from_u256(value)
    }

    pub fn from_dec(s: &str) -> Result<Self, FeltError> {
        if s.is_empty() {
            return Err(FeltError::Empty);
        }
        let value =
            U256::from_str_radix(s, 10).map_err(|_| FeltError::InvalidDecimal(s.to_string()))?;
        Self::from_u256(value)
    }

    /// Big-endian bytes, at most 32 of them.
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self, FeltError> {
        let value = U256::try_from_be_slice(bytes).ok_or(FeltError::TooLong(bytes.len()))?;
        Self::from_u256(value)
    }

    /// Canonical form: `0x`, lower case, no leading zeros, `0x0` for zero.
    pub fn to_hex(&self) -> String {
        format!("{:#x}", self.0)
    }

    pub fn to_u256(&self) -> U256 {
        self.0
    }
}

impl From<u64> for Felt {
    fn from(value: u64) -> Self {
        Felt(U256::from(value))
    }
}

impl FromStr for Felt {
    type Err = FeltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("0x") || s.starts_with("0X") {
            Felt::from_hex(s)
        } else {
            Felt::from_dec(s)
        }
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeltRepr {
    Text(String),
    Number(u64),
    Bytes(Vec<u8>),
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let felt = match FeltRepr::deserialize(deserializer)? {
            FeltRepr::Text(s) => s.parse(),
            FeltRepr::Number(n) => Ok(Felt::from(n)),
            FeltRepr::Bytes(b) => Felt::from_be_slice(&b),
        };
        felt.map_err(serde::de::Error::custom)
    }
}

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_representation_normalizes_to_the_same_hex() {
        let from_hex: Felt = "0x00000ABC".parse().unwrap();
        let from_dec: Felt = "2748".parse().unwrap();
        let from_bytes = Felt::from_be_slice(&[0x0a, 0xbc]).unwrap();
        let from_json: Felt = serde_json::from_str("2748").unwrap();
        let from_json_bytes: Felt = serde_json::from_str("[0, 10, 188]").unwrap();

        for felt in [from_dec, from_bytes, from_json, from_json_bytes] {
            assert_eq!(felt, from_hex);
        }
        assert_eq!(from_hex.to_hex(), "0xabc");
        assert_eq!(from_hex.to_u256(), U256::from(2748u64));
    }

    #[test]
    fn zero_is_0x0() {
        assert_eq!(Felt::ZERO.to_hex(), "0x0");
        assert_eq!("0x0000".parse::<Felt>().unwrap().to_hex(), "0x0");
    }

    #[test]
    fn rejects_values_outside_the_field() {
        assert!(matches!(Felt::from_u256(FIELD_PRIME), Err(FeltError::OutOfRange(_))));
        assert!(Felt::from_u256(FIELD_PRIME - U256::from(1u64)).is_ok());
        assert!(matches!(Felt::from_be_slice(&[1u8; 33]), Err(FeltError::TooLong(33))));
        assert!(matches!("0xzz".parse::<Felt>(), Err(FeltError::InvalidHex(_))));
        assert!(matches!("12ab".parse::<Felt>(), Err(FeltError::InvalidDecimal(_))));
        assert_eq!("0x".parse::<Felt>(), Err(FeltError::Empty));
    }

    #[test]
    fn transfer_selector_matches_known_value() {
        assert_eq!(
            TRANSFER_SELECTOR.to_hex(),
            "0x99cd8bde557814842a3121e8ddfd433a539b8c9f14bf31ebf108d12e6196e9"
        );
    }

    #[test]
    fn serializes_as_canonical_hex() {
        let felt: Felt = "0x00DEAD".parse().unwrap();
        assert_eq!(serde_json::to_string(&felt).unwrap(), "\"0xdead\"");
    }
}
