//! 32-byte ledger addresses.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Address of a record on the ledger (wallets, mints, derived records).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    /// Byte length of an address.
    pub const LEN: usize = 32;

    /// Sentinel "null address" used for empty slots.
    pub const NULL: Pubkey = Pubkey([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build an address from a 32-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Address with every byte set to `byte`. Handy for fixtures.
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 32])
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        let encoded = hex::encode(self.0);
        write!(f, "Pubkey(0x{}..{})", &encoded[..8], &encoded[56..])
    }
}

/// Error parsing a hex address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParsePubkeyError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

impl FromStr for Pubkey {
    type Err = ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| ParsePubkeyError::InvalidHex(e.to_string()))?;
        let len = bytes.len();
        Self::from_slice(&bytes).ok_or(ParsePubkeyError::InvalidLength(len))
    }
}

impl From<[u8; 32]> for Pubkey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sentinel() {
        assert!(Pubkey::NULL.is_null());
        assert!(Pubkey::default().is_null());
        assert!(!Pubkey::repeat_byte(1).is_null());
    }

    #[test]
    fn test_parse_display() {
        let key = Pubkey::repeat_byte(0xAB);
        let text = key.to_string();
        assert!(text.starts_with("0xabab"));
        assert_eq!(text.parse::<Pubkey>().unwrap(), key);

        // Prefix is optional
        assert_eq!(text[2..].parse::<Pubkey>().unwrap(), key);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("0x1234".parse::<Pubkey>(), Err(ParsePubkeyError::InvalidLength(2))));
        assert!(matches!("zz".parse::<Pubkey>(), Err(ParsePubkeyError::InvalidHex(_))));
    }
}
