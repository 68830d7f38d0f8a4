use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::OracleError;

/// Asset-class identifier; color 0 is reserved for embedded payloads.
pub type Color = u32;
pub type Amount = u64;
pub type Nonce = u64;
/// Hex-encoded transaction hash, big-endian display order.
pub type TxHash = String;
/// Base58check-encoded UTXO-chain address.
pub type ChainAddress = String;

/// The 20-byte identity shared by a chain address and its derived-ledger
/// counterpart. Displayed and serialized as lowercase hex.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerAddress(pub [u8; 20]);

impl LedgerAddress {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        LedgerAddress(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerAddress({})", self)
    }
}

impl FromStr for LedgerAddress {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(s)
            .map_err(|_| OracleError::MalformedTransaction(format!("bad ledger address: {s}")))?;
        let bytes: [u8; 20] = raw.try_into().map_err(|_| {
            OracleError::MalformedTransaction(format!("ledger address must be 20 bytes: {s}"))
        })?;
        Ok(LedgerAddress(bytes))
    }
}

impl Serialize for LedgerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LedgerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_address_hex_round_trip() {
        let addr = LedgerAddress([0xab; 20]);
        let text = addr.to_string();
        assert_eq!(text.len(), 40);
        assert_eq!(text.parse::<LedgerAddress>().unwrap(), addr);
        assert_eq!(format!("0x{text}").parse::<LedgerAddress>().unwrap(), addr);
    }

    #[test]
    fn ledger_address_rejects_wrong_length() {
        assert!("abcd".parse::<LedgerAddress>().is_err());
        assert!("zz".repeat(20).parse::<LedgerAddress>().is_err());
    }
}
