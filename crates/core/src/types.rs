//! Core types shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A 32-byte content hash (block hash, transaction hash, or bytecode hash).
///
/// Hashes are rendered as lowercase hex everywhere: in logs, in the store's
/// companion text columns, and on the wire towards the address cache.
/// The default value is the all-zero hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Wrap a raw 32-byte array.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a 64-character hex literal.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let mut bytes = [0u8; 32];
        if s.len() != 64 {
            return Err(CoreError::InvalidHash(s.to_string()));
        }
        hex::decode_to_slice(s, &mut bytes).map_err(|_| CoreError::InvalidHash(s.to_string()))?;
        Ok(Hash(bytes))
    }

    /// Build from an arbitrary byte slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidHash(hex::encode(bytes)))?;
        Ok(Hash(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl FromStr for Hash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to an unspent transaction output: originating hash plus index.
///
/// The node renders these as `<hash>:<index>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputPointer {
    /// Hash of the transaction that created the output.
    pub transaction: Hash,
    /// Index of the output within that transaction.
    pub index: u32,
}

impl fmt::Display for OutputPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction, self.index)
    }
}

impl FromStr for OutputPointer {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, index) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidOutputPointer(s.to_string()))?;
        let transaction = Hash::from_hex(hash)?;
        let index = index
            .parse()
            .map_err(|_| CoreError::InvalidOutputPointer(s.to_string()))?;
        Ok(OutputPointer { transaction, index })
    }
}

impl Serialize for OutputPointer {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OutputPointer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Closed set of transaction kinds tracked by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Coinbase-style block reward payout.
    Mint,
    /// Plain value transfer.
    ValueTransfer,
    /// Oracle data request.
    DataRequest,
    /// Witness commitment to a data request.
    Commit,
    /// Witness reveal for a data request.
    Reveal,
    /// Final tally of a data request.
    Tally,
}

impl TransactionKind {
    /// All kinds, in the order they appear inside a block.
    pub const ALL: [TransactionKind; 6] = [
        TransactionKind::Mint,
        TransactionKind::ValueTransfer,
        TransactionKind::DataRequest,
        TransactionKind::Commit,
        TransactionKind::Reveal,
        TransactionKind::Tally,
    ];

    /// Stable label, also used in the `hashes.type` column.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Mint => "mint_txn",
            TransactionKind::ValueTransfer => "value_transfer_txn",
            TransactionKind::DataRequest => "data_request_txn",
            TransactionKind::Commit => "commit_txn",
            TransactionKind::Reveal => "reveal_txn",
            TransactionKind::Tally => "tally_txn",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mint_txn" => Ok(TransactionKind::Mint),
            "value_transfer_txn" => Ok(TransactionKind::ValueTransfer),
            "data_request_txn" => Ok(TransactionKind::DataRequest),
            "commit_txn" => Ok(TransactionKind::Commit),
            "reveal_txn" => Ok(TransactionKind::Reveal),
            "tally_txn" => Ok(TransactionKind::Tally),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_round_trip() {
        let literal = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let hash = Hash::from_hex(literal).unwrap();
        assert_eq!(hash.to_string(), literal);
    }

    #[test]
    fn hash_default_is_all_zero() {
        assert_eq!(Hash::default(), Hash::new([0u8; 32]));
    }

    #[test]
    fn hash_rejects_bad_literals() {
        assert!(Hash::from_hex("abc").is_err());
        assert!(Hash::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn output_pointer_parse() {
        let literal = format!("{}:7", "11".repeat(32));
        let pointer: OutputPointer = literal.parse().unwrap();
        assert_eq!(pointer.index, 7);
        assert_eq!(pointer.to_string(), literal);

        assert!("nocolon".parse::<OutputPointer>().is_err());
        assert!(format!("{}:x", "11".repeat(32))
            .parse::<OutputPointer>()
            .is_err());
    }

    #[test]
    fn kind_labels_round_trip() {
        for kind in TransactionKind::ALL {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
        assert!("block".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn hash_serde_is_hex() {
        let hash = Hash::new([0xab; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
