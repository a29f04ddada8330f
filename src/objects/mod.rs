//! Chain and wallet data types exchanged with full-node peers and persisted through the
//! [`StateStore`](crate::store::StateStore).
//!
//! Every hash in this module is a SHA-256 digest represented by [`Bytes32`]. Block header hashes
//! and coin names are always derived locally from the received fields, so a peer can never assert
//! an identity that does not match the data it sent.

use core::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

mod block;
pub use block::{
    EndOfSubSlotSummary, Foliage, FoliageTransactionBlock, G1Element, G2Element, HeaderBlock,
    HeaderBlockRecord, ProofOfSpace, RewardChainBlock,
};

mod coin;
pub use coin::{Coin, CoinRecord, CoinSpend, CoinState, Program};

pub mod merkle;

mod transaction;
pub use transaction::{
    AdditionalCoinSpend, DerivationRecord, MempoolInclusionStatus, SpendBundle,
    TransactionRecord, WalletAction,
};

mod weight_proof;
pub use weight_proof::{SubEpochData, WeightProof};

// BYTES32
// ================================================================================================

/// A 32-byte digest. Displayed and serialized as lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bytes32([u8; 32]);

impl Bytes32 {
    pub const ZERO: Bytes32 = Bytes32([0; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex string, with or without a `0x` prefix.
    pub fn from_hex(value: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(value.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Bytes32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Bytes32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Bytes32::from_hex(&value).map_err(D::Error::custom)
    }
}

// HASHING HELPERS
// ================================================================================================

/// Returns the SHA-256 digest of the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> Bytes32 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Bytes32(hasher.finalize().into())
}

/// Feeds a value's canonical byte encoding into a running hash.
pub(crate) trait HashInto {
    fn hash_into(&self, hasher: &mut Sha256);
}

impl HashInto for Bytes32 {
    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.0);
    }
}

impl HashInto for u8 {
    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update([*self]);
    }
}

impl HashInto for u32 {
    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.to_be_bytes());
    }
}

impl HashInto for u64 {
    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.to_be_bytes());
    }
}

impl HashInto for u128 {
    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.to_be_bytes());
    }
}

impl HashInto for [u8] {
    fn hash_into(&self, hasher: &mut Sha256) {
        (self.len() as u32).hash_into(hasher);
        hasher.update(self);
    }
}

impl<T: HashInto> HashInto for Option<T> {
    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            None => hasher.update([0u8]),
            Some(value) => {
                hasher.update([1u8]);
                value.hash_into(hasher);
            },
        }
    }
}

impl<T: HashInto> HashInto for Vec<T> {
    fn hash_into(&self, hasher: &mut Sha256) {
        (self.len() as u32).hash_into(hasher);
        for item in self {
            item.hash_into(hasher);
        }
    }
}

/// Hashes a single value through its [`HashInto`] encoding.
pub(crate) fn hash_of<T: HashInto + ?Sized>(value: &T) -> Bytes32 {
    let mut hasher = Sha256::new();
    value.hash_into(&mut hasher);
    Bytes32(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::Bytes32;

    #[test]
    fn bytes32_hex_round_trip_accepts_prefix() {
        let value = Bytes32::new([0xab; 32]);
        let parsed = Bytes32::from_hex(&format!("0x{}", value.to_hex())).unwrap();
        assert_eq!(parsed, value);
        assert!(Bytes32::from_hex("abcd").is_err());
    }

    #[test]
    fn bytes32_serializes_as_hex_string() {
        let value = Bytes32::new([1; 32]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: Bytes32 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
