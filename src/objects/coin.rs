use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{sha256, Bytes32, HashInto};
use crate::wallets::{WalletId, WalletType};

// COIN
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub parent_coin_info: Bytes32,
    pub puzzle_hash: Bytes32,
    pub amount: u64,
}

impl Coin {
    pub fn new(parent_coin_info: Bytes32, puzzle_hash: Bytes32, amount: u64) -> Self {
        Self { parent_coin_info, puzzle_hash, amount }
    }

    /// Returns the coin id: `sha256(parent || puzzle_hash || amount)`, with the amount encoded as
    /// a minimal big-endian signed integer.
    pub fn name(&self) -> Bytes32 {
        let amount = encode_amount(self.amount);
        sha256(&[self.parent_coin_info.as_ref(), self.puzzle_hash.as_ref(), &amount])
    }
}

fn encode_amount(amount: u64) -> Vec<u8> {
    let bytes = amount.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let mut encoded = Vec::with_capacity(9);
    if first < bytes.len() && bytes[first] & 0x80 != 0 {
        encoded.push(0);
    }
    encoded.extend_from_slice(&bytes[first..]);
    encoded
}

// COIN STATE
// ================================================================================================

/// A peer's claim about a coin: when it was created and when (if ever) it was spent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinState {
    pub coin: Coin,
    pub created_height: Option<u32>,
    pub spent_height: Option<u32>,
}

impl CoinState {
    pub fn new(coin: Coin, created_height: Option<u32>, spent_height: Option<u32>) -> Self {
        Self { coin, created_height, spent_height }
    }

    /// Identifies this particular claim, so two states for the same coin with different heights
    /// hash differently.
    pub fn state_hash(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        self.coin.name().hash_into(&mut hasher);
        self.created_height.hash_into(&mut hasher);
        self.spent_height.hash_into(&mut hasher);
        Bytes32::new(hasher.finalize().into())
    }
}

// COIN RECORD
// ================================================================================================

/// A coin as tracked by the local store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinRecord {
    pub coin: Coin,
    pub confirmed_block_index: u32,
    pub spent_block_index: Option<u32>,
    pub wallet_id: WalletId,
    pub wallet_type: WalletType,
}

impl CoinRecord {
    pub fn name(&self) -> Bytes32 {
        self.coin.name()
    }

    pub fn is_spent(&self) -> bool {
        self.spent_block_index.is_some()
    }

    /// Returns true if the record reports the same created and spent heights as `state`.
    pub fn matches_state(&self, state: &CoinState) -> bool {
        state.created_height == Some(self.confirmed_block_index)
            && state.spent_height == self.spent_block_index
    }
}

// COIN SPEND
// ================================================================================================

/// Serialized CLVM program bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program(pub Vec<u8>);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinSpend {
    pub coin: Coin,
    pub puzzle_reveal: Program,
    pub solution: Program,
}
