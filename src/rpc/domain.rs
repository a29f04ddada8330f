use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::objects::{
    merkle::{additions_root, coin_list_hash, removals_root, MembershipProof, MerkleProof},
    Bytes32, Coin, CoinState, HashInto, Program, SpendBundle,
};

// PEAK
// ================================================================================================

/// A peak announcement sent by a full node to its wallet peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPeakWallet {
    pub header_hash: Bytes32,
    pub height: u32,
    pub weight: u128,
    pub fork_point_with_previous_peak: u32,
}

// ADDITIONS
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionProof {
    pub puzzle_hash: Bytes32,
    /// Shows whether the puzzle hash received coins in the block.
    pub puzzle_hash_proof: MembershipProof,
    /// Proof for the coin list hash; absent when the puzzle hash received no coins.
    pub coin_list_proof: Option<MerkleProof>,
}

/// Coins created in one block, grouped by puzzle hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionsResponse {
    pub height: u32,
    pub header_hash: Bytes32,
    pub coins: Vec<(Bytes32, Vec<Coin>)>,
    /// Membership proofs; `None` when every addition of the block was requested.
    pub proofs: Option<Vec<AdditionProof>>,
}

impl AdditionsResponse {
    /// Checks the response against a block's additions root.
    ///
    /// A full response must rebuild the root exactly. A filtered response must answer every
    /// `requested` puzzle hash, and prove each of its coin groups: a non-empty group by inclusion
    /// of the puzzle hash and the coin list hash, an empty one by exclusion of the puzzle hash.
    pub fn verify(&self, root: &Bytes32, requested: Option<&[Bytes32]>) -> bool {
        let grouped_correctly = self
            .coins
            .iter()
            .all(|(puzzle_hash, coins)| coins.iter().all(|coin| coin.puzzle_hash == *puzzle_hash));
        if !grouped_correctly {
            return false;
        }

        let Some(proofs) = &self.proofs else {
            return additions_root(&self.coins) == *root;
        };

        let answered = requested
            .unwrap_or_default()
            .iter()
            .all(|requested| self.coins.iter().any(|(puzzle_hash, _)| puzzle_hash == requested));
        if !answered {
            return false;
        }

        self.coins.iter().all(|(puzzle_hash, coins)| {
            let Some(proof) = proofs.iter().find(|proof| proof.puzzle_hash == *puzzle_hash) else {
                return false;
            };
            match proof.puzzle_hash_proof.prove(root, puzzle_hash) {
                Some(true) => match &proof.coin_list_proof {
                    Some(list_proof) => !coins.is_empty() && list_proof.verify(root, &coin_list_hash(coins)),
                    None => false,
                },
                Some(false) => coins.is_empty(),
                None => false,
            }
        })
    }

    pub fn all_coins(&self) -> impl Iterator<Item = &Coin> {
        self.coins.iter().flat_map(|(_, coins)| coins.iter())
    }
}

// REMOVALS
// ================================================================================================

/// Coins spent in one block, keyed by coin id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalsResponse {
    pub height: u32,
    pub header_hash: Bytes32,
    pub coins: Vec<(Bytes32, Option<Coin>)>,
    /// Membership proofs; `None` when every removal of the block was requested.
    pub proofs: Option<Vec<(Bytes32, MembershipProof)>>,
}

impl RemovalsResponse {
    /// Checks the response against a block's removals root.
    ///
    /// A filtered response must answer every `requested` coin id. Entries with a coin are proven
    /// by inclusion; entries without one claim the id was not spent in this block and are proven
    /// by exclusion.
    pub fn verify(&self, root: &Bytes32, requested: Option<&[Bytes32]>) -> bool {
        let ids_match = self
            .coins
            .iter()
            .all(|(coin_id, coin)| coin.as_ref().map(|coin| coin.name() == *coin_id).unwrap_or(true));
        if !ids_match {
            return false;
        }

        let Some(proofs) = &self.proofs else {
            let removed: Vec<Bytes32> =
                self.coins.iter().filter(|(_, coin)| coin.is_some()).map(|(id, _)| *id).collect();
            return removals_root(&removed) == *root;
        };

        let answered = requested
            .unwrap_or_default()
            .iter()
            .all(|requested| self.coins.iter().any(|(coin_id, _)| coin_id == requested));
        if !answered {
            return false;
        }

        self.coins.iter().all(|(coin_id, coin)| {
            let proven = proofs
                .iter()
                .find(|(proof_id, _)| proof_id == coin_id)
                .and_then(|(_, proof)| proof.prove(root, coin_id));
            proven == Some(coin.is_some())
        })
    }

    pub fn removed_coins(&self) -> impl Iterator<Item = &Coin> {
        self.coins.iter().filter_map(|(_, coin)| coin.as_ref())
    }
}

// SUB-EPOCH SUMMARIES AND BLOCK RANGES
// ================================================================================================

/// Request for the sub-epoch summaries overlapping a height range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSesInfo {
    pub start_height: u32,
    pub end_height: u32,
}

impl RequestSesInfo {
    pub fn request_hash(&self) -> Bytes32 {
        request_hash(b"ses", &[self.start_height, self.end_height])
    }
}

/// Sub-epoch summaries and, for each, the heights of the blocks it covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SesInfo {
    pub reward_chain_hash: Vec<Bytes32>,
    pub heights: Vec<Vec<u32>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBlocks {
    pub start_height: u32,
    pub end_height: u32,
    pub include_header_only: bool,
}

impl RequestBlocks {
    pub fn request_hash(&self) -> Bytes32 {
        request_hash(
            b"blocks",
            &[self.start_height, self.end_height, u32::from(self.include_header_only)],
        )
    }
}

fn request_hash(kind: &[u8], fields: &[u32]) -> Bytes32 {
    let mut hasher = Sha256::new();
    kind.hash_into(&mut hasher);
    for field in fields {
        field.hash_into(&mut hasher);
    }
    Bytes32::new(hasher.finalize().into())
}

// PUZZLE SOLUTIONS
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleSolutionResponse {
    pub coin_name: Bytes32,
    pub height: u32,
    pub puzzle: Program,
    pub solution: Program,
}

// PUSH UPDATES AND OUTBOUND MESSAGES
// ================================================================================================

/// Unsolicited coin state changes for subscribed puzzle hashes and coin ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinStateUpdate {
    pub height: u32,
    pub fork_height: u32,
    pub peak_hash: Bytes32,
    pub items: Vec<CoinState>,
}

/// Fire-and-forget messages the wallet sends to full nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundMessage {
    SendTransaction { transaction_id: Bytes32, spend_bundle: SpendBundle },
    RequestPuzzleSolution { coin_name: Bytes32, height: u32 },
}
