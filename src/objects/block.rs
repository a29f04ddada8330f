use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{hash_of, Bytes32, Coin, HashInto};

// KEYS
// ================================================================================================

/// A serialized BLS public key (G1 point).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct G1Element(pub Vec<u8>);

/// A serialized BLS signature (G2 point).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct G2Element(pub Vec<u8>);

impl HashInto for G1Element {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.0.as_slice().hash_into(hasher);
    }
}

impl HashInto for G2Element {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.0.as_slice().hash_into(hasher);
    }
}

// HEADER BLOCK COMPONENTS
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfSpace {
    pub challenge: Bytes32,
    pub plot_public_key: G1Element,
    pub size: u8,
    pub proof: Vec<u8>,
}

impl HashInto for ProofOfSpace {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.challenge.hash_into(hasher);
        self.plot_public_key.hash_into(hasher);
        self.size.hash_into(hasher);
        self.proof.as_slice().hash_into(hasher);
    }
}

/// Summary of a sub-slot finished right before a block. A sub-slot that closes a sub-epoch
/// carries the summary hash and, when they change, the new difficulty and sub-slot iterations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndOfSubSlotSummary {
    pub challenge_chain_end_hash: Bytes32,
    pub subepoch_summary_hash: Option<Bytes32>,
    pub new_sub_slot_iters: Option<u64>,
    pub new_difficulty: Option<u64>,
}

impl HashInto for EndOfSubSlotSummary {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.challenge_chain_end_hash.hash_into(hasher);
        self.subepoch_summary_hash.hash_into(hasher);
        self.new_sub_slot_iters.hash_into(hasher);
        self.new_difficulty.hash_into(hasher);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardChainBlock {
    pub signage_point_index: u8,
    pub proof_of_space: ProofOfSpace,
    /// Output of the challenge chain signage point VDF, absent for the first signage point of
    /// a sub-slot.
    pub challenge_chain_sp_vdf_output: Option<Bytes32>,
}

impl HashInto for RewardChainBlock {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.signage_point_index.hash_into(hasher);
        self.proof_of_space.hash_into(hasher);
        self.challenge_chain_sp_vdf_output.hash_into(hasher);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Foliage {
    pub foliage_transaction_block_hash: Option<Bytes32>,
    pub foliage_transaction_block_signature: Option<G2Element>,
}

impl HashInto for Foliage {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.foliage_transaction_block_hash.hash_into(hasher);
        self.foliage_transaction_block_signature.hash_into(hasher);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoliageTransactionBlock {
    pub prev_transaction_block_hash: Bytes32,
    pub timestamp: u64,
    pub additions_root: Bytes32,
    pub removals_root: Bytes32,
}

impl FoliageTransactionBlock {
    pub fn hash(&self) -> Bytes32 {
        hash_of(self)
    }
}

impl HashInto for FoliageTransactionBlock {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.prev_transaction_block_hash.hash_into(hasher);
        self.timestamp.hash_into(hasher);
        self.additions_root.hash_into(hasher);
        self.removals_root.hash_into(hasher);
    }
}

// HEADER BLOCK
// ================================================================================================

/// A block without its transactions generator, as served to light wallets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderBlock {
    pub height: u32,
    pub weight: u128,
    pub prev_header_hash: Bytes32,
    pub finished_sub_slots: Vec<EndOfSubSlotSummary>,
    pub reward_chain_block: RewardChainBlock,
    pub foliage: Foliage,
    pub foliage_transaction_block: Option<FoliageTransactionBlock>,
    /// Compact filter over the puzzle hashes and coin ids touched by this block.
    pub transactions_filter: Vec<u8>,
}

impl HeaderBlock {
    /// Returns the block identity, derived from every consensus field of the header.
    ///
    /// The transactions filter is not committed to.
    pub fn header_hash(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        self.height.hash_into(&mut hasher);
        self.weight.hash_into(&mut hasher);
        self.prev_header_hash.hash_into(&mut hasher);
        self.finished_sub_slots.hash_into(&mut hasher);
        self.reward_chain_block.hash_into(&mut hasher);
        self.foliage.hash_into(&mut hasher);
        Bytes32::new(hasher.finalize().into())
    }

    pub fn is_transaction_block(&self) -> bool {
        self.foliage.foliage_transaction_block_hash.is_some()
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.foliage_transaction_block.as_ref().map(|block| block.timestamp)
    }

    pub fn prev_transaction_block_hash(&self) -> Option<Bytes32> {
        self.foliage_transaction_block.as_ref().map(|block| block.prev_transaction_block_hash)
    }

    /// Returns the sub-epoch summary hash closed right before this block, if any.
    pub fn subepoch_summary_hash(&self) -> Option<Bytes32> {
        self.finished_sub_slots.iter().find_map(|slot| slot.subepoch_summary_hash)
    }
}

// HEADER BLOCK RECORD
// ================================================================================================

/// A validated transaction block together with the coins it proved to add and remove.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderBlockRecord {
    header: HeaderBlock,
    additions: Vec<Coin>,
    removals: Vec<Coin>,
}

impl HeaderBlockRecord {
    pub fn new(header: HeaderBlock, additions: Vec<Coin>, removals: Vec<Coin>) -> Self {
        Self { header, additions, removals }
    }

    pub fn header(&self) -> &HeaderBlock {
        &self.header
    }

    pub fn header_hash(&self) -> Bytes32 {
        self.header.header_hash()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn additions(&self) -> &[Coin] {
        &self.additions
    }

    pub fn removals(&self) -> &[Coin] {
        &self.removals
    }
}
