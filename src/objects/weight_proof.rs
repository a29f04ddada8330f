use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Bytes32, HashInto, HeaderBlock};

// SUB-EPOCH DATA
// ================================================================================================

/// One sub-epoch summary as carried by a weight proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubEpochData {
    /// Summary hash of the previous sub-epoch; `None` for the first entry.
    pub prev_subepoch_summary_hash: Option<Bytes32>,
    pub reward_chain_hash: Bytes32,
    pub num_blocks_overflow: u8,
    pub new_sub_slot_iters: Option<u64>,
    pub new_difficulty: Option<u64>,
}

impl SubEpochData {
    pub fn summary_hash(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        self.prev_subepoch_summary_hash.hash_into(&mut hasher);
        self.reward_chain_hash.hash_into(&mut hasher);
        self.num_blocks_overflow.hash_into(&mut hasher);
        self.new_sub_slot_iters.hash_into(&mut hasher);
        self.new_difficulty.hash_into(&mut hasher);
        Bytes32::new(hasher.finalize().into())
    }
}

// WEIGHT PROOF
// ================================================================================================

/// Compact proof of the weight of a chain: the sub-epoch summaries since genesis plus the most
/// recent blocks in full.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightProof {
    pub sub_epochs: Vec<SubEpochData>,
    pub recent_chain_data: Vec<HeaderBlock>,
}

impl WeightProof {
    /// Height of the oldest block in the recent window.
    pub fn recent_start_height(&self) -> Option<u32> {
        self.recent_chain_data.first().map(|block| block.height)
    }

    /// Returns the recent-window block at `height`, if the window covers it.
    pub fn recent_block_at(&self, height: u32) -> Option<&HeaderBlock> {
        let start = self.recent_start_height()?;
        let index = height.checked_sub(start)?;
        self.recent_chain_data.get(index as usize)
    }

    pub fn peak(&self) -> Option<&HeaderBlock> {
        self.recent_chain_data.last()
    }

    /// Latest difficulty and sub-slot iterations announced by any sub-epoch, if any was.
    pub fn latest_difficulty_and_iters(&self) -> (Option<u64>, Option<u64>) {
        let difficulty = self.sub_epochs.iter().rev().find_map(|ses| ses.new_difficulty);
        let iters = self.sub_epochs.iter().rev().find_map(|ses| ses.new_sub_slot_iters);
        (difficulty, iters)
    }
}
