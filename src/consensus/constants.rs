use serde::{Deserialize, Serialize};

use crate::objects::Bytes32;

/// Puzzle hash of the singleton launcher puzzle.
pub const SINGLETON_LAUNCHER_HASH: Bytes32 = Bytes32::new([
    0xef, 0xf0, 0x75, 0x22, 0x49, 0x50, 0x60, 0xc0, 0x66, 0xf6, 0x6f, 0x32, 0xac, 0xc2, 0xa7, 0x7e,
    0x3a, 0x3e, 0x73, 0x7a, 0xca, 0x8b, 0xae, 0xa4, 0xd1, 0xa6, 0x4e, 0xa4, 0xcd, 0xc1, 0x3d, 0xa9,
]);

// CONSENSUS CONSTANTS
// ================================================================================================

/// Chain parameters the sync core needs. Defaults match mainnet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConstants {
    /// Difficulty of the first sub-epoch.
    pub difficulty_starting: u64,
    /// Sub-slot iterations of the first sub-epoch.
    pub sub_slot_iters_starting: u64,
    /// Signage points per sub-slot.
    pub num_sps_sub_slot: u8,
    /// Signage points at the end of a sub-slot whose blocks are infused in the next one.
    pub num_sp_intervals_extra: u8,
    /// Number of blocks a weight proof carries in full.
    pub weight_proof_recent_blocks: u32,
    pub difficulty_constant_factor: u128,
}

impl ConsensusConstants {
    /// Returns whether a block at `signage_point_index` is an overflow block, or `None` if the
    /// index is out of range or the constants leave no regular signage points.
    pub fn is_overflow_block(&self, signage_point_index: u8) -> Option<bool> {
        if signage_point_index >= self.num_sps_sub_slot {
            return None;
        }
        let first_overflow = self.num_sps_sub_slot.checked_sub(self.num_sp_intervals_extra)?;
        Some(signage_point_index >= first_overflow)
    }

    /// Iterations between two signage points, or `None` if `sub_slot_iters` does not split
    /// evenly.
    pub fn sp_interval_iters(&self, sub_slot_iters: u64) -> Option<u64> {
        let sps = u64::from(self.num_sps_sub_slot);
        if sps == 0 || sub_slot_iters % sps != 0 {
            return None;
        }
        Some(sub_slot_iters / sps)
    }
}

impl Default for ConsensusConstants {
    fn default() -> Self {
        Self {
            difficulty_starting: 7,
            sub_slot_iters_starting: 1 << 27,
            num_sps_sub_slot: 64,
            num_sp_intervals_extra: 3,
            weight_proof_recent_blocks: 1000,
            difficulty_constant_factor: 1 << 67,
        }
    }
}
