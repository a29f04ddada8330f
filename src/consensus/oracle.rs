use std::collections::HashMap;

use crate::objects::{Bytes32, G1Element, G2Element, HeaderBlock, ProofOfSpace, WeightProof};

// CHAIN VALIDATION ORACLE
// ================================================================================================

/// Cryptographic checks the sync core relies on but does not implement: BLS signatures,
/// proof-of-space and VDF verification, and compact block filters.
///
/// Every method is a pure function of its arguments.
pub trait ChainValidationOracle: Send + Sync {
    /// Validates the sub-epoch segments and VDFs of a weight proof whose structure already
    /// checked out. Returns the fork point with the locally known chain, or `None` if the proof
    /// is invalid.
    fn validate_weight_proof(&self, weight_proof: &WeightProof) -> Option<u32>;

    /// Verifies a plot signature over `message`.
    fn verify_plot_signature(
        &self,
        public_key: &G1Element,
        message: &Bytes32,
        signature: &G2Element,
    ) -> bool;

    /// Resolves the challenge `block` answered. `blocks` holds every block known around the span
    /// being validated. Returns `None` when it cannot be resolved from those blocks.
    fn block_challenge(
        &self,
        block: &HeaderBlock,
        blocks: &HashMap<Bytes32, HeaderBlock>,
        overflow: bool,
    ) -> Option<Bytes32>;

    /// Verifies a proof of space and returns its quality string, or `None` if it is invalid.
    fn quality_string(
        &self,
        proof: &ProofOfSpace,
        challenge: &Bytes32,
        cc_sp_hash: &Bytes32,
    ) -> Option<Bytes32>;

    /// Iterations a proof with `quality_string` must wait for at `difficulty`.
    fn required_iterations(
        &self,
        difficulty_constant_factor: u128,
        quality_string: &Bytes32,
        size: u8,
        difficulty: u64,
        cc_sp_hash: &Bytes32,
    ) -> u64;

    /// Tests whether a block's transactions filter may contain `item`.
    fn filter_contains(&self, filter: &[u8], item: &Bytes32) -> bool;
}
