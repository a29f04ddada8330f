use std::collections::HashMap;

use tracing::debug;

use super::{ChainValidationOracle, ConsensusConstants};
use crate::objects::{Bytes32, HeaderBlock};

/// Spans at least this long, starting above this height, need this many resolvable challenges.
const MIN_RESOLVED_CHALLENGES: usize = 32;

// SPAN VALIDATOR
// ================================================================================================

/// Checks that a contiguous run of headers carries real proof-of-space work at the expected
/// difficulty.
pub struct SpanValidator<'a> {
    constants: &'a ConsensusConstants,
    oracle: &'a dyn ChainValidationOracle,
}

impl<'a> SpanValidator<'a> {
    pub fn new(constants: &'a ConsensusConstants, oracle: &'a dyn ChainValidationOracle) -> Self {
        Self { constants, oracle }
    }

    /// Validates `blocks`, given in either height order.
    ///
    /// `difficulty` and `sub_slot_iters` are the values in effect at the oldest block; sub-slots
    /// that announce new values update them for the rest of the span. `lookup` must contain every
    /// block the oracle needs to resolve challenges, including the span itself.
    pub fn validate(
        &self,
        blocks: &[HeaderBlock],
        difficulty: u64,
        sub_slot_iters: u64,
        lookup: &HashMap<Bytes32, HeaderBlock>,
    ) -> bool {
        let ordered = normalize(blocks);
        if !is_contiguous(&ordered) {
            debug!("span is not a contiguous chain");
            return false;
        }

        let mut difficulty = difficulty;
        let mut sub_slot_iters = sub_slot_iters;
        let mut last_tx_block: Option<Bytes32> = None;
        let mut resolved = 0usize;

        for block in &ordered {
            for sub_slot in &block.finished_sub_slots {
                if let Some(new_difficulty) = sub_slot.new_difficulty {
                    difficulty = new_difficulty;
                }
                if let Some(new_iters) = sub_slot.new_sub_slot_iters {
                    sub_slot_iters = new_iters;
                }
            }

            if !self.check_transaction_link(block, &mut last_tx_block) {
                return false;
            }

            let Some(overflow) = self.constants.is_overflow_block(block.reward_chain_block.signage_point_index)
            else {
                debug!(height = block.height, "signage point index out of range");
                return false;
            };

            let Some(challenge) = self.oracle.block_challenge(block, lookup, overflow) else {
                continue;
            };
            resolved += 1;

            if !self.check_proof_of_space(block, &challenge, difficulty, sub_slot_iters) {
                return false;
            }
        }

        if let Some(oldest) = ordered.first() {
            if ordered.len() > MIN_RESOLVED_CHALLENGES
                && oldest.height > MIN_RESOLVED_CHALLENGES as u32
                && resolved <= MIN_RESOLVED_CHALLENGES
            {
                debug!(resolved, "too few blocks with a resolvable challenge");
                return false;
            }
        }

        true
    }

    /// Checks the transaction-block chain and the plot signature over the foliage transaction
    /// block.
    fn check_transaction_link(&self, block: &HeaderBlock, last_tx_block: &mut Option<Bytes32>) -> bool {
        let Some(foliage_hash) = block.foliage.foliage_transaction_block_hash else {
            return true;
        };

        let Some(transaction_block) = &block.foliage_transaction_block else {
            debug!(height = block.height, "foliage transaction block missing");
            return false;
        };
        if transaction_block.hash() != foliage_hash {
            debug!(height = block.height, "foliage transaction block hash mismatch");
            return false;
        }

        if let Some(previous) = last_tx_block {
            if transaction_block.prev_transaction_block_hash != *previous {
                debug!(height = block.height, "transaction block does not extend the previous one");
                return false;
            }
        }

        let Some(signature) = &block.foliage.foliage_transaction_block_signature else {
            debug!(height = block.height, "foliage transaction block is not signed");
            return false;
        };
        let plot_key = &block.reward_chain_block.proof_of_space.plot_public_key;
        if !self.oracle.verify_plot_signature(plot_key, &foliage_hash, signature) {
            debug!(height = block.height, "invalid plot signature");
            return false;
        }

        *last_tx_block = Some(block.header_hash());
        true
    }

    fn check_proof_of_space(
        &self,
        block: &HeaderBlock,
        challenge: &Bytes32,
        difficulty: u64,
        sub_slot_iters: u64,
    ) -> bool {
        let reward_chain = &block.reward_chain_block;
        let cc_sp_hash = reward_chain.challenge_chain_sp_vdf_output.unwrap_or(*challenge);

        let Some(quality) =
            self.oracle.quality_string(&reward_chain.proof_of_space, challenge, &cc_sp_hash)
        else {
            debug!(height = block.height, "invalid proof of space");
            return false;
        };

        let required_iters = self.oracle.required_iterations(
            self.constants.difficulty_constant_factor,
            &quality,
            reward_chain.proof_of_space.size,
            difficulty,
            &cc_sp_hash,
        );
        let Some(interval_iters) = self.constants.sp_interval_iters(sub_slot_iters) else {
            debug!(sub_slot_iters, "sub-slot iterations do not split into signage points");
            return false;
        };

        if required_iters >= interval_iters {
            debug!(height = block.height, required_iters, interval_iters, "proof of space too weak");
            return false;
        }
        true
    }
}

// HELPERS
// ================================================================================================

/// Returns the blocks ordered oldest first.
fn normalize(blocks: &[HeaderBlock]) -> Vec<&HeaderBlock> {
    let mut ordered: Vec<&HeaderBlock> = blocks.iter().collect();
    if let (Some(first), Some(last)) = (ordered.first(), ordered.last()) {
        if first.height > last.height {
            ordered.reverse();
        }
    }
    ordered
}

fn is_contiguous(blocks: &[&HeaderBlock]) -> bool {
    blocks.windows(2).all(|pair| {
        pair[1].height == pair[0].height + 1 && pair[1].prev_header_hash == pair[0].header_hash()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::SpanValidator;
    use crate::{
        consensus::ConsensusConstants,
        mock::{ChainBuilder, MockOracle},
        objects::Bytes32,
    };

    fn lookup(blocks: &[crate::objects::HeaderBlock]) -> HashMap<Bytes32, crate::objects::HeaderBlock> {
        blocks.iter().map(|block| (block.header_hash(), block.clone())).collect()
    }

    #[test]
    fn accepts_well_formed_span_in_either_order() {
        let constants = ConsensusConstants::default();
        let oracle = MockOracle::default();
        let chain = ChainBuilder::new().build(10);
        let validator = SpanValidator::new(&constants, &oracle);
        let blocks = lookup(&chain);

        assert!(validator.validate(&chain, 7, 1 << 27, &blocks));
        let reversed: Vec<_> = chain.iter().rev().cloned().collect();
        assert!(validator.validate(&reversed, 7, 1 << 27, &blocks));
    }

    #[test]
    fn rejects_mismatched_transaction_link() {
        let constants = ConsensusConstants::default();
        let oracle = MockOracle::default();
        let mut builder = ChainBuilder::new();
        let mut chain = builder.build(4);
        // re-point the last transaction block at a foreign predecessor
        builder.set_prev_transaction_block(&mut chain[3], Bytes32::new([0xee; 32]));
        let validator = SpanValidator::new(&constants, &oracle);

        assert!(!validator.validate(&chain[2..], 7, 1 << 27, &lookup(&chain)));
    }

    #[test]
    fn rejects_required_iterations_at_interval_bound() {
        let constants = ConsensusConstants::default();
        let sub_slot_iters = 1 << 27;
        let bound = constants.sp_interval_iters(sub_slot_iters).unwrap();
        let oracle = MockOracle::default().with_required_iters(bound);
        let chain = ChainBuilder::new().build(3);
        let validator = SpanValidator::new(&constants, &oracle);

        assert!(!validator.validate(&chain, 7, sub_slot_iters, &lookup(&chain)));

        let oracle = MockOracle::default().with_required_iters(bound - 1);
        let validator = SpanValidator::new(&constants, &oracle);
        assert!(validator.validate(&chain, 7, sub_slot_iters, &lookup(&chain)));
    }

    #[test]
    fn rejects_bad_plot_signature_and_gaps() {
        let constants = ConsensusConstants::default();
        let chain = ChainBuilder::new().build(5);

        let oracle = MockOracle::default().with_invalid_signatures();
        let validator = SpanValidator::new(&constants, &oracle);
        assert!(!validator.validate(&chain, 7, 1 << 27, &lookup(&chain)));

        let oracle = MockOracle::default();
        let validator = SpanValidator::new(&constants, &oracle);
        let gapped = vec![chain[0].clone(), chain[2].clone()];
        assert!(!validator.validate(&gapped, 7, 1 << 27, &lookup(&chain)));
    }

    #[test]
    fn long_span_needs_resolvable_challenges() {
        let constants = ConsensusConstants::default();
        let chain = ChainBuilder::new().build(80);
        let span = &chain[40..];

        let oracle = MockOracle::default().with_unresolved_challenges();
        let validator = SpanValidator::new(&constants, &oracle);
        assert!(!validator.validate(span, 7, 1 << 27, &lookup(&chain)));

        let oracle = MockOracle::default();
        let validator = SpanValidator::new(&constants, &oracle);
        assert!(validator.validate(span, 7, 1 << 27, &lookup(&chain)));
    }
}
