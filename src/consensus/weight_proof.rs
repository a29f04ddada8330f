use thiserror::Error;
use tracing::{debug, info};

use super::ChainValidationOracle;
use crate::objects::{Bytes32, WeightProof};

// WEIGHT PROOF ERROR
// ================================================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WeightProofError {
    #[error("weight proof carries no recent blocks")]
    EmptyRecentChain,
    #[error("recent chain breaks at height {0}")]
    BrokenRecentChain(u32),
    #[error("sub-epoch summary {0} does not link to its predecessor")]
    BrokenSummaryChain(usize),
    #[error("weight proof ends at {found} instead of the announced peak {expected}")]
    PeakMismatch { expected: Bytes32, found: Bytes32 },
    #[error("weight proof rejected by the validation oracle")]
    Rejected,
}

// WEIGHT PROOF VERIFIER
// ================================================================================================

/// Validates a weight proof received from an untrusted peer and finds the fork point.
pub struct WeightProofVerifier<'a> {
    oracle: &'a dyn ChainValidationOracle,
}

impl<'a> WeightProofVerifier<'a> {
    pub fn new(oracle: &'a dyn ChainValidationOracle) -> Self {
        Self { oracle }
    }

    /// Checks the structure of `weight_proof`, that it ends at `expected_peak`, and then has the
    /// oracle validate its work. Returns the fork point.
    pub fn verify(
        &self,
        weight_proof: &WeightProof,
        expected_peak: &Bytes32,
    ) -> Result<u32, WeightProofError> {
        let peak = weight_proof.peak().ok_or(WeightProofError::EmptyRecentChain)?;
        let peak_hash = peak.header_hash();
        if &peak_hash != expected_peak {
            return Err(WeightProofError::PeakMismatch { expected: *expected_peak, found: peak_hash });
        }

        for pair in weight_proof.recent_chain_data.windows(2) {
            let (parent, child) = (&pair[0], &pair[1]);
            if child.height != parent.height + 1
                || child.prev_header_hash != parent.header_hash()
                || child.weight < parent.weight
            {
                return Err(WeightProofError::BrokenRecentChain(child.height));
            }
        }

        for (index, pair) in weight_proof.sub_epochs.windows(2).enumerate() {
            if pair[1].prev_subepoch_summary_hash != Some(pair[0].summary_hash()) {
                return Err(WeightProofError::BrokenSummaryChain(index + 1));
            }
        }
        if let Some(first) = weight_proof.sub_epochs.first() {
            if first.prev_subepoch_summary_hash.is_some() {
                return Err(WeightProofError::BrokenSummaryChain(0));
            }
        }

        let started = std::time::Instant::now();
        let fork_point =
            self.oracle.validate_weight_proof(weight_proof).ok_or(WeightProofError::Rejected)?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            fork_point, "validated weight proof"
        );
        debug!(
            sub_epochs = weight_proof.sub_epochs.len(),
            peak_height = peak.height,
            "weight proof covers chain"
        );

        Ok(fork_point)
    }
}
