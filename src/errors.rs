use thiserror::Error;

use crate::{
    consensus::WeightProofError, objects::Bytes32, rpc::RpcError, store::StoreError,
    wallets::WalletError,
};

// SYNC ERROR
// ================================================================================================

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer error: {0}")]
    RpcError(#[from] RpcError),
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("wallet error: {0}")]
    WalletError(#[from] WalletError),
    #[error("invalid weight proof: {0}")]
    WeightProofError(#[from] WeightProofError),
    #[error("coin {0} is reported spent without a creation height")]
    SpentBeforeCreated(Bytes32),
    #[error("inclusion proof for {item} at height {height} does not match the block")]
    InclusionProofFailed { item: Bytes32, height: u32 },
    #[error("validation failed for blocks {start_height} to {end_height}")]
    SpanValidationFailed { start_height: u32, end_height: u32 },
    #[error("no weight proof to validate against")]
    MissingWeightProof,
    #[error("failed to fetch additions and removals at height {0}")]
    FetchFailure(u32),
    #[error("not connected to any full node")]
    NoFullNodeConnection,
}

impl SyncError {
    /// Returns true if the error was caused by data the peer sent, and the connection should be
    /// dropped.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            SyncError::RpcError(_)
                | SyncError::WeightProofError(_)
                | SyncError::SpentBeforeCreated(_)
                | SyncError::InclusionProofFailed { .. }
                | SyncError::SpanValidationFailed { .. }
                | SyncError::FetchFailure(_)
        )
    }
}

impl From<SyncError> for String {
    fn from(err: SyncError) -> String {
        err.to_string()
    }
}
