use thiserror::Error;

use crate::objects::Bytes32;

// STORE ERROR
// ================================================================================================

/// Errors generated from the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("coin {0} not found")]
    CoinNotFound(Bytes32),
    #[error("failed to parse stored data: {0}")]
    ParsingError(String),
    #[error("query error: {0}")]
    QueryError(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::ParsingError(value.to_string())
    }
}
