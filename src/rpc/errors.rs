use thiserror::Error;

use super::PeerRequest;

// RPC ERROR
// ================================================================================================

/// A peer failed to answer a request usefully. Every variant is a peer fault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("failed to reach the peer: {0}")]
    ConnectionError(String),
    #[error("peer sent no response to {0}")]
    NoResponse(PeerRequest),
    #[error("peer rejected {0}")]
    Rejected(PeerRequest),
    #[error("peer timed out on {0}")]
    Timeout(PeerRequest),
    #[error("unexpected response to {0}: {1}")]
    UnexpectedResponse(PeerRequest, String),
}

impl RpcError {
    pub fn unexpected(request: PeerRequest, reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse(request, reason.into())
    }
}
