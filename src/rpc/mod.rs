//! Provides the interface the sync core uses to talk to full nodes.
//!
//! This module defines the [`PeerLink`] trait which abstracts one connection to a full node and
//! the wallet protocol requests it serves:
//!
//! - Fetch block headers, block ranges and sub-epoch summaries.
//! - Fetch the additions and removals of a block with inclusion proofs.
//! - Fetch a weight proof for a peak.
//! - Register interest in puzzle hashes and coin ids, and query coin children and solutions.
//!
//! Transport and message framing live behind the trait. Requests that a peer answers with nothing,
//! a rejection or the wrong message type come back as [`RpcError`], and the caller treats them as
//! a peer fault. [`with_timeout`] bounds every request.

use core::{fmt, future::Future, time::Duration};
use std::sync::Arc;

use async_trait::async_trait;

/// Contains the wallet protocol messages and the proof checks on their payloads.
pub mod domain;
use domain::{
    AdditionsResponse, OutboundMessage, PuzzleSolutionResponse, RemovalsResponse, SesInfo,
};

mod endpoint;
pub use endpoint::Endpoint;

mod errors;
pub use errors::RpcError;

use crate::objects::{Bytes32, CoinState, HeaderBlock, WeightProof};

// PEER LINK TRAIT
// ================================================================================================

/// One connection to a full node.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// The node id the peer authenticated with.
    fn peer_node_id(&self) -> Bytes32;

    /// The address the connection was made to.
    fn endpoint(&self) -> Endpoint;

    /// Wallet protocol version announced by the peer during the handshake.
    fn protocol_version(&self) -> String;

    /// Fetches the header of the block at `height` on the peer's main chain.
    async fn request_block_header(&self, height: u32) -> Result<HeaderBlock, RpcError>;

    /// Fetches the coins created by the block, optionally only those for `puzzle_hashes`.
    /// Filtered responses carry inclusion proofs.
    async fn request_additions(
        &self,
        height: u32,
        header_hash: Bytes32,
        puzzle_hashes: Option<Vec<Bytes32>>,
    ) -> Result<AdditionsResponse, RpcError>;

    /// Fetches the coins spent by the block, optionally only those in `coin_ids`. Filtered
    /// responses carry inclusion proofs.
    async fn request_removals(
        &self,
        height: u32,
        header_hash: Bytes32,
        coin_ids: Option<Vec<Bytes32>>,
    ) -> Result<RemovalsResponse, RpcError>;

    /// Fetches a weight proof for the chain ending at the given peak.
    async fn request_proof_of_weight(
        &self,
        height: u32,
        header_hash: Bytes32,
    ) -> Result<WeightProof, RpcError>;

    /// Fetches the sub-epoch summaries overlapping `[start_height, end_height]`.
    async fn request_ses_info(&self, start_height: u32, end_height: u32)
        -> Result<SesInfo, RpcError>;

    /// Fetches the blocks in `[start_height, end_height]`. The peer should return them in
    /// ascending height order.
    async fn request_blocks(
        &self,
        start_height: u32,
        end_height: u32,
        include_header_only: bool,
    ) -> Result<Vec<HeaderBlock>, RpcError>;

    /// Fetches the puzzle and solution that spent `coin_id` at `height`.
    async fn request_puzzle_solution(
        &self,
        coin_id: Bytes32,
        height: u32,
    ) -> Result<PuzzleSolutionResponse, RpcError>;

    /// Fetches the states of the coins created by spending `coin_id`.
    async fn request_children(&self, coin_id: Bytes32) -> Result<Vec<CoinState>, RpcError>;

    /// Subscribes to `puzzle_hashes` and returns the states of their coins changed since
    /// `min_height`. Later changes arrive as pushed updates.
    async fn register_for_ph_updates(
        &self,
        puzzle_hashes: Vec<Bytes32>,
        min_height: u32,
    ) -> Result<Vec<CoinState>, RpcError>;

    /// Subscribes to `coin_ids` and returns their states changed since `min_height`.
    async fn register_for_coin_updates(
        &self,
        coin_ids: Vec<Bytes32>,
        min_height: u32,
    ) -> Result<Vec<CoinState>, RpcError>;

    /// Sends a message that expects no direct reply.
    async fn send_message(&self, message: OutboundMessage) -> Result<(), RpcError>;

    /// Closes the connection.
    async fn close(&self);
}

/// The set of full node connections currently open.
pub trait FullNodeConnections: Send + Sync {
    fn full_node_peers(&self) -> Vec<Arc<dyn PeerLink>>;
}

// PEER REQUEST
// ================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerRequest {
    BlockHeader,
    Additions,
    Removals,
    ProofOfWeight,
    SesInfo,
    Blocks,
    PuzzleSolution,
    Children,
    PhUpdates,
    CoinUpdates,
    SendMessage,
}

impl fmt::Display for PeerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRequest::BlockHeader => write!(f, "request_block_header"),
            PeerRequest::Additions => write!(f, "request_additions"),
            PeerRequest::Removals => write!(f, "request_removals"),
            PeerRequest::ProofOfWeight => write!(f, "request_proof_of_weight"),
            PeerRequest::SesInfo => write!(f, "request_ses_info"),
            PeerRequest::Blocks => write!(f, "request_blocks"),
            PeerRequest::PuzzleSolution => write!(f, "request_puzzle_solution"),
            PeerRequest::Children => write!(f, "request_children"),
            PeerRequest::PhUpdates => write!(f, "register_for_ph_updates"),
            PeerRequest::CoinUpdates => write!(f, "register_for_coin_updates"),
            PeerRequest::SendMessage => write!(f, "send_message"),
        }
    }
}

/// Runs `request`, turning an elapsed `timeout` into [`RpcError::Timeout`].
pub async fn with_timeout<T, F>(kind: PeerRequest, timeout: Duration, request: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(kind)),
    }
}
