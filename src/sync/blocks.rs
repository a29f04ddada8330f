use tracing::warn;

use super::SyncCoordinator;
use crate::{
    errors::SyncError,
    objects::{Bytes32, Coin, HeaderBlock},
    rpc::{
        domain::{AdditionsResponse, RemovalsResponse},
        with_timeout, PeerLink, PeerRequest, RpcError,
    },
};

impl SyncCoordinator {
    // BLOCK ADDITIONS AND REMOVALS
    // --------------------------------------------------------------------------------------------

    /// Returns the puzzle hashes and unspent coin ids the block's transactions filter may
    /// contain.
    pub(crate) async fn filter_hints(
        &self,
        block: &HeaderBlock,
    ) -> Result<(Vec<Bytes32>, Vec<Bytes32>), SyncError> {
        let filter = &block.transactions_filter;
        let puzzle_hashes = self
            .store
            .get_all_puzzle_hashes()
            .await?
            .into_iter()
            .filter(|puzzle_hash| self.oracle.filter_contains(filter, puzzle_hash))
            .collect();
        let coin_ids = self
            .store
            .get_unspent_coin_ids()
            .await?
            .into_iter()
            .filter(|coin_id| self.oracle.filter_contains(filter, coin_id))
            .collect();
        Ok((puzzle_hashes, coin_ids))
    }

    /// Fetches the wallet's coins created in `block`, proven against its additions root.
    ///
    /// `puzzle_hashes` of `None` requests every addition of the block. An empty hint list means
    /// nothing to fetch. Every requested puzzle hash must be answered with a proof of inclusion or
    /// exclusion. A failed request or proof closes the connection.
    pub(crate) async fn get_additions(
        &self,
        peer: &dyn PeerLink,
        block: &HeaderBlock,
        puzzle_hashes: Option<Vec<Bytes32>>,
    ) -> Result<Vec<Coin>, SyncError> {
        if puzzle_hashes.as_ref().map(Vec::is_empty).unwrap_or(false) {
            return Ok(Vec::new());
        }

        let requested = puzzle_hashes.clone();
        let response = match self.request_additions(peer, block, puzzle_hashes).await {
            Ok(response) => response,
            Err(err) => return Err(self.fetch_failure(peer, block, &err.to_string()).await),
        };
        let verified = block
            .foliage_transaction_block
            .as_ref()
            .map(|transaction_block| response.verify(&transaction_block.additions_root, requested.as_deref()))
            .unwrap_or(false);
        if !verified {
            return Err(self.fetch_failure(peer, block, "additions do not match the block").await);
        }

        Ok(response.all_coins().cloned().collect())
    }

    /// Fetches the wallet's coins spent in `block`, proven against its removals root.
    ///
    /// Every removal of the block is requested when one of the `additions` belongs to a wallet
    /// type that needs them. A failed request or proof closes the connection.
    pub(crate) async fn get_removals(
        &self,
        peer: &dyn PeerLink,
        block: &HeaderBlock,
        additions: &[Coin],
        coin_ids: Vec<Bytes32>,
    ) -> Result<Vec<Coin>, SyncError> {
        let mut request_all = false;
        for coin in additions {
            let record = self.store.get_derivation_record(&coin.puzzle_hash).await?;
            if record.map(|record| record.wallet_type.requires_full_removals()).unwrap_or(false) {
                request_all = true;
                break;
            }
        }
        if coin_ids.is_empty() && !request_all {
            return Ok(Vec::new());
        }

        let filter = if request_all { None } else { Some(coin_ids) };
        let response = match self.request_removals(peer, block, filter.clone()).await {
            Ok(response) => response,
            Err(err) => return Err(self.fetch_failure(peer, block, &err.to_string()).await),
        };
        let verified = block
            .foliage_transaction_block
            .as_ref()
            .map(|transaction_block| response.verify(&transaction_block.removals_root, filter.as_deref()))
            .unwrap_or(false);
        if !verified {
            return Err(self.fetch_failure(peer, block, "removals do not match the block").await);
        }

        Ok(response.removed_coins().cloned().collect())
    }

    async fn fetch_failure(&self, peer: &dyn PeerLink, block: &HeaderBlock, reason: &str) -> SyncError {
        warn!(height = block.height, peer = %peer.peer_node_id(), "dropping peer: {reason}");
        peer.close().await;
        SyncError::FetchFailure(block.height)
    }

    pub(crate) async fn request_additions(
        &self,
        peer: &dyn PeerLink,
        block: &HeaderBlock,
        puzzle_hashes: Option<Vec<Bytes32>>,
    ) -> Result<AdditionsResponse, RpcError> {
        let header_hash = block.header_hash();
        let response = with_timeout(
            PeerRequest::Additions,
            self.request_timeout(),
            peer.request_additions(block.height, header_hash, puzzle_hashes),
        )
        .await?;
        if response.height != block.height || response.header_hash != header_hash {
            return Err(RpcError::unexpected(PeerRequest::Additions, "additions for another block"));
        }
        Ok(response)
    }

    pub(crate) async fn request_removals(
        &self,
        peer: &dyn PeerLink,
        block: &HeaderBlock,
        coin_ids: Option<Vec<Bytes32>>,
    ) -> Result<RemovalsResponse, RpcError> {
        let header_hash = block.header_hash();
        let response = with_timeout(
            PeerRequest::Removals,
            self.request_timeout(),
            peer.request_removals(block.height, header_hash, coin_ids),
        )
        .await?;
        if response.height != block.height || response.header_hash != header_hash {
            return Err(RpcError::unexpected(PeerRequest::Removals, "removals for another block"));
        }
        Ok(response)
    }
}
