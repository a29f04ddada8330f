use std::collections::HashSet;

use tracing::{debug, info};

use super::{StateChange, SyncCoordinator, SyncSummary};
use crate::{
    errors::SyncError,
    objects::{Bytes32, CoinRecord},
    rpc::PeerLink,
};

impl SyncCoordinator {
    // TRUSTED SYNC
    // --------------------------------------------------------------------------------------------

    /// Replays a trusted peer's coin states for every tracked puzzle hash and coin without
    /// validating them.
    ///
    /// Applying states can derive new puzzle hashes, so subscriptions repeat until a pass adds
    /// none. Coins already known and the coins of open offers are subscribed to afterwards.
    pub(crate) async fn trusted_sync(&self, peer: &dyn PeerLink) -> Result<SyncSummary, SyncError> {
        let started = std::time::Instant::now();
        let synced_height = self.store.get_synced_height().await?;
        let request_height = synced_height.saturating_sub(self.config.peer.trusted_sync_lookback);

        let mut summary = SyncSummary::new_empty(synced_height);
        let mut subscribed: HashSet<Bytes32> = HashSet::new();
        let mut passes = 0;
        loop {
            let to_check: Vec<Bytes32> = self
                .store
                .get_all_puzzle_hashes()
                .await?
                .into_iter()
                .filter(|puzzle_hash| !subscribed.contains(puzzle_hash))
                .collect();
            if to_check.is_empty() {
                break;
            }

            passes += 1;
            debug!(pass = passes, puzzle_hashes = to_check.len(), "subscribing to puzzle hashes");
            subscribed.extend(to_check.iter().copied());
            let states = self.register_puzzle_hashes(peer, to_check, request_height).await?;
            summary.combine_with(&self.handle_coin_state_change(&states, peer).await?);
        }

        let mut coin_ids: Vec<Bytes32> = self
            .store
            .get_coins_to_check(request_height)
            .await?
            .iter()
            .map(CoinRecord::name)
            .collect();
        coin_ids.extend(self.store.get_trade_coins_of_interest().await?);
        let states = self.register_coin_ids(peer, coin_ids, request_height).await?;
        summary.combine_with(&self.handle_coin_state_change(&states, peer).await?);

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            passes,
            coins_added = summary.coins_added,
            coins_removed = summary.coins_removed,
            "trusted sync finished"
        );

        // refresh every wallet, whether or not its coins changed
        for wallet_id in self.wallets.wallet_ids().await {
            self.emit(StateChange::CoinRemoved(wallet_id));
            self.emit(StateChange::CoinAdded(wallet_id));
        }
        Ok(summary)
    }
}
