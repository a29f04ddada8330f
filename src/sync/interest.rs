use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};

use super::{SyncCoordinator, SyncSummary};
use crate::{
    consensus::SINGLETON_LAUNCHER_HASH,
    errors::SyncError,
    objects::{AdditionalCoinSpend, Bytes32, Coin, CoinSpend, CoinState},
    rpc::{with_timeout, PeerLink, PeerRequest, RpcError},
    wallets::WalletError,
};

impl SyncCoordinator {
    // COIN STATE CHANGES
    // --------------------------------------------------------------------------------------------

    /// Applies `states` to the store and follows the spends among them.
    ///
    /// States that do not change a stored record are dropped by the store, so applying the same
    /// states twice fetches and dispatches nothing the second time.
    pub(crate) async fn handle_coin_state_change(
        &self,
        states: &[CoinState],
        peer: &dyn PeerLink,
    ) -> Result<SyncSummary, SyncError> {
        let changes = self.store.apply_coin_states(states).await?;
        let spends = self.process_removals(&changes.removed, peer).await?;
        self.dispatch_additional_spends(&spends).await?;

        Ok(SyncSummary {
            height: 0,
            coins_added: changes.added.len(),
            coins_removed: changes.removed.len(),
            additional_spends: spends.len(),
        })
    }

    /// Collects the coin spends that became relevant because of `removed` coins.
    ///
    /// A removed coin that created a singleton launcher yields the launcher spend. After that,
    /// every interested coin spent at the same height yields its spend, and the coin ids the
    /// wallet plugins derive from each spend are queued and followed in turn.
    pub(crate) async fn process_removals(
        &self,
        removed: &[CoinState],
        peer: &dyn PeerLink,
    ) -> Result<Vec<AdditionalCoinSpend>, SyncError> {
        let mut spends = Vec::new();

        for state in removed {
            let Some(spent_height) = state.spent_height else {
                continue;
            };

            let children = with_timeout(
                PeerRequest::Children,
                self.request_timeout(),
                peer.request_children(state.coin.name()),
            )
            .await?;
            for child in children.into_iter().filter(|child| child.coin.puzzle_hash == SINGLETON_LAUNCHER_HASH) {
                info!(launcher = %child.coin.name(), "found singleton launcher");
                let spend = self.fetch_puzzle_solution(peer, child.coin, spent_height).await?;
                self.add_interesting_coin_ids(&spend).await?;
                spends.push(AdditionalCoinSpend { coin_spend: spend, height: spent_height });
            }

            let mut queue: VecDeque<Bytes32> = self.store.get_interested_coin_ids().await?.into();
            let mut seen: HashSet<Bytes32> = HashSet::new();
            while let Some(coin_id) = queue.pop_front() {
                if !seen.insert(coin_id) {
                    continue;
                }

                let states = self.register_coin_ids(peer, vec![coin_id], 0).await?;
                let Some(coin_state) = states.into_iter().find(|state| state.coin.name() == coin_id)
                else {
                    continue;
                };
                if coin_state.spent_height != Some(spent_height) {
                    continue;
                }

                let spend = self.fetch_puzzle_solution(peer, coin_state.coin, spent_height).await?;
                let new_ids = self.add_interesting_coin_ids(&spend).await?;
                queue.extend(new_ids.into_iter().filter(|id| !seen.contains(id)));
                spends.push(AdditionalCoinSpend { coin_spend: spend, height: spent_height });
            }
        }

        Ok(spends)
    }

    /// Offers `spends` to the wallet plugins. Launcher spends nobody tracks yet may create new
    /// singleton wallets; every singleton wallet then sees every spend.
    pub(crate) async fn dispatch_additional_spends(
        &self,
        spends: &[AdditionalCoinSpend],
    ) -> Result<(), SyncError> {
        if spends.is_empty() {
            return Ok(());
        }

        let launchers = spends
            .iter()
            .filter(|spend| spend.coin_spend.coin.puzzle_hash == SINGLETON_LAUNCHER_HASH);
        for launcher in launchers {
            let launcher_id = launcher.coin_spend.coin.name();
            if self.wallets.tracks_launcher(&launcher_id).await? {
                warn!(%launcher_id, "already tracking launcher, not recreating");
                continue;
            }

            match self.wallets.factory().create_from_launcher(&launcher.coin_spend, spends).await {
                Ok(Some(wallet)) => {
                    info!(%launcher_id, wallet_id = wallet.wallet_id(), "created wallet for launcher");
                    self.wallets.register(wallet).await;
                },
                Ok(None) => debug!(%launcher_id, "launcher does not belong to a known wallet type"),
                Err(WalletError::CreationFailed(_, reason)) => {
                    debug!(%launcher_id, "not a launcher of ours: {reason}")
                },
                Err(err) => return Err(err.into()),
            }
        }

        for wallet in self.wallets.singleton_wallets().await {
            wallet.apply_coin_spends(spends).await?;
        }
        Ok(())
    }

    /// Asks the wallet plugins which coins `spend` makes relevant and persists them.
    async fn add_interesting_coin_ids(&self, spend: &CoinSpend) -> Result<Vec<Bytes32>, SyncError> {
        let coin_ids = self.wallets.factory().interesting_coin_ids(spend).await?;
        if !coin_ids.is_empty() {
            self.store.add_interested_coin_ids(coin_ids.clone()).await?;
        }
        Ok(coin_ids)
    }

    async fn fetch_puzzle_solution(
        &self,
        peer: &dyn PeerLink,
        coin: Coin,
        height: u32,
    ) -> Result<CoinSpend, SyncError> {
        let coin_id = coin.name();
        let response = with_timeout(
            PeerRequest::PuzzleSolution,
            self.request_timeout(),
            peer.request_puzzle_solution(coin_id, height),
        )
        .await?;
        if response.coin_name != coin_id || response.height != height {
            return Err(RpcError::unexpected(PeerRequest::PuzzleSolution, "solution for another coin").into());
        }

        Ok(CoinSpend { coin, puzzle_reveal: response.puzzle, solution: response.solution })
    }
}
