//! Keeps the wallet's coin state consistent with full node peers.
//!
//! [`SyncCoordinator`] is the entry point. Every peak announcement goes through
//! [`SyncCoordinator::handle_new_peak`], which picks one of three strategies:
//!
//! - Trusted sync: the peer is on the trusted list, so its coin states are applied as received.
//! - Untrusted sync: the peer is new and far ahead. Its weight proof is verified first, then every
//!   coin state it reports is proven against blocks the weight proof covers.
//! - Backtrack sync: the peer announced a peak near the local one. Headers are walked back to the
//!   fork point, validated as a span, and the additions and removals of each transaction block are
//!   fetched with inclusion proofs before any local state is touched.
//!
//! Peak handling is serialized by a peak lock. Store mutations are serialized by a separate state
//! lock that pushed coin state updates also take.

use core::time::Duration;
use std::{
    cmp::max,
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::Utc;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::{version_at_least, SyncConfig},
    consensus::{ChainValidationOracle, ConsensusConstants, WeightProofVerifier},
    errors::SyncError,
    objects::{Bytes32, CoinState, HeaderBlock},
    rpc::{
        domain::{CoinStateUpdate, NewPeakWallet},
        with_timeout, FullNodeConnections, PeerLink, PeerRequest, RpcError,
    },
    store::StateStore,
    wallets::{WalletId, WalletRegistry},
};

mod backtrack;
mod blocks;
mod cache;
mod interest;
mod resend;
mod trusted;
mod untrusted;

pub use cache::RequestCache;

/// Capacity of the state change channel. Slow subscribers miss older events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// SYNC SUMMARY
// ================================================================================================

/// Contains stats about a sync operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Height the wallet synced to
    pub height: u32,
    /// Number of coin states that created or moved a coin record
    pub coins_added: usize,
    /// Number of coin states that marked a coin as spent
    pub coins_removed: usize,
    /// Number of additional coin spends found while following interested coins
    pub additional_spends: usize,
}

impl SyncSummary {
    pub fn new_empty(height: u32) -> Self {
        Self { height, ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.coins_added == 0 && self.coins_removed == 0 && self.additional_spends == 0
    }

    pub fn combine_with(&mut self, other: &Self) {
        self.height = max(self.height, other.height);
        self.coins_added += other.coins_added;
        self.coins_removed += other.coins_removed;
        self.additional_spends += other.additional_spends;
    }
}

// STATE CHANGES AND OUTCOMES
// ================================================================================================

/// Notifications emitted to wallet front-ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateChange {
    NewBlock,
    CoinAdded(WalletId),
    CoinRemoved(WalletId),
    AddConnection,
    SyncChanged(bool),
}

/// Why a peak announcement was not acted upon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    ShuttingDown,
    /// The peer did not serve the header of the announced peak.
    PeakUnavailable,
    /// The announced peak is lighter than the local one.
    LighterThanLocalPeak,
    /// The peer has no transaction block at or below the announced peak.
    NoTransactionBlock,
    /// The peer's latest transaction block is too old for the peer to be synced.
    StalePeer,
    InvalidWeightProof,
    /// The peer served a coin state that did not check out against its blocks.
    InvalidCoinState,
    /// The peer failed to answer a request.
    PeerFault,
}

impl From<&SyncError> for RejectReason {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::WeightProofError(_) => RejectReason::InvalidWeightProof,
            SyncError::SpentBeforeCreated(_)
            | SyncError::InclusionProofFailed { .. }
            | SyncError::SpanValidationFailed { .. } => RejectReason::InvalidCoinState,
            _ => RejectReason::PeerFault,
        }
    }
}

/// What [`SyncCoordinator::handle_new_peak`] did with an announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeakOutcome {
    /// A trusted peer's peak was applied, after a trusted sync if this was the first peak from
    /// that peer.
    TrustedSynced(SyncSummary),
    /// A full untrusted sync ran against a verified weight proof.
    UntrustedSynced { fork_point: u32, summary: SyncSummary },
    /// The local chain was rolled back to `fork_height` and extended to the new peak.
    Backtracked { fork_height: u32, headers_fetched: usize },
    Rejected(RejectReason),
}

// SYNC COORDINATOR
// ================================================================================================

/// Drives wallet synchronization against connected full nodes.
pub struct SyncCoordinator {
    config: SyncConfig,
    store: Arc<dyn StateStore>,
    oracle: Arc<dyn ChainValidationOracle>,
    connections: Arc<dyn FullNodeConnections>,
    wallets: Arc<WalletRegistry>,
    new_peak_lock: Mutex<()>,
    state_lock: Mutex<()>,
    synced_peers: Mutex<HashSet<Bytes32>>,
    height_to_time: Mutex<HashMap<u32, u64>>,
    sync_mode: AtomicBool,
    shut_down: AtomicBool,
    events: broadcast::Sender<StateChange>,
}

impl SyncCoordinator {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn StateStore>,
        oracle: Arc<dyn ChainValidationOracle>,
        connections: Arc<dyn FullNodeConnections>,
        wallets: Arc<WalletRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            store,
            oracle,
            connections,
            wallets,
            new_peak_lock: Mutex::new(()),
            state_lock: Mutex::new(()),
            synced_peers: Mutex::new(HashSet::new()),
            height_to_time: Mutex::new(HashMap::new()),
            sync_mode: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            events,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Returns a receiver for the state changes emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_mode.load(Ordering::SeqCst)
    }

    /// Stops background work. Peak announcements received afterwards are ignored.
    pub fn close(&self) {
        info!("shutting down sync coordinator");
        self.shut_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub async fn is_synced_with(&self, node_id: &Bytes32) -> bool {
        self.synced_peers.lock().await.contains(node_id)
    }

    fn constants(&self) -> &ConsensusConstants {
        &self.config.constants
    }

    fn emit(&self, change: StateChange) {
        // no receivers is fine
        let _ = self.events.send(change);
    }

    fn set_sync_mode(&self, syncing: bool) {
        if self.sync_mode.swap(syncing, Ordering::SeqCst) != syncing {
            self.emit(StateChange::SyncChanged(syncing));
        }
    }

    // PEAK HANDLING
    // --------------------------------------------------------------------------------------------

    /// Handles a peak announced by `peer`.
    ///
    /// Trusted peers are synced from directly. Untrusted peers are first checked for being
    /// heavier than the local chain and recently active, then synced either fully through a
    /// weight proof or by backtracking to the fork point. Once the peak is handled, pending
    /// transactions and actions are resent to every full node.
    ///
    /// Any failure the peer is to blame for closes its connection. An invalid backtracked span is
    /// returned as an error; other peer failures are reported as a rejection.
    pub async fn handle_new_peak(
        &self,
        peak: &NewPeakWallet,
        peer: Arc<dyn PeerLink>,
    ) -> Result<PeakOutcome, SyncError> {
        if self.is_shut_down() {
            return Ok(PeakOutcome::Rejected(RejectReason::ShuttingDown));
        }

        let outcome = {
            let _peak_guard = self.new_peak_lock.lock().await;
            if self.config.is_trusted(&peer.peer_node_id()) {
                self.new_peak_from_trusted(peak, peer.as_ref()).await
            } else {
                self.new_peak_from_untrusted(peak, peer.as_ref()).await
            }
        };

        if let Err(err) = self.resend_queue().await {
            warn!("failed to resend pending messages: {err}");
        }
        outcome
    }

    async fn new_peak_from_trusted(
        &self,
        peak: &NewPeakWallet,
        peer: &dyn PeerLink,
    ) -> Result<PeakOutcome, SyncError> {
        let header = match self.request_header(peer, peak.height).await {
            Ok(header) => header,
            Err(err) => {
                warn!(height = peak.height, "bad peak response from trusted peer: {err}");
                return Ok(PeakOutcome::Rejected(RejectReason::PeakUnavailable));
            },
        };

        let _state_guard = self.state_lock.lock().await;
        let node_id = peer.peer_node_id();

        let mut summary = SyncSummary::new_empty(peak.height);
        if !self.is_synced_with(&node_id).await {
            self.set_sync_mode(true);
            let result = self.trusted_sync(peer).await;
            self.set_sync_mode(false);
            summary.combine_with(&result?);

            self.store.set_synced_height(peak.height).await?;
            self.synced_peers.lock().await.insert(node_id);
        }

        self.store.set_peak(header.clone()).await?;
        if let Some(latest_tx_block) = self.find_latest_tx_block(peer, header).await {
            self.store.set_latest_tx_block(latest_tx_block).await?;
        }

        self.emit(StateChange::NewBlock);
        self.set_sync_mode(false);
        Ok(PeakOutcome::TrustedSynced(summary))
    }

    async fn new_peak_from_untrusted(
        &self,
        peak: &NewPeakWallet,
        peer: &dyn PeerLink,
    ) -> Result<PeakOutcome, SyncError> {
        let header = match self.request_header(peer, peak.height).await {
            Ok(header) if header.header_hash() == peak.header_hash => header,
            Ok(header) => {
                warn!(
                    announced = %peak.header_hash,
                    served = %header.header_hash(),
                    "peer served a different block than it announced"
                );
                return Ok(PeakOutcome::Rejected(RejectReason::PeakUnavailable));
            },
            Err(err) => {
                warn!(height = peak.height, "bad peak response from peer: {err}");
                return Ok(PeakOutcome::Rejected(RejectReason::PeakUnavailable));
            },
        };

        if let Some(local_peak) = self.store.get_peak().await? {
            if header.weight < local_peak.weight {
                debug!(
                    peer_weight = header.weight,
                    local_weight = local_peak.weight,
                    "ignoring peak lighter than ours"
                );
                return Ok(PeakOutcome::Rejected(RejectReason::LighterThanLocalPeak));
            }
        }

        let Some(latest_tx_block) = self.find_latest_tx_block(peer, header.clone()).await else {
            info!("peer has no transaction block below its peak, dropping connection");
            peer.close().await;
            return Ok(PeakOutcome::Rejected(RejectReason::NoTransactionBlock));
        };
        if self.is_stale(&latest_tx_block) {
            info!("peer we connected to is not fully synced, dropping connection");
            peer.close().await;
            return Ok(PeakOutcome::Rejected(RejectReason::StalePeer));
        }

        let synced = self.is_synced_with(&peer.peer_node_id()).await;
        if !synced && peak.height >= self.constants().weight_proof_recent_blocks {
            self.set_sync_mode(true);
            let result = self.sync_from_untrusted_peer(peak, &header, latest_tx_block, peer).await;
            self.set_sync_mode(false);
            return self.reject_peer_faults(result, peer).await;
        }

        let _state_guard = self.state_lock.lock().await;
        let outcome = match self.backtrack(header, peer).await {
            Ok(outcome) => outcome,
            Err(err @ SyncError::SpanValidationFailed { .. }) => return Err(err),
            Err(err) => return self.reject_peer_faults(Err(err), peer).await,
        };
        self.store.set_latest_tx_block(latest_tx_block).await?;
        self.emit(StateChange::NewBlock);
        Ok(outcome)
    }

    /// Fetches and verifies the peer's weight proof, then replays the peer's coin states for every
    /// tracked puzzle hash and coin.
    async fn sync_from_untrusted_peer(
        &self,
        peak: &NewPeakWallet,
        header: &HeaderBlock,
        latest_tx_block: HeaderBlock,
        peer: &dyn PeerLink,
    ) -> Result<PeakOutcome, SyncError> {
        let weight_proof = with_timeout(
            PeerRequest::ProofOfWeight,
            self.config.peer.weight_proof_timeout(),
            peer.request_proof_of_weight(peak.height, peak.header_hash),
        )
        .await?;
        let fork_point =
            WeightProofVerifier::new(self.oracle.as_ref()).verify(&weight_proof, &header.header_hash())?;

        let _state_guard = self.state_lock.lock().await;
        let summary = self.untrusted_sync_to_peer(peer, &weight_proof).await?;

        self.store.set_weight_proof(weight_proof).await?;
        self.store.set_latest_tx_block(latest_tx_block).await?;
        self.synced_peers.lock().await.insert(peer.peer_node_id());
        self.emit(StateChange::NewBlock);

        Ok(PeakOutcome::UntrustedSynced { fork_point, summary })
    }

    /// Closes the connection when `result` failed because of the peer, and reports the failure as
    /// a rejection. Other errors are returned.
    async fn reject_peer_faults(
        &self,
        result: Result<PeakOutcome, SyncError>,
        peer: &dyn PeerLink,
    ) -> Result<PeakOutcome, SyncError> {
        match result {
            Err(err) if err.is_peer_fault() => {
                warn!(peer = %peer.peer_node_id(), "dropping peer: {err}");
                peer.close().await;
                Ok(PeakOutcome::Rejected(RejectReason::from(&err)))
            },
            other => other,
        }
    }

    /// Walks back from `header` to the nearest transaction block. Stops at height 0 or at the
    /// first failing request.
    async fn find_latest_tx_block(&self, peer: &dyn PeerLink, header: HeaderBlock) -> Option<HeaderBlock> {
        if header.is_transaction_block() {
            return Some(header);
        }

        let mut height = header.height;
        while height > 0 {
            height -= 1;
            match self.request_header(peer, height).await {
                Ok(block) if block.is_transaction_block() => return Some(block),
                Ok(_) => continue,
                Err(err) => {
                    debug!(height, "stopped looking for a transaction block: {err}");
                    return None;
                },
            }
        }
        None
    }

    fn is_stale(&self, latest_tx_block: &HeaderBlock) -> bool {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        let threshold = self.config.peer.staleness_threshold_secs;
        match latest_tx_block.timestamp() {
            Some(timestamp) => timestamp.saturating_add(threshold) < now,
            None => true,
        }
    }

    // CONNECTIONS
    // --------------------------------------------------------------------------------------------

    /// Handles a new full node connection. Peers speaking an outdated protocol are closed.
    /// Pending transactions the peer has not accepted yet are sent to it.
    ///
    /// Returns false if the peer was dropped.
    pub async fn on_connect(&self, peer: Arc<dyn PeerLink>) -> Result<bool, SyncError> {
        let version = peer.protocol_version();
        if !version_at_least(&version, &self.config.peer.min_protocol_version) {
            info!(%version, "disconnecting, full node running old software");
            peer.close().await;
            return Ok(false);
        }

        self.emit(StateChange::AddConnection);
        self.resend_to_peer(peer.as_ref()).await?;
        Ok(true)
    }

    /// Returns true if a usable full node connection exists.
    ///
    /// When a full node endpoint is pinned in the config, only a connection to it counts, and once
    /// it is found every other full node connection is closed.
    pub async fn has_full_node(&self) -> bool {
        let peers = self.connections.full_node_peers();
        let Some(pinned) = &self.config.full_node_peer else {
            return !peers.is_empty();
        };

        if !peers.iter().any(|peer| peer.endpoint().same_address(pinned)) {
            return false;
        }
        info!(%pinned, "will not attempt to connect to other nodes, already connected");
        for peer in peers.iter().filter(|peer| !peer.endpoint().same_address(pinned)) {
            info!(endpoint = %peer.endpoint(), "closing unnecessary connection");
            peer.close().await;
        }
        true
    }

    /// Periodically checks for a full node connection, up to the configured number of attempts.
    /// The task resolves to whether a full node was found.
    pub fn spawn_full_node_check(self: &Arc<Self>) -> JoinHandle<bool> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let interval = coordinator.config.peer.peer_connect_interval();
            let mut attempts = 0;
            while !coordinator.is_shut_down() && attempts < coordinator.config.peer.full_node_check_attempts {
                if coordinator.has_full_node().await {
                    coordinator.emit(StateChange::AddConnection);
                    return true;
                }
                attempts += 1;
                tokio::time::sleep(interval).await;
            }
            false
        })
    }

    /// Applies coin state changes pushed by a subscribed peer.
    ///
    /// Updates from untrusted peers are ignored; their changes are picked up from peak handling
    /// where they are proven. Returns `None` when the update was ignored.
    pub async fn state_update_received(
        &self,
        update: CoinStateUpdate,
        peer: Arc<dyn PeerLink>,
    ) -> Result<Option<SyncSummary>, SyncError> {
        if !self.config.is_trusted(&peer.peer_node_id()) {
            debug!(height = update.height, "ignoring coin state update from untrusted peer");
            return Ok(None);
        }

        let _state_guard = self.state_lock.lock().await;
        if let Some(peak) = self.store.get_peak().await? {
            if update.fork_height < peak.height {
                info!(fork_height = update.fork_height, "rolling back for pushed update");
                self.store.rollback_to_height(update.fork_height).await?;
            }
        }

        let known = self.store.get_all_puzzle_hashes().await?;
        let mut summary = self.handle_coin_state_change(&update.items, peer.as_ref()).await?;
        summary.height = update.height;

        let derived: Vec<Bytes32> = self
            .store
            .get_all_puzzle_hashes()
            .await?
            .into_iter()
            .filter(|puzzle_hash| !known.contains(puzzle_hash))
            .collect();
        if !derived.is_empty() {
            self.new_puzzle_hashes_created(derived).await?;
        }

        self.emit_wallet_changes(&summary).await;
        Ok(Some(summary))
    }

    /// Subscribes every connected full node to freshly derived puzzle hashes and applies what they
    /// report. States from untrusted peers are validated against the stored weight proof first,
    /// and skipped when there is none.
    pub async fn new_puzzle_hashes_created(&self, puzzle_hashes: Vec<Bytes32>) -> Result<(), SyncError> {
        for peer in self.connections.full_node_peers() {
            let states = match self.register_puzzle_hashes(peer.as_ref(), puzzle_hashes.clone(), 0).await {
                Ok(states) => states,
                Err(err) => {
                    warn!(peer = %peer.peer_node_id(), "failed to subscribe to new puzzle hashes: {err}");
                    continue;
                },
            };

            if !self.config.is_trusted(&peer.peer_node_id()) {
                let Some(weight_proof) = self.store.get_weight_proof().await? else {
                    debug!("no weight proof to validate new puzzle hash states against");
                    continue;
                };
                let mut cache = RequestCache::new();
                let validated = self
                    .validate_received_states(&states, peer.as_ref(), &weight_proof, &mut cache)
                    .await;
                if let Err(err) = validated {
                    if err.is_peer_fault() {
                        warn!(peer = %peer.peer_node_id(), "dropping peer: {err}");
                        peer.close().await;
                        continue;
                    }
                    return Err(err);
                }
            }

            self.handle_coin_state_change(&states, peer.as_ref()).await?;
        }
        Ok(())
    }

    // QUERIES
    // --------------------------------------------------------------------------------------------

    /// Returns the current states of `coin_ids` as reported by the first full node.
    pub async fn get_coin_state(&self, coin_ids: Vec<Bytes32>) -> Result<Vec<CoinState>, SyncError> {
        let peer = self.first_full_node()?;
        Ok(self.register_coin_ids(peer.as_ref(), coin_ids, 0).await?)
    }

    /// Returns the states of every coin with one of `puzzle_hashes` as reported by the first full
    /// node.
    pub async fn get_coins_with_puzzle_hash(
        &self,
        puzzle_hashes: Vec<Bytes32>,
    ) -> Result<Vec<CoinState>, SyncError> {
        let peer = self.first_full_node()?;
        Ok(self.register_puzzle_hashes(peer.as_ref(), puzzle_hashes, 0).await?)
    }

    /// Returns the timestamp of the transaction block at `height`. Timestamps are cached for the
    /// lifetime of the coordinator.
    pub async fn timestamp_for_height(&self, height: u32) -> Result<u64, SyncError> {
        if let Some(timestamp) = self.height_to_time.lock().await.get(&height) {
            return Ok(*timestamp);
        }

        let peer = self.first_full_node()?;
        let block = self.request_header(peer.as_ref(), height).await?;
        let timestamp = block.timestamp().ok_or_else(|| {
            RpcError::unexpected(PeerRequest::BlockHeader, format!("block {height} is not a transaction block"))
        })?;
        self.height_to_time.lock().await.insert(height, timestamp);
        Ok(timestamp)
    }

    fn first_full_node(&self) -> Result<Arc<dyn PeerLink>, SyncError> {
        self.connections.full_node_peers().into_iter().next().ok_or(SyncError::NoFullNodeConnection)
    }

    /// Emits a removal and an addition event for every wallet, so front-ends refresh balances.
    async fn emit_wallet_changes(&self, summary: &SyncSummary) {
        if summary.is_empty() {
            return;
        }
        for wallet_id in self.wallets.wallet_ids().await {
            self.emit(StateChange::CoinRemoved(wallet_id));
            self.emit(StateChange::CoinAdded(wallet_id));
        }
    }

    // PEER REQUESTS
    // --------------------------------------------------------------------------------------------

    fn request_timeout(&self) -> Duration {
        self.config.peer.request_timeout()
    }

    async fn request_header(&self, peer: &dyn PeerLink, height: u32) -> Result<HeaderBlock, RpcError> {
        let header = with_timeout(
            PeerRequest::BlockHeader,
            self.request_timeout(),
            peer.request_block_header(height),
        )
        .await?;
        if header.height != height {
            return Err(RpcError::unexpected(
                PeerRequest::BlockHeader,
                format!("asked for height {height}, got {}", header.height),
            ));
        }
        Ok(header)
    }

    async fn register_puzzle_hashes(
        &self,
        peer: &dyn PeerLink,
        puzzle_hashes: Vec<Bytes32>,
        min_height: u32,
    ) -> Result<Vec<CoinState>, RpcError> {
        with_timeout(
            PeerRequest::PhUpdates,
            self.request_timeout(),
            peer.register_for_ph_updates(puzzle_hashes, min_height),
        )
        .await
    }

    async fn register_coin_ids(
        &self,
        peer: &dyn PeerLink,
        coin_ids: Vec<Bytes32>,
        min_height: u32,
    ) -> Result<Vec<CoinState>, RpcError> {
        with_timeout(
            PeerRequest::CoinUpdates,
            self.request_timeout(),
            peer.register_for_coin_updates(coin_ids, min_height),
        )
        .await
    }
}
