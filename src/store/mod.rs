//! Defines the storage interface used by the sync core.
//!
//! The [`StateStore`] trait abstracts over the wallet database. The sync core reads the wallet's
//! puzzle hashes, coins and recent chain through it, and writes the outcome of every validated
//! sync back through it. The trait exposes methods to:
//!
//! - Track the chain peak, the recent block window, the latest weight proof and the synced height.
//! - Look up derivation records and extend the puzzle hash look-ahead window.
//! - Read and update coin records, and apply coin states received from peers.
//! - Maintain the set of interested coin ids.
//! - List outgoing transactions and pending protocol actions.
//!
//! Mutating methods are only called by the sync core while it holds its state lock. Read-only
//! methods may be called at any time.
//!
//! [`InMemoryStore`] implements the trait without persistence.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::objects::{
    Bytes32, Coin, CoinRecord, CoinState, DerivationRecord, HeaderBlock, HeaderBlockRecord,
    TransactionRecord, WalletAction, WeightProof,
};

mod errors;
pub use errors::StoreError;

mod memory_store;
pub use memory_store::{InMemoryStore, StoreSnapshot};

// COIN STATE CHANGES
// ================================================================================================

/// The coin states that changed a stored record when applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoinStateChanges {
    /// States that created a record or moved its confirmed height.
    pub added: Vec<CoinState>,
    /// States that marked a record as spent.
    pub removed: Vec<CoinState>,
}

impl CoinStateChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// STATE STORE TRAIT
// ================================================================================================

/// The wallet state the sync core reads and mutates.
#[async_trait]
pub trait StateStore: Send + Sync {
    // CHAIN
    // --------------------------------------------------------------------------------------------

    /// Height up to which the wallet has synced with a trusted peer.
    async fn get_synced_height(&self) -> Result<u32, StoreError>;

    async fn set_synced_height(&self, height: u32) -> Result<(), StoreError>;

    /// The header of the local chain peak, if any.
    async fn get_peak(&self) -> Result<Option<HeaderBlock>, StoreError>;

    async fn set_peak(&self, peak: HeaderBlock) -> Result<(), StoreError>;

    async fn get_latest_tx_block(&self) -> Result<Option<HeaderBlock>, StoreError>;

    async fn set_latest_tx_block(&self, block: HeaderBlock) -> Result<(), StoreError>;

    /// Returns true if the block is part of the local recent chain.
    async fn contains_block(&self, header_hash: &Bytes32) -> Result<bool, StoreError>;

    async fn get_block(&self, header_hash: &Bytes32) -> Result<Option<HeaderBlock>, StoreError>;

    /// Every block of the local recent chain.
    async fn get_recent_blocks(&self) -> Result<Vec<HeaderBlock>, StoreError>;

    /// Appends validated blocks to the recent chain.
    async fn add_recent_blocks(&self, blocks: Vec<HeaderBlock>) -> Result<(), StoreError>;

    /// Stores the validated header records of transaction blocks.
    async fn add_header_block_records(
        &self,
        records: Vec<HeaderBlockRecord>,
    ) -> Result<(), StoreError>;

    async fn get_weight_proof(&self) -> Result<Option<WeightProof>, StoreError>;

    /// Stores a validated weight proof. Its recent chain becomes the local recent chain and its
    /// last block becomes the peak.
    async fn set_weight_proof(&self, weight_proof: WeightProof) -> Result<(), StoreError>;

    /// Discards every block, header record and coin change above `height`.
    async fn rollback_to_height(&self, height: u32) -> Result<(), StoreError>;

    // PUZZLE HASHES
    // --------------------------------------------------------------------------------------------

    async fn get_all_puzzle_hashes(&self) -> Result<BTreeSet<Bytes32>, StoreError>;

    async fn get_derivation_record(
        &self,
        puzzle_hash: &Bytes32,
    ) -> Result<Option<DerivationRecord>, StoreError>;

    /// Derives puzzle hashes until the look-ahead window is full. Returns the new ones.
    async fn create_more_puzzle_hashes(&self) -> Result<Vec<Bytes32>, StoreError>;

    // COINS
    // --------------------------------------------------------------------------------------------

    async fn get_coin_record(&self, coin_id: &Bytes32) -> Result<Option<CoinRecord>, StoreError>;

    async fn get_unspent_coin_ids(&self) -> Result<Vec<Bytes32>, StoreError>;

    /// Coins whose state may have changed since `height`: unspent coins and coins spent at or
    /// after it.
    async fn get_coins_to_check(&self, height: u32) -> Result<Vec<CoinRecord>, StoreError>;

    /// Coin ids referenced by open trade offers.
    async fn get_trade_coins_of_interest(&self) -> Result<Vec<Bytes32>, StoreError>;

    /// Applies coin states received from a peer. States for coins the wallet neither owns nor is
    /// interested in are ignored. Returns only the states that changed a record, so applying the
    /// same states twice reports no changes the second time.
    async fn apply_coin_states(&self, states: &[CoinState]) -> Result<CoinStateChanges, StoreError>;

    /// Records a coin created at `height` for the wallet owning `derivation`.
    async fn coin_added(
        &self,
        coin: Coin,
        height: u32,
        derivation: &DerivationRecord,
    ) -> Result<(), StoreError>;

    async fn set_coin_spent(&self, coin_id: &Bytes32, height: u32) -> Result<(), StoreError>;

    // INTERESTED COINS
    // --------------------------------------------------------------------------------------------

    async fn get_interested_coin_ids(&self) -> Result<Vec<Bytes32>, StoreError>;

    async fn add_interested_coin_ids(&self, coin_ids: Vec<Bytes32>) -> Result<(), StoreError>;

    // TRANSACTIONS AND ACTIONS
    // --------------------------------------------------------------------------------------------

    async fn get_not_sent_transactions(&self) -> Result<Vec<TransactionRecord>, StoreError>;

    async fn add_transaction(&self, transaction: TransactionRecord) -> Result<(), StoreError>;

    async fn get_pending_actions(&self) -> Result<Vec<WalletAction>, StoreError>;

    async fn add_action(&self, action: WalletAction) -> Result<(), StoreError>;

    async fn complete_action(&self, action_id: u32) -> Result<(), StoreError>;
}
