use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CoinStateChanges, StateStore, StoreError};
use crate::{
    objects::{
        Bytes32, Coin, CoinRecord, CoinState, DerivationRecord, G1Element, HeaderBlock,
        HeaderBlockRecord, TransactionRecord, WalletAction, WeightProof,
    },
    wallets::{WalletId, WalletType},
};

/// Wallet id of the standard wallet the look-ahead window derives puzzle hashes for.
const STANDARD_WALLET_ID: WalletId = 1;

type PuzzleHashDeriver = Arc<dyn Fn(u32) -> Bytes32 + Send + Sync>;

// STORE SNAPSHOT
// ================================================================================================

/// Comparable view of everything a sync can change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub peak: Option<Bytes32>,
    pub coins: BTreeMap<Bytes32, CoinRecord>,
    pub tracked_states: BTreeMap<Bytes32, CoinState>,
    pub puzzle_hashes: BTreeSet<Bytes32>,
    pub interested_coin_ids: BTreeSet<Bytes32>,
    pub header_records: usize,
}

// IN-MEMORY STORE
// ================================================================================================

#[derive(Default)]
struct StoreState {
    synced_height: u32,
    peak: Option<HeaderBlock>,
    latest_tx_block: Option<HeaderBlock>,
    blocks: HashMap<Bytes32, HeaderBlock>,
    header_records: BTreeMap<u32, HeaderBlockRecord>,
    weight_proof: Option<WeightProof>,
    derivations: BTreeMap<Bytes32, DerivationRecord>,
    next_index: u32,
    last_used_index: Option<u32>,
    coins: BTreeMap<Bytes32, CoinRecord>,
    /// States of interested coins the wallet does not own.
    tracked_states: BTreeMap<Bytes32, CoinState>,
    interested_coin_ids: BTreeSet<Bytes32>,
    trade_coins: Vec<Bytes32>,
    transactions: BTreeMap<Bytes32, TransactionRecord>,
    actions: BTreeMap<u32, WalletAction>,
}

/// Derives the standard wallet's puzzle hashes ahead of use.
struct Lookahead {
    deriver: PuzzleHashDeriver,
    window: u32,
    max_derivations: u32,
}

impl Lookahead {
    /// Derives puzzle hashes until `window` unused ones follow the highest used index.
    fn extend(&self, state: &mut StoreState) -> Vec<Bytes32> {
        let target = state
            .last_used_index
            .map(|index| index.saturating_add(1))
            .unwrap_or(0)
            .saturating_add(self.window)
            .min(self.max_derivations);

        let mut created = Vec::new();
        while state.next_index < target {
            let index = state.next_index;
            let puzzle_hash = (self.deriver)(index);
            state.derivations.insert(
                puzzle_hash,
                DerivationRecord {
                    index,
                    puzzle_hash,
                    pubkey: G1Element::default(),
                    wallet_type: WalletType::Standard,
                    wallet_id: STANDARD_WALLET_ID,
                },
            );
            created.push(puzzle_hash);
            state.next_index += 1;
        }
        created
    }
}

/// Outcome of applying one coin state to the stored records.
#[derive(Default)]
struct RecordChange {
    added: bool,
    removed: bool,
}

/// A [`StateStore`] kept entirely in memory.
///
/// The standard wallet's puzzle hashes are produced by a deriver function. The store keeps
/// `lookahead` unused derivations past the highest used one, up to `max_derivations`.
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    lookahead: Lookahead,
}

impl InMemoryStore {
    pub fn new(deriver: impl Fn(u32) -> Bytes32 + Send + Sync + 'static, lookahead: u32) -> Self {
        Self::with_max_derivations(deriver, lookahead, u32::MAX)
    }

    pub fn with_max_derivations(
        deriver: impl Fn(u32) -> Bytes32 + Send + Sync + 'static,
        lookahead: u32,
        max_derivations: u32,
    ) -> Self {
        let lookahead = Lookahead { deriver: Arc::new(deriver), window: lookahead, max_derivations };
        let mut state = StoreState::default();
        lookahead.extend(&mut state);
        Self { state: RwLock::new(state), lookahead }
    }

    /// Registers a puzzle hash owned by a wallet other than the standard one.
    pub async fn add_derivation(&self, record: DerivationRecord) {
        self.state.write().await.derivations.insert(record.puzzle_hash, record);
    }

    pub async fn add_trade_coin(&self, coin_id: Bytes32) {
        self.state.write().await.trade_coins.push(coin_id);
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        StoreSnapshot {
            peak: state.peak.as_ref().map(HeaderBlock::header_hash),
            coins: state.coins.clone(),
            tracked_states: state.tracked_states.clone(),
            puzzle_hashes: state.derivations.keys().copied().collect(),
            interested_coin_ids: state.interested_coin_ids.clone(),
            header_records: state.header_records.len(),
        }
    }

    fn mark_used(state: &mut StoreState, derivation: &DerivationRecord) {
        if derivation.wallet_id == STANDARD_WALLET_ID
            && state.last_used_index.map(|used| derivation.index > used).unwrap_or(true)
        {
            state.last_used_index = Some(derivation.index);
        }
    }

    fn apply_coin_state(state: &mut StoreState, coin_state: &CoinState, created: u32) -> RecordChange {
        let coin_id = coin_state.coin.name();

        if let Some(record) = state.coins.get_mut(&coin_id) {
            if record.matches_state(coin_state) {
                return RecordChange::default();
            }
            let change = RecordChange {
                added: record.confirmed_block_index != created
                    || (record.is_spent() && coin_state.spent_height.is_none()),
                removed: !record.is_spent() && coin_state.spent_height.is_some(),
            };
            record.confirmed_block_index = created;
            record.spent_block_index = coin_state.spent_height;
            return change;
        }

        if let Some(derivation) = state.derivations.get(&coin_state.coin.puzzle_hash).cloned() {
            state.coins.insert(
                coin_id,
                CoinRecord {
                    coin: coin_state.coin.clone(),
                    confirmed_block_index: created,
                    spent_block_index: coin_state.spent_height,
                    wallet_id: derivation.wallet_id,
                    wallet_type: derivation.wallet_type,
                },
            );
            Self::mark_used(state, &derivation);
            return RecordChange { added: true, removed: coin_state.spent_height.is_some() };
        }

        if !state.interested_coin_ids.contains(&coin_id) {
            return RecordChange::default();
        }
        match state.tracked_states.insert(coin_id, coin_state.clone()) {
            Some(previous) if previous == *coin_state => RecordChange::default(),
            Some(previous) => RecordChange {
                added: previous.created_height != coin_state.created_height,
                removed: previous.spent_height.is_none() && coin_state.spent_height.is_some(),
            },
            None => RecordChange { added: true, removed: coin_state.spent_height.is_some() },
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    // CHAIN
    // --------------------------------------------------------------------------------------------

    async fn get_synced_height(&self) -> Result<u32, StoreError> {
        Ok(self.state.read().await.synced_height)
    }

    async fn set_synced_height(&self, height: u32) -> Result<(), StoreError> {
        self.state.write().await.synced_height = height;
        Ok(())
    }

    async fn get_peak(&self) -> Result<Option<HeaderBlock>, StoreError> {
        Ok(self.state.read().await.peak.clone())
    }

    async fn set_peak(&self, peak: HeaderBlock) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.blocks.insert(peak.header_hash(), peak.clone());
        state.peak = Some(peak);
        Ok(())
    }

    async fn get_latest_tx_block(&self) -> Result<Option<HeaderBlock>, StoreError> {
        Ok(self.state.read().await.latest_tx_block.clone())
    }

    async fn set_latest_tx_block(&self, block: HeaderBlock) -> Result<(), StoreError> {
        self.state.write().await.latest_tx_block = Some(block);
        Ok(())
    }

    async fn contains_block(&self, header_hash: &Bytes32) -> Result<bool, StoreError> {
        Ok(self.state.read().await.blocks.contains_key(header_hash))
    }

    async fn get_block(&self, header_hash: &Bytes32) -> Result<Option<HeaderBlock>, StoreError> {
        Ok(self.state.read().await.blocks.get(header_hash).cloned())
    }

    async fn get_recent_blocks(&self) -> Result<Vec<HeaderBlock>, StoreError> {
        let mut blocks: Vec<HeaderBlock> = self.state.read().await.blocks.values().cloned().collect();
        blocks.sort_by_key(|block| block.height);
        Ok(blocks)
    }

    async fn add_recent_blocks(&self, blocks: Vec<HeaderBlock>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for block in blocks {
            state.blocks.insert(block.header_hash(), block);
        }
        Ok(())
    }

    async fn add_header_block_records(
        &self,
        records: Vec<HeaderBlockRecord>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for record in records {
            state.header_records.insert(record.height(), record);
        }
        Ok(())
    }

    async fn get_weight_proof(&self) -> Result<Option<WeightProof>, StoreError> {
        Ok(self.state.read().await.weight_proof.clone())
    }

    async fn set_weight_proof(&self, weight_proof: WeightProof) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for block in &weight_proof.recent_chain_data {
            state.blocks.insert(block.header_hash(), block.clone());
        }
        if let Some(peak) = weight_proof.peak() {
            let heavier = state.peak.as_ref().map(|current| peak.weight >= current.weight).unwrap_or(true);
            if heavier {
                state.peak = Some(peak.clone());
            }
        }
        state.weight_proof = Some(weight_proof);
        Ok(())
    }

    async fn rollback_to_height(&self, height: u32) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        state.blocks.retain(|_, block| block.height <= height);
        state.header_records.retain(|block_height, _| *block_height <= height);
        if state.peak.as_ref().map(|peak| peak.height > height).unwrap_or(false) {
            state.peak = state.blocks.values().find(|block| block.height == height).cloned();
        }
        if state.latest_tx_block.as_ref().map(|block| block.height > height).unwrap_or(false) {
            state.latest_tx_block = None;
        }
        state.synced_height = state.synced_height.min(height);

        state.coins.retain(|_, record| record.confirmed_block_index <= height);
        for record in state.coins.values_mut() {
            if record.spent_block_index.map(|spent| spent > height).unwrap_or(false) {
                record.spent_block_index = None;
            }
        }
        state
            .tracked_states
            .retain(|_, coin_state| coin_state.created_height.map(|created| created <= height).unwrap_or(false));
        for coin_state in state.tracked_states.values_mut() {
            if coin_state.spent_height.map(|spent| spent > height).unwrap_or(false) {
                coin_state.spent_height = None;
            }
        }
        Ok(())
    }

    // PUZZLE HASHES
    // --------------------------------------------------------------------------------------------

    async fn get_all_puzzle_hashes(&self) -> Result<BTreeSet<Bytes32>, StoreError> {
        Ok(self.state.read().await.derivations.keys().copied().collect())
    }

    async fn get_derivation_record(
        &self,
        puzzle_hash: &Bytes32,
    ) -> Result<Option<DerivationRecord>, StoreError> {
        Ok(self.state.read().await.derivations.get(puzzle_hash).cloned())
    }

    async fn create_more_puzzle_hashes(&self) -> Result<Vec<Bytes32>, StoreError> {
        let mut state = self.state.write().await;
        Ok(self.lookahead.extend(&mut state))
    }

    // COINS
    // --------------------------------------------------------------------------------------------

    async fn get_coin_record(&self, coin_id: &Bytes32) -> Result<Option<CoinRecord>, StoreError> {
        Ok(self.state.read().await.coins.get(coin_id).cloned())
    }

    async fn get_unspent_coin_ids(&self) -> Result<Vec<Bytes32>, StoreError> {
        let state = self.state.read().await;
        Ok(state.coins.iter().filter(|(_, record)| !record.is_spent()).map(|(id, _)| *id).collect())
    }

    async fn get_coins_to_check(&self, height: u32) -> Result<Vec<CoinRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .coins
            .values()
            .filter(|record| record.spent_block_index.map(|spent| spent >= height).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_trade_coins_of_interest(&self) -> Result<Vec<Bytes32>, StoreError> {
        Ok(self.state.read().await.trade_coins.clone())
    }

    async fn apply_coin_states(&self, states: &[CoinState]) -> Result<CoinStateChanges, StoreError> {
        let mut state = self.state.write().await;
        let mut changes = CoinStateChanges::default();

        for coin_state in states {
            let Some(created) = coin_state.created_height else {
                continue;
            };
            let change = Self::apply_coin_state(&mut state, coin_state, created);
            if change.added {
                changes.added.push(coin_state.clone());
            }
            if change.removed {
                changes.removed.push(coin_state.clone());
            }
        }

        self.lookahead.extend(&mut state);
        Ok(changes)
    }

    async fn coin_added(
        &self,
        coin: Coin,
        height: u32,
        derivation: &DerivationRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.coins.entry(coin.name()).or_insert(CoinRecord {
            coin,
            confirmed_block_index: height,
            spent_block_index: None,
            wallet_id: derivation.wallet_id,
            wallet_type: derivation.wallet_type,
        });
        Self::mark_used(&mut state, derivation);
        Ok(())
    }

    async fn set_coin_spent(&self, coin_id: &Bytes32, height: u32) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state.coins.get_mut(coin_id).ok_or(StoreError::CoinNotFound(*coin_id))?;
        record.spent_block_index = Some(height);
        Ok(())
    }

    // INTERESTED COINS
    // --------------------------------------------------------------------------------------------

    async fn get_interested_coin_ids(&self) -> Result<Vec<Bytes32>, StoreError> {
        Ok(self.state.read().await.interested_coin_ids.iter().copied().collect())
    }

    async fn add_interested_coin_ids(&self, coin_ids: Vec<Bytes32>) -> Result<(), StoreError> {
        self.state.write().await.interested_coin_ids.extend(coin_ids);
        Ok(())
    }

    // TRANSACTIONS AND ACTIONS
    // --------------------------------------------------------------------------------------------

    async fn get_not_sent_transactions(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|transaction| !transaction.confirmed && transaction.spend_bundle.is_some())
            .cloned()
            .collect())
    }

    async fn add_transaction(&self, transaction: TransactionRecord) -> Result<(), StoreError> {
        self.state.write().await.transactions.insert(transaction.name, transaction);
        Ok(())
    }

    async fn get_pending_actions(&self) -> Result<Vec<WalletAction>, StoreError> {
        let state = self.state.read().await;
        Ok(state.actions.values().filter(|action| !action.done).cloned().collect())
    }

    async fn add_action(&self, action: WalletAction) -> Result<(), StoreError> {
        self.state.write().await.actions.insert(action.id, action);
        Ok(())
    }

    async fn complete_action(&self, action_id: u32) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let action = state
            .actions
            .get_mut(&action_id)
            .ok_or_else(|| StoreError::QueryError(format!("unknown action {action_id}")))?;
        action.done = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryStore;
    use crate::{
        mock::puzzle_hash,
        objects::{Bytes32, Coin, CoinState, DerivationRecord, G1Element, WalletAction},
        store::{StateStore, StoreError},
        wallets::WalletType,
    };

    fn coin_at(index: u32, amount: u64) -> Coin {
        Coin::new(Bytes32::new([9; 32]), puzzle_hash(index), amount)
    }

    #[tokio::test]
    async fn receiving_at_last_derived_index_extends_lookahead() {
        let store = InMemoryStore::new(puzzle_hash, 3);
        assert_eq!(store.get_all_puzzle_hashes().await.unwrap().len(), 3);

        let state = CoinState::new(coin_at(2, 100), Some(5), None);
        let changes = store.apply_coin_states(&[state.clone()]).await.unwrap();
        assert_eq!(changes.added, vec![state.clone()]);
        assert!(changes.removed.is_empty());
        assert_eq!(store.get_all_puzzle_hashes().await.unwrap().len(), 6);

        let changes = store.apply_coin_states(&[state]).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn lookahead_stops_at_max_derivations() {
        let store = InMemoryStore::with_max_derivations(puzzle_hash, 3, 4);
        store.apply_coin_states(&[CoinState::new(coin_at(2, 1), Some(1), None)]).await.unwrap();

        assert_eq!(store.get_all_puzzle_hashes().await.unwrap().len(), 4);
        assert!(store.create_more_puzzle_hashes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn coins_of_other_wallets_keep_their_owner() {
        let store = InMemoryStore::new(puzzle_hash, 2);
        let pool_puzzle_hash = Bytes32::new([4; 32]);
        store
            .add_derivation(DerivationRecord {
                index: 0,
                puzzle_hash: pool_puzzle_hash,
                pubkey: G1Element::default(),
                wallet_type: WalletType::Pooling,
                wallet_id: 4,
            })
            .await;

        let coin = Coin::new(Bytes32::new([1; 32]), pool_puzzle_hash, 7);
        store.apply_coin_states(&[CoinState::new(coin.clone(), Some(3), None)]).await.unwrap();

        let record = store.get_coin_record(&coin.name()).await.unwrap().unwrap();
        assert_eq!(record.wallet_id, 4);
        assert_eq!(record.wallet_type, WalletType::Pooling);
        assert_eq!(store.get_all_puzzle_hashes().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn foreign_and_heightless_states_are_ignored() {
        let store = InMemoryStore::new(puzzle_hash, 2);
        let foreign = Coin::new(Bytes32::new([1; 32]), Bytes32::new([2; 32]), 5);
        let interested = Coin::new(Bytes32::new([3; 32]), Bytes32::new([2; 32]), 5);
        store.add_interested_coin_ids(vec![interested.name()]).await.unwrap();

        let changes = store
            .apply_coin_states(&[
                CoinState::new(foreign, Some(1), None),
                CoinState::new(coin_at(0, 1), None, None),
                CoinState::new(interested.clone(), Some(2), Some(4)),
            ])
            .await
            .unwrap();

        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.removed.len(), 1);
        let snapshot = store.snapshot().await;
        assert!(snapshot.coins.is_empty());
        assert!(snapshot.tracked_states.contains_key(&interested.name()));
    }

    #[tokio::test]
    async fn rollback_discards_changes_above_height() {
        let store = InMemoryStore::new(puzzle_hash, 3);
        let kept = coin_at(0, 1);
        let orphaned = coin_at(1, 2);
        store
            .apply_coin_states(&[
                CoinState::new(kept.clone(), Some(5), Some(8)),
                CoinState::new(orphaned.clone(), Some(7), None),
            ])
            .await
            .unwrap();
        store.set_synced_height(8).await.unwrap();

        store.rollback_to_height(6).await.unwrap();

        let record = store.get_coin_record(&kept.name()).await.unwrap().unwrap();
        assert_eq!(record.spent_block_index, None);
        assert!(store.get_coin_record(&orphaned.name()).await.unwrap().is_none());
        assert_eq!(store.get_synced_height().await.unwrap(), 6);
        assert_eq!(store.get_unspent_coin_ids().await.unwrap(), vec![kept.name()]);
    }

    #[tokio::test]
    async fn coins_to_check_include_unspent_and_recently_spent() {
        let store = InMemoryStore::new(puzzle_hash, 4);
        store
            .apply_coin_states(&[
                CoinState::new(coin_at(0, 1), Some(1), Some(2)),
                CoinState::new(coin_at(1, 1), Some(1), Some(9)),
                CoinState::new(coin_at(2, 1), Some(1), None),
            ])
            .await
            .unwrap();

        let to_check = store.get_coins_to_check(5).await.unwrap();
        assert_eq!(to_check.len(), 2);
        assert!(to_check.iter().all(|record| record.spent_block_index != Some(2)));

        assert!(matches!(
            store.set_coin_spent(&Bytes32::new([8; 32]), 3).await,
            Err(StoreError::CoinNotFound(_))
        ));
    }

    #[tokio::test]
    async fn completed_actions_are_no_longer_pending() {
        let store = InMemoryStore::new(puzzle_hash, 1);
        store
            .add_action(WalletAction {
                id: 3,
                name: "request_puzzle_solution".to_string(),
                wallet_id: 2,
                wallet_type: WalletType::DistributedId,
                data: "{}".to_string(),
                done: false,
            })
            .await
            .unwrap();
        store.add_trade_coin(Bytes32::new([6; 32])).await;

        assert_eq!(store.get_pending_actions().await.unwrap().len(), 1);
        store.complete_action(3).await.unwrap();
        assert!(store.get_pending_actions().await.unwrap().is_empty());
        assert!(matches!(store.complete_action(4).await, Err(StoreError::QueryError(_))));
        assert_eq!(store.get_trade_coins_of_interest().await.unwrap(), vec![Bytes32::new([6; 32])]);
    }
}
