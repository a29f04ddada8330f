use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    config::SyncConfig,
    consensus::ChainValidationOracle,
    objects::{
        merkle::{additions_root, coin_list_hash, removals_root, MerkleSet},
        sha256, AdditionalCoinSpend, Bytes32, Coin, CoinSpend, CoinState, Foliage,
        FoliageTransactionBlock, G1Element, G2Element, HeaderBlock, ProofOfSpace, Program,
        RewardChainBlock, SubEpochData, WeightProof,
    },
    rpc::{
        domain::{
            AdditionProof, AdditionsResponse, NewPeakWallet, OutboundMessage,
            PuzzleSolutionResponse, RemovalsResponse, SesInfo,
        },
        Endpoint, FullNodeConnections, PeerLink, PeerRequest, RpcError,
    },
    store::InMemoryStore,
    sync::SyncCoordinator,
    wallets::{DerivedWallet, WalletError, WalletFactory, WalletId, WalletRegistry, WalletType},
};

/// Weight every mock block adds to the chain.
const WEIGHT_PER_BLOCK: u128 = 7;

/// Returns the puzzle hash the test stores derive at `index`.
pub fn puzzle_hash(index: u32) -> Bytes32 {
    sha256(&[b"puzzle", &index.to_be_bytes()])
}

pub fn node_id(seed: u8) -> Bytes32 {
    Bytes32::new([seed; 32])
}

// CHAIN BUILDER
// ================================================================================================

/// Builds header chains whose commitments match the coins added and spent at each height.
///
/// Every block is a transaction block linked to its predecessor, with a timestamp that makes the
/// chain tip look current unless an age is set.
#[derive(Clone, Debug, Default)]
pub struct ChainBuilder {
    additions: BTreeMap<u32, Vec<Coin>>,
    removals: BTreeMap<u32, Vec<Coin>>,
    age_secs: u64,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_coin(&mut self, height: u32, coin: Coin) -> &mut Self {
        self.additions.entry(height).or_default().push(coin);
        self
    }

    pub fn spend_coin(&mut self, height: u32, coin: Coin) -> &mut Self {
        self.removals.entry(height).or_default().push(coin);
        self
    }

    /// Shifts every timestamp `age_secs` into the past.
    pub fn with_age(&mut self, age_secs: u64) -> &mut Self {
        self.age_secs = age_secs;
        self
    }

    /// Builds blocks at heights `0..len`.
    pub fn build(&mut self, len: u32) -> Vec<HeaderBlock> {
        self.extend(&[], len, 0)
    }

    /// Extends `prefix` up to `total_len` blocks. Blocks built with different tags differ, so
    /// two extensions of the same prefix fork from its tip.
    pub fn extend(&mut self, prefix: &[HeaderBlock], total_len: u32, tag: u8) -> Vec<HeaderBlock> {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let mut blocks = prefix.to_vec();

        for height in prefix.len() as u32..total_len {
            let timestamp = now - self.age_secs - u64::from(total_len - height);
            let block = self.block(height, blocks.last(), timestamp, tag);
            blocks.push(block);
        }
        blocks
    }

    /// Re-points the transaction block of `block` at `hash`, keeping the foliage consistent.
    pub fn set_prev_transaction_block(&self, block: &mut HeaderBlock, hash: Bytes32) {
        if let Some(transaction_block) = block.foliage_transaction_block.as_mut() {
            transaction_block.prev_transaction_block_hash = hash;
            block.foliage.foliage_transaction_block_hash = Some(transaction_block.hash());
        }
    }

    /// Builds a weight proof whose recent window holds the last `recent_len` blocks of `chain`.
    pub fn weight_proof(&self, chain: &[HeaderBlock], recent_len: usize, sub_epochs: u8) -> WeightProof {
        let mut summaries: Vec<SubEpochData> = Vec::new();
        for index in 0..sub_epochs {
            let prev_subepoch_summary_hash = summaries.last().map(SubEpochData::summary_hash);
            summaries.push(SubEpochData {
                prev_subepoch_summary_hash,
                reward_chain_hash: sha256(&[b"reward chain", &[index]]),
                num_blocks_overflow: 0,
                new_sub_slot_iters: None,
                new_difficulty: None,
            });
        }

        let start = chain.len().saturating_sub(recent_len);
        WeightProof { sub_epochs: summaries, recent_chain_data: chain[start..].to_vec() }
    }

    /// Wraps `blocks` with the coins this builder committed to, and a weight proof covering the
    /// whole chain.
    pub fn mock_chain(&self, blocks: Vec<HeaderBlock>) -> MockChain {
        let weight_proof = self.weight_proof(&blocks, blocks.len(), 2);
        MockChain {
            blocks,
            additions: self.additions.clone(),
            removals: self.removals.clone(),
            weight_proof,
        }
    }

    fn block(&self, height: u32, prev: Option<&HeaderBlock>, timestamp: u64, tag: u8) -> HeaderBlock {
        let prev_header_hash = prev.map(HeaderBlock::header_hash).unwrap_or(Bytes32::ZERO);
        let additions = group_by_puzzle_hash(self.additions.get(&height));
        let removed: Vec<Bytes32> =
            self.removals.get(&height).into_iter().flatten().map(Coin::name).collect();

        let transaction_block = FoliageTransactionBlock {
            prev_transaction_block_hash: prev_header_hash,
            timestamp,
            additions_root: additions_root(&additions),
            removals_root: removals_root(&removed),
        };

        HeaderBlock {
            height,
            weight: u128::from(height + 1) * WEIGHT_PER_BLOCK + u128::from(tag),
            prev_header_hash,
            finished_sub_slots: Vec::new(),
            reward_chain_block: RewardChainBlock {
                signage_point_index: 0,
                proof_of_space: ProofOfSpace {
                    challenge: sha256(&[b"challenge", &height.to_be_bytes(), &[tag]]),
                    plot_public_key: G1Element(vec![tag; 48]),
                    size: 32,
                    proof: vec![tag; 8],
                },
                challenge_chain_sp_vdf_output: None,
            },
            foliage: Foliage {
                foliage_transaction_block_hash: Some(transaction_block.hash()),
                foliage_transaction_block_signature: Some(G2Element(vec![1; 96])),
            },
            foliage_transaction_block: Some(transaction_block),
            transactions_filter: Vec::new(),
        }
    }
}

fn group_by_puzzle_hash(coins: Option<&Vec<Coin>>) -> Vec<(Bytes32, Vec<Coin>)> {
    let mut grouped: BTreeMap<Bytes32, Vec<Coin>> = BTreeMap::new();
    for coin in coins.into_iter().flatten() {
        grouped.entry(coin.puzzle_hash).or_default().push(coin.clone());
    }
    grouped.into_iter().collect()
}

// MOCK CHAIN
// ================================================================================================

/// A peer's view of the chain: headers, the coins each block added and spent, and the weight
/// proof the peer serves.
#[derive(Clone, Debug)]
pub struct MockChain {
    pub blocks: Vec<HeaderBlock>,
    additions: BTreeMap<u32, Vec<Coin>>,
    removals: BTreeMap<u32, Vec<Coin>>,
    pub weight_proof: WeightProof,
}

impl MockChain {
    pub fn peak(&self) -> &HeaderBlock {
        self.blocks.last().expect("mock chain is empty")
    }

    pub fn block(&self, height: u32) -> Option<&HeaderBlock> {
        self.blocks.get(height as usize)
    }

    /// The announcement a full node would send for the chain tip.
    pub fn announcement(&self) -> NewPeakWallet {
        let peak = self.peak();
        NewPeakWallet {
            header_hash: peak.header_hash(),
            height: peak.height,
            weight: peak.weight,
            fork_point_with_previous_peak: 0,
        }
    }

    pub fn spent_height(&self, coin_id: &Bytes32) -> Option<u32> {
        self.removals
            .iter()
            .find(|(_, coins)| coins.iter().any(|coin| coin.name() == *coin_id))
            .map(|(height, _)| *height)
    }

    /// States of every coin matching `filter` that changed at or after `min_height`.
    pub fn coin_states(&self, min_height: u32, filter: impl Fn(&Coin) -> bool) -> Vec<CoinState> {
        let mut states = Vec::new();
        for (height, coins) in &self.additions {
            for coin in coins.iter().filter(|coin| filter(coin)) {
                let spent_height = self.spent_height(&coin.name());
                if *height >= min_height || spent_height.map(|spent| spent >= min_height).unwrap_or(false) {
                    states.push(CoinState::new(coin.clone(), Some(*height), spent_height));
                }
            }
        }
        states
    }

    pub fn additions_response(
        &self,
        height: u32,
        header_hash: Bytes32,
        puzzle_hashes: Option<Vec<Bytes32>>,
    ) -> AdditionsResponse {
        let grouped = group_by_puzzle_hash(self.additions.get(&height));
        let Some(puzzle_hashes) = puzzle_hashes else {
            return AdditionsResponse { height, header_hash, coins: grouped, proofs: None };
        };

        let set = MerkleSet::new(
            grouped.iter().flat_map(|(puzzle_hash, coins)| [*puzzle_hash, coin_list_hash(coins)]),
        );
        let mut coins = Vec::new();
        let mut proofs = Vec::new();
        for puzzle_hash in puzzle_hashes {
            let group = grouped
                .iter()
                .find(|(grouped_hash, _)| *grouped_hash == puzzle_hash)
                .map(|(_, coins)| coins.clone())
                .unwrap_or_default();
            proofs.push(AdditionProof {
                puzzle_hash,
                puzzle_hash_proof: set.membership_proof(&puzzle_hash),
                coin_list_proof: set.proof(&coin_list_hash(&group)),
            });
            coins.push((puzzle_hash, group));
        }
        AdditionsResponse { height, header_hash, coins, proofs: Some(proofs) }
    }

    pub fn removals_response(
        &self,
        height: u32,
        header_hash: Bytes32,
        coin_ids: Option<Vec<Bytes32>>,
    ) -> RemovalsResponse {
        let spent = self.removals.get(&height).cloned().unwrap_or_default();
        let Some(coin_ids) = coin_ids else {
            let coins = spent.into_iter().map(|coin| (coin.name(), Some(coin))).collect();
            return RemovalsResponse { height, header_hash, coins, proofs: None };
        };

        let set = MerkleSet::new(spent.iter().map(Coin::name));
        let mut coins = Vec::new();
        let mut proofs = Vec::new();
        for coin_id in coin_ids {
            let coin = spent.iter().find(|coin| coin.name() == coin_id).cloned();
            proofs.push((coin_id, set.membership_proof(&coin_id)));
            coins.push((coin_id, coin));
        }
        RemovalsResponse { height, header_hash, coins, proofs: Some(proofs) }
    }
}

// MOCK ORACLE
// ================================================================================================

/// Validation oracle that accepts everything unless told otherwise.
#[derive(Clone, Debug)]
pub struct MockOracle {
    required_iters: u64,
    valid_signatures: bool,
    resolve_challenges: bool,
    valid_weight_proofs: bool,
}

impl Default for MockOracle {
    fn default() -> Self {
        Self {
            required_iters: 0,
            valid_signatures: true,
            resolve_challenges: true,
            valid_weight_proofs: true,
        }
    }
}

impl MockOracle {
    pub fn with_required_iters(mut self, required_iters: u64) -> Self {
        self.required_iters = required_iters;
        self
    }

    pub fn with_invalid_signatures(mut self) -> Self {
        self.valid_signatures = false;
        self
    }

    pub fn with_unresolved_challenges(mut self) -> Self {
        self.resolve_challenges = false;
        self
    }

    pub fn with_invalid_weight_proofs(mut self) -> Self {
        self.valid_weight_proofs = false;
        self
    }
}

impl ChainValidationOracle for MockOracle {
    fn validate_weight_proof(&self, _weight_proof: &WeightProof) -> Option<u32> {
        self.valid_weight_proofs.then_some(0)
    }

    fn verify_plot_signature(
        &self,
        _public_key: &G1Element,
        _message: &Bytes32,
        _signature: &G2Element,
    ) -> bool {
        self.valid_signatures
    }

    fn block_challenge(
        &self,
        block: &HeaderBlock,
        _blocks: &HashMap<Bytes32, HeaderBlock>,
        _overflow: bool,
    ) -> Option<Bytes32> {
        self.resolve_challenges.then_some(block.reward_chain_block.proof_of_space.challenge)
    }

    fn quality_string(
        &self,
        proof: &ProofOfSpace,
        challenge: &Bytes32,
        _cc_sp_hash: &Bytes32,
    ) -> Option<Bytes32> {
        Some(sha256(&[proof.proof.as_slice(), challenge.as_ref()]))
    }

    fn required_iterations(
        &self,
        _difficulty_constant_factor: u128,
        _quality_string: &Bytes32,
        _size: u8,
        _difficulty: u64,
        _cc_sp_hash: &Bytes32,
    ) -> u64 {
        self.required_iters
    }

    fn filter_contains(&self, _filter: &[u8], _item: &Bytes32) -> bool {
        true
    }
}

// MOCK PEER
// ================================================================================================

/// Ways a [`MockPeer`] can depart from the chain it serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Misbehavior {
    /// Header requests at this height time out.
    SilentHeader(u32),
    /// Additions at this height come back with every coin left out.
    HiddenAdditions(u32),
    /// Additions requests at this height are rejected.
    RejectedAdditions(u32),
    /// Block ranges come back highest first.
    ReversedBlocks,
    /// Block ranges come back without their second block.
    GappedBlocks,
}

/// Full node connection serving a [`MockChain`]. Records every request, every message sent to
/// it, and whether it was closed.
pub struct MockPeer {
    node_id: Bytes32,
    endpoint: Endpoint,
    protocol_version: String,
    chain: MockChain,
    /// States served on puzzle hash registration in addition to those of the chain.
    extra_states: Vec<CoinState>,
    misbehavior: Vec<Misbehavior>,
    calls: Mutex<Vec<PeerRequest>>,
    sent: Mutex<Vec<OutboundMessage>>,
    closed: AtomicBool,
}

impl MockPeer {
    pub fn new(node_id: Bytes32, chain: MockChain) -> Self {
        Self {
            node_id,
            endpoint: Endpoint::localhost(),
            protocol_version: "0.0.35".to_string(),
            chain,
            extra_states: Vec::new(),
            misbehavior: Vec::new(),
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_protocol_version(mut self, version: &str) -> Self {
        self.protocol_version = version.to_string();
        self
    }

    pub fn with_extra_states(mut self, states: Vec<CoinState>) -> Self {
        self.extra_states = states;
        self
    }

    pub fn with_misbehavior(mut self, misbehavior: Misbehavior) -> Self {
        self.misbehavior.push(misbehavior);
        self
    }

    pub fn calls_to(&self, request: PeerRequest) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| **call == request).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn misbehaves(&self, misbehavior: Misbehavior) -> bool {
        self.misbehavior.contains(&misbehavior)
    }

    fn record(&self, request: PeerRequest) -> &MockChain {
        self.calls.lock().unwrap().push(request);
        &self.chain
    }

    fn block_with_hash(
        chain: &MockChain,
        request: PeerRequest,
        height: u32,
        header_hash: &Bytes32,
    ) -> Result<(), RpcError> {
        match chain.block(height) {
            Some(block) if block.header_hash() == *header_hash => Ok(()),
            _ => Err(RpcError::Rejected(request)),
        }
    }
}

#[async_trait]
impl PeerLink for MockPeer {
    fn peer_node_id(&self) -> Bytes32 {
        self.node_id
    }

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    fn protocol_version(&self) -> String {
        self.protocol_version.clone()
    }

    async fn request_block_header(&self, height: u32) -> Result<HeaderBlock, RpcError> {
        let chain = self.record(PeerRequest::BlockHeader);
        if self.misbehaves(Misbehavior::SilentHeader(height)) {
            return Err(RpcError::NoResponse(PeerRequest::BlockHeader));
        }
        chain.block(height).cloned().ok_or(RpcError::Rejected(PeerRequest::BlockHeader))
    }

    async fn request_additions(
        &self,
        height: u32,
        header_hash: Bytes32,
        puzzle_hashes: Option<Vec<Bytes32>>,
    ) -> Result<AdditionsResponse, RpcError> {
        let chain = self.record(PeerRequest::Additions);
        Self::block_with_hash(chain, PeerRequest::Additions, height, &header_hash)?;
        if self.misbehaves(Misbehavior::RejectedAdditions(height)) {
            return Err(RpcError::Rejected(PeerRequest::Additions));
        }

        let mut response = chain.additions_response(height, header_hash, puzzle_hashes);
        if self.misbehaves(Misbehavior::HiddenAdditions(height)) {
            response.coins.iter_mut().for_each(|(_, coins)| coins.clear());
        }
        Ok(response)
    }

    async fn request_removals(
        &self,
        height: u32,
        header_hash: Bytes32,
        coin_ids: Option<Vec<Bytes32>>,
    ) -> Result<RemovalsResponse, RpcError> {
        let chain = self.record(PeerRequest::Removals);
        Self::block_with_hash(chain, PeerRequest::Removals, height, &header_hash)?;
        Ok(chain.removals_response(height, header_hash, coin_ids))
    }

    async fn request_proof_of_weight(
        &self,
        height: u32,
        header_hash: Bytes32,
    ) -> Result<WeightProof, RpcError> {
        let chain = self.record(PeerRequest::ProofOfWeight);
        Self::block_with_hash(chain, PeerRequest::ProofOfWeight, height, &header_hash)?;
        Ok(chain.weight_proof.clone())
    }

    async fn request_ses_info(&self, start_height: u32, end_height: u32) -> Result<SesInfo, RpcError> {
        let chain = self.record(PeerRequest::SesInfo);
        let first = chain.weight_proof.sub_epochs.first().ok_or(RpcError::NoResponse(PeerRequest::SesInfo))?;
        let last_height = end_height.min(chain.peak().height);
        Ok(SesInfo {
            reward_chain_hash: vec![first.reward_chain_hash],
            heights: vec![(start_height..=last_height).collect()],
        })
    }

    async fn request_blocks(
        &self,
        start_height: u32,
        end_height: u32,
        _include_header_only: bool,
    ) -> Result<Vec<HeaderBlock>, RpcError> {
        let chain = self.record(PeerRequest::Blocks);
        let mut blocks: Vec<HeaderBlock> =
            (start_height..=end_height).filter_map(|height| chain.block(height).cloned()).collect();
        if self.misbehaves(Misbehavior::ReversedBlocks) {
            blocks.reverse();
        }
        if self.misbehaves(Misbehavior::GappedBlocks) && blocks.len() > 1 {
            blocks.remove(1);
        }
        Ok(blocks)
    }

    async fn request_puzzle_solution(
        &self,
        coin_id: Bytes32,
        height: u32,
    ) -> Result<PuzzleSolutionResponse, RpcError> {
        let chain = self.record(PeerRequest::PuzzleSolution);
        if chain.spent_height(&coin_id) != Some(height) {
            return Err(RpcError::Rejected(PeerRequest::PuzzleSolution));
        }
        Ok(PuzzleSolutionResponse {
            coin_name: coin_id,
            height,
            puzzle: Program(vec![0xff, 0x01]),
            solution: Program(vec![0x80]),
        })
    }

    async fn request_children(&self, coin_id: Bytes32) -> Result<Vec<CoinState>, RpcError> {
        let chain = self.record(PeerRequest::Children);
        Ok(chain.coin_states(0, |coin| coin.parent_coin_info == coin_id))
    }

    async fn register_for_ph_updates(
        &self,
        puzzle_hashes: Vec<Bytes32>,
        min_height: u32,
    ) -> Result<Vec<CoinState>, RpcError> {
        let chain = self.record(PeerRequest::PhUpdates);
        let requested: HashSet<Bytes32> = puzzle_hashes.into_iter().collect();
        let mut states = chain.coin_states(min_height, |coin| requested.contains(&coin.puzzle_hash));
        states.extend(
            self.extra_states
                .iter()
                .filter(|state| requested.contains(&state.coin.puzzle_hash))
                .cloned(),
        );
        Ok(states)
    }

    async fn register_for_coin_updates(
        &self,
        coin_ids: Vec<Bytes32>,
        min_height: u32,
    ) -> Result<Vec<CoinState>, RpcError> {
        let chain = self.record(PeerRequest::CoinUpdates);
        let requested: HashSet<Bytes32> = coin_ids.into_iter().collect();
        Ok(chain.coin_states(min_height, |coin| requested.contains(&coin.name())))
    }

    async fn send_message(&self, message: OutboundMessage) -> Result<(), RpcError> {
        self.record(PeerRequest::SendMessage);
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// MOCK CONNECTIONS
// ================================================================================================

#[derive(Default)]
pub struct MockConnections {
    peers: Mutex<Vec<Arc<dyn PeerLink>>>,
}

impl MockConnections {
    pub fn add(&self, peer: Arc<dyn PeerLink>) {
        self.peers.lock().unwrap().push(peer);
    }
}

impl FullNodeConnections for MockConnections {
    fn full_node_peers(&self) -> Vec<Arc<dyn PeerLink>> {
        self.peers.lock().unwrap().clone()
    }
}

// MOCK WALLETS
// ================================================================================================

/// A singleton-following wallet that records the spends offered to it.
pub struct MockDerivedWallet {
    wallet_id: WalletId,
    launcher_id: Option<Bytes32>,
    applied: Mutex<Vec<AdditionalCoinSpend>>,
}

impl MockDerivedWallet {
    pub fn new(wallet_id: WalletId, launcher_id: Option<Bytes32>) -> Self {
        Self { wallet_id, launcher_id, applied: Mutex::new(Vec::new()) }
    }

    pub fn applied(&self) -> Vec<AdditionalCoinSpend> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl DerivedWallet for MockDerivedWallet {
    fn wallet_id(&self) -> WalletId {
        self.wallet_id
    }

    fn wallet_type(&self) -> WalletType {
        WalletType::Pooling
    }

    async fn launcher_id(&self) -> Result<Option<Bytes32>, WalletError> {
        Ok(self.launcher_id)
    }

    async fn apply_coin_spends(&self, spends: &[AdditionalCoinSpend]) -> Result<(), WalletError> {
        self.applied.lock().unwrap().extend(spends.iter().cloned());
        Ok(())
    }
}

/// Creates pool wallets for known launchers and reports configured interesting coins.
pub struct MockWalletFactory {
    interesting: Mutex<HashMap<Bytes32, Vec<Bytes32>>>,
    launchers: Mutex<HashSet<Bytes32>>,
    next_wallet_id: AtomicU32,
    created: Mutex<Vec<Arc<MockDerivedWallet>>>,
}

impl Default for MockWalletFactory {
    fn default() -> Self {
        Self {
            interesting: Mutex::new(HashMap::new()),
            launchers: Mutex::new(HashSet::new()),
            next_wallet_id: AtomicU32::new(10),
            created: Mutex::new(Vec::new()),
        }
    }
}

impl MockWalletFactory {
    /// Makes a spend of `coin_id` point at `interesting` coins.
    pub fn set_interesting(&self, coin_id: Bytes32, interesting: Vec<Bytes32>) {
        self.interesting.lock().unwrap().insert(coin_id, interesting);
    }

    /// Makes launcher `launcher_id` create a wallet when discovered.
    pub fn accept_launcher(&self, launcher_id: Bytes32) {
        self.launchers.lock().unwrap().insert(launcher_id);
    }

    pub fn created(&self) -> Vec<Arc<MockDerivedWallet>> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletFactory for MockWalletFactory {
    async fn interesting_coin_ids(&self, spend: &CoinSpend) -> Result<Vec<Bytes32>, WalletError> {
        Ok(self.interesting.lock().unwrap().get(&spend.coin.name()).cloned().unwrap_or_default())
    }

    async fn create_from_launcher(
        &self,
        launcher_spend: &CoinSpend,
        _spends: &[AdditionalCoinSpend],
    ) -> Result<Option<Arc<dyn DerivedWallet>>, WalletError> {
        let launcher_id = launcher_spend.coin.name();
        if !self.launchers.lock().unwrap().contains(&launcher_id) {
            return Ok(None);
        }

        let wallet_id = self.next_wallet_id.fetch_add(1, Ordering::SeqCst);
        let wallet = Arc::new(MockDerivedWallet::new(wallet_id, Some(launcher_id)));
        self.created.lock().unwrap().push(wallet.clone());
        Ok(Some(wallet))
    }
}

// HELPERS
// ================================================================================================

/// Everything a sync test needs to drive a coordinator and inspect its effects.
pub struct TestContext {
    pub coordinator: Arc<SyncCoordinator>,
    pub store: Arc<InMemoryStore>,
    pub connections: Arc<MockConnections>,
    pub wallets: Arc<WalletRegistry>,
    pub factory: Arc<MockWalletFactory>,
}

/// Config for tests: untrusted peers at or above `recent_blocks` get a full sync.
pub fn test_config(recent_blocks: u32) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.constants.weight_proof_recent_blocks = recent_blocks;
    config.peer.request_timeout_ms = 5_000;
    config
}

/// Creates a store deriving puzzle hashes with [`puzzle_hash`].
pub fn create_test_store(lookahead: u32) -> InMemoryStore {
    InMemoryStore::new(puzzle_hash, lookahead)
}

pub fn create_test_coordinator(config: SyncConfig, store: InMemoryStore) -> TestContext {
    create_test_coordinator_with_oracle(config, store, MockOracle::default())
}

pub fn create_test_coordinator_with_oracle(
    config: SyncConfig,
    store: InMemoryStore,
    oracle: MockOracle,
) -> TestContext {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store = Arc::new(store);
    let connections = Arc::new(MockConnections::default());
    let factory = Arc::new(MockWalletFactory::default());
    let wallets = Arc::new(WalletRegistry::new(factory.clone()));
    let coordinator = Arc::new(SyncCoordinator::new(
        config,
        store.clone(),
        Arc::new(oracle),
        connections.clone(),
        wallets.clone(),
    ));

    TestContext { coordinator, store, connections, wallets, factory }
}
