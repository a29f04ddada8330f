use std::collections::HashMap;

use tracing::{debug, info};

use super::{RequestCache, SyncCoordinator, SyncSummary};
use crate::{
    consensus::SpanValidator,
    errors::SyncError,
    objects::{Bytes32, CoinRecord, CoinState, HeaderBlock, WeightProof},
    rpc::{
        domain::{RequestBlocks, RequestSesInfo, SesInfo},
        with_timeout, PeerLink, PeerRequest, RpcError,
    },
};

/// Sub-epoch summaries are requested for this many heights above the block being validated.
const SES_LOOKAHEAD: u32 = 32;

/// A re-derived span covers at least this many blocks.
const MIN_SPAN_BLOCKS: u32 = 50;

/// A re-derived span covers at most this many heights above the block being validated.
const MAX_SPAN_BLOCKS: u32 = 96;

/// Block ranges are requested in chunks of this many heights.
const BLOCK_CHUNK_SIZE: u32 = 32;

impl SyncCoordinator {
    // UNTRUSTED SYNC
    // --------------------------------------------------------------------------------------------

    /// Replays an untrusted peer's coin states from genesis. Every state is proven against the
    /// peer's blocks and `weight_proof` before any of them is applied.
    pub(crate) async fn untrusted_sync_to_peer(
        &self,
        peer: &dyn PeerLink,
        weight_proof: &WeightProof,
    ) -> Result<SyncSummary, SyncError> {
        let started = std::time::Instant::now();
        let mut cache = RequestCache::new();
        let mut summary =
            SyncSummary::new_empty(weight_proof.peak().map(|peak| peak.height).unwrap_or(0));

        let puzzle_hashes: Vec<Bytes32> =
            self.store.get_all_puzzle_hashes().await?.into_iter().collect();
        let states = self.register_puzzle_hashes(peer, puzzle_hashes, 0).await?;
        self.validate_received_states(&states, peer, weight_proof, &mut cache).await?;
        summary.combine_with(&self.handle_coin_state_change(&states, peer).await?);

        let mut coin_ids: Vec<Bytes32> =
            self.store.get_coins_to_check(0).await?.iter().map(CoinRecord::name).collect();
        coin_ids.extend(self.store.get_trade_coins_of_interest().await?);
        let states = self.register_coin_ids(peer, coin_ids, 0).await?;
        self.validate_received_states(&states, peer, weight_proof, &mut cache).await?;
        summary.combine_with(&self.handle_coin_state_change(&states, peer).await?);

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            coins_added = summary.coins_added,
            coins_removed = summary.coins_removed,
            "untrusted sync finished"
        );
        self.emit_wallet_changes(&summary).await;
        Ok(summary)
    }

    // COIN STATE VALIDATION
    // --------------------------------------------------------------------------------------------

    /// Proves every state in `states` against the peer's blocks.
    ///
    /// A state is skipped when it was validated earlier in the same call or when the local record
    /// already agrees with it; skipped states cost no peer requests. Otherwise the coin must be in
    /// the additions of the block at its creation height and, if spent, in the removals of the
    /// block at its spend height, and both blocks must be covered by `weight_proof`.
    pub async fn validate_received_states(
        &self,
        states: &[CoinState],
        peer: &dyn PeerLink,
        weight_proof: &WeightProof,
        cache: &mut RequestCache,
    ) -> Result<(), SyncError> {
        let total = states.len();
        for (index, state) in states.iter().enumerate() {
            debug!("validating coin state {} of {total}", index + 1);
            let state_hash = state.state_hash();
            if cache.is_validated(&state_hash) {
                continue;
            }

            let coin_id = state.coin.name();
            let local = self.store.get_coin_record(&coin_id).await?;
            if local.map(|record| record.matches_state(state)).unwrap_or(false) {
                continue;
            }

            self.validate_coin_state(state, peer, weight_proof, cache).await?;
            cache.mark_validated(state_hash);
        }
        Ok(())
    }

    async fn validate_coin_state(
        &self,
        state: &CoinState,
        peer: &dyn PeerLink,
        weight_proof: &WeightProof,
        cache: &mut RequestCache,
    ) -> Result<(), SyncError> {
        let coin_id = state.coin.name();
        let created_height = match (state.created_height, state.spent_height) {
            (Some(created_height), _) => created_height,
            (None, Some(_)) => return Err(SyncError::SpentBeforeCreated(coin_id)),
            // the peer reports the coin does not exist, there is nothing to prove
            (None, None) => return Ok(()),
        };

        let block = self.fetch_state_block(peer, created_height, cache).await?;
        let additions_root = block
            .foliage_transaction_block
            .as_ref()
            .map(|transaction_block| transaction_block.additions_root)
            .ok_or(SyncError::InclusionProofFailed { item: coin_id, height: created_height })?;
        let puzzle_hashes = [state.coin.puzzle_hash];
        let additions = self.request_additions(peer, &block, Some(puzzle_hashes.to_vec())).await?;
        if !additions.verify(&additions_root, Some(&puzzle_hashes))
            || !additions.all_coins().any(|coin| *coin == state.coin)
        {
            return Err(SyncError::InclusionProofFailed { item: coin_id, height: created_height });
        }
        self.validate_state(weight_proof, &block, peer, cache).await?;

        let Some(spent_height) = state.spent_height else {
            return Ok(());
        };
        let block = self.fetch_state_block(peer, spent_height, cache).await?;
        let removals_root = block
            .foliage_transaction_block
            .as_ref()
            .map(|transaction_block| transaction_block.removals_root)
            .ok_or(SyncError::InclusionProofFailed { item: coin_id, height: spent_height })?;
        let coin_ids = [coin_id];
        let removals = self.request_removals(peer, &block, Some(coin_ids.to_vec())).await?;
        if !removals.verify(&removals_root, Some(&coin_ids))
            || !removals.removed_coins().any(|coin| coin.name() == coin_id)
        {
            return Err(SyncError::InclusionProofFailed { item: coin_id, height: spent_height });
        }
        self.validate_state(weight_proof, &block, peer, cache).await
    }

    /// Returns the block at `height`, from the cache when an earlier state already needed it.
    async fn fetch_state_block(
        &self,
        peer: &dyn PeerLink,
        height: u32,
        cache: &mut RequestCache,
    ) -> Result<HeaderBlock, SyncError> {
        if let Some(block) = cache.block(height) {
            return Ok(block.clone());
        }

        let mut blocks = self.request_blocks(peer, height, height).await?;
        let block = match blocks.pop() {
            Some(block) if blocks.is_empty() && block.height == height => block,
            _ => {
                return Err(RpcError::unexpected(
                    PeerRequest::Blocks,
                    format!("expected exactly block {height}"),
                )
                .into())
            },
        };
        cache.add_block(block.clone());
        Ok(block)
    }

    /// Checks that `block` belongs to the chain `weight_proof` describes.
    ///
    /// Blocks inside the proof's recent window must match it exactly. Older blocks are checked by
    /// validating a span of at least 50 blocks around them at the difficulty of their sub-epoch.
    async fn validate_state(
        &self,
        weight_proof: &WeightProof,
        block: &HeaderBlock,
        peer: &dyn PeerLink,
        cache: &mut RequestCache,
    ) -> Result<(), SyncError> {
        let recent_start = weight_proof.recent_start_height().ok_or(SyncError::MissingWeightProof)?;
        let span_error = |start_height: u32, end_height: u32| SyncError::SpanValidationFailed {
            start_height,
            end_height,
        };

        if block.height >= recent_start {
            return match weight_proof.recent_block_at(block.height) {
                Some(known) if known.header_hash() == block.header_hash() => Ok(()),
                _ => Err(span_error(block.height, block.height)),
            };
        }

        let ses_info = self.fetch_ses_info(peer, block.height, cache).await?;
        let (Some(ses_hash), Some(last_height)) = (
            ses_info.reward_chain_hash.first().copied(),
            ses_info.heights.first().and_then(|heights| heights.last()).copied(),
        ) else {
            return Err(RpcError::unexpected(PeerRequest::SesInfo, "no sub-epoch summaries").into());
        };

        let mut start = block.height;
        let mut end = last_height.max(block.height);
        let covered = end - start;
        if covered < MIN_SPAN_BLOCKS {
            start = start.saturating_sub(MIN_SPAN_BLOCKS - covered);
        } else if covered > MAX_SPAN_BLOCKS {
            end = start + MAX_SPAN_BLOCKS;
        }

        let blocks = self.fetch_span(peer, start, end, cache).await?;
        let lookup: HashMap<Bytes32, HeaderBlock> =
            blocks.iter().map(|block| (block.header_hash(), block.clone())).collect();

        let Some((difficulty, sub_slot_iters)) = self.sub_epoch_parameters(weight_proof, &ses_hash)
        else {
            debug!(%ses_hash, "sub-epoch summary is not part of the weight proof");
            return Err(span_error(start, end));
        };

        if SpanValidator::new(self.constants(), self.oracle.as_ref()).validate(
            &blocks,
            difficulty,
            sub_slot_iters,
            &lookup,
        ) {
            Ok(())
        } else {
            Err(span_error(start, end))
        }
    }

    /// Difficulty and sub-slot iterations in effect once the sub-epoch with reward chain hash
    /// `ses_hash` starts, or `None` if the weight proof does not contain it.
    fn sub_epoch_parameters(&self, weight_proof: &WeightProof, ses_hash: &Bytes32) -> Option<(u64, u64)> {
        let mut difficulty = self.constants().difficulty_starting;
        let mut sub_slot_iters = self.constants().sub_slot_iters_starting;
        for sub_epoch in &weight_proof.sub_epochs {
            if let Some(new_difficulty) = sub_epoch.new_difficulty {
                difficulty = new_difficulty;
            }
            if let Some(new_iters) = sub_epoch.new_sub_slot_iters {
                sub_slot_iters = new_iters;
            }
            if sub_epoch.reward_chain_hash == *ses_hash {
                return Some((difficulty, sub_slot_iters));
            }
        }
        None
    }

    async fn fetch_ses_info(
        &self,
        peer: &dyn PeerLink,
        height: u32,
        cache: &mut RequestCache,
    ) -> Result<SesInfo, SyncError> {
        let request =
            RequestSesInfo { start_height: height, end_height: height.saturating_add(SES_LOOKAHEAD) };
        let request_hash = request.request_hash();
        if let Some(info) = cache.ses_info(&request_hash) {
            return Ok(info.clone());
        }

        let info = with_timeout(
            PeerRequest::SesInfo,
            self.request_timeout(),
            peer.request_ses_info(request.start_height, request.end_height),
        )
        .await?;
        cache.add_ses_info(request_hash, info.clone());
        Ok(info)
    }

    /// Fetches the blocks in `[start, end]` in chunks, reusing chunks fetched earlier in the call.
    async fn fetch_span(
        &self,
        peer: &dyn PeerLink,
        start: u32,
        end: u32,
        cache: &mut RequestCache,
    ) -> Result<Vec<HeaderBlock>, SyncError> {
        let mut blocks = Vec::new();
        let mut chunk_start = start;
        while chunk_start <= end {
            let chunk_end = chunk_start.saturating_add(BLOCK_CHUNK_SIZE - 1).min(end);
            let request = RequestBlocks {
                start_height: chunk_start,
                end_height: chunk_end,
                include_header_only: true,
            };
            let request_hash = request.request_hash();

            let chunk = match cache.block_range(&request_hash) {
                Some(chunk) => chunk.clone(),
                None => {
                    let chunk = self.request_blocks(peer, chunk_start, chunk_end).await?;
                    cache.add_block_range(request_hash, chunk.clone());
                    chunk
                },
            };
            debug!(start = chunk_start, end = chunk_end, "fetched blocks");
            blocks.extend(chunk);

            if chunk_end == u32::MAX {
                break;
            }
            chunk_start = chunk_end + 1;
        }
        Ok(blocks)
    }

    /// Requests the blocks in `[start, end]` and checks they come back as an ascending, linked
    /// run covering exactly that range.
    async fn request_blocks(
        &self,
        peer: &dyn PeerLink,
        start: u32,
        end: u32,
    ) -> Result<Vec<HeaderBlock>, SyncError> {
        let blocks = with_timeout(
            PeerRequest::Blocks,
            self.request_timeout(),
            peer.request_blocks(start, end, true),
        )
        .await?;

        let expected_len = (end - start) as usize + 1;
        let ordered = blocks.len() == expected_len
            && blocks.first().map(|block| block.height == start).unwrap_or(false)
            && blocks.windows(2).all(|pair| {
                pair[1].height == pair[0].height + 1 && pair[1].prev_header_hash == pair[0].header_hash()
            });
        if !ordered {
            return Err(RpcError::unexpected(
                PeerRequest::Blocks,
                format!("blocks {start} to {end} are not an ascending contiguous run"),
            )
            .into());
        }
        Ok(blocks)
    }
}
