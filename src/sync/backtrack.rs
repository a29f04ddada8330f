use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::{PeakOutcome, SyncCoordinator};
use crate::{
    consensus::SpanValidator,
    errors::SyncError,
    objects::{Bytes32, HeaderBlock, HeaderBlockRecord},
    rpc::PeerLink,
};

impl SyncCoordinator {
    // BACKTRACK SYNC
    // --------------------------------------------------------------------------------------------

    /// Connects the peer's chain ending at `peak` to the local chain.
    ///
    /// Headers are fetched backwards until one whose parent is known locally. The walked span is
    /// validated and the additions and removals of each of its transaction blocks are fetched and
    /// proven. Only then is the local chain rolled back to the fork height and extended with the
    /// walked blocks. A span that fails validation closes the connection.
    pub(crate) async fn backtrack(
        &self,
        peak: HeaderBlock,
        peer: &dyn PeerLink,
    ) -> Result<PeakOutcome, SyncError> {
        let (blocks, fork_height) = self.walk_to_fork(peak, peer).await?;
        // counts the announced peak, which the caller fetched before walking
        let headers_fetched = blocks.len();
        info!(fork_height, headers_fetched, "backtracking to fork point");

        let (difficulty, sub_slot_iters) = self.span_parameters(&blocks).await?;
        let mut lookup: HashMap<Bytes32, HeaderBlock> = self
            .store
            .get_recent_blocks()
            .await?
            .into_iter()
            .map(|block| (block.header_hash(), block))
            .collect();
        lookup.extend(blocks.iter().map(|block| (block.header_hash(), block.clone())));

        let validator = SpanValidator::new(self.constants(), self.oracle.as_ref());
        if !validator.validate(&blocks, difficulty, sub_slot_iters, &lookup) {
            let (start_height, end_height) = span_bounds(&blocks);
            warn!(start_height, end_height, peer = %peer.peer_node_id(), "peer sent an invalid span");
            peer.close().await;
            return Err(SyncError::SpanValidationFailed { start_height, end_height });
        }

        let records = self.complete_blocks(&blocks, peer).await?;

        self.store.rollback_to_height(fork_height).await?;
        for record in &records {
            for coin in record.additions() {
                if let Some(derivation) = self.store.get_derivation_record(&coin.puzzle_hash).await? {
                    self.store.coin_added(coin.clone(), record.height(), &derivation).await?;
                }
            }
            for coin in record.removals() {
                let coin_id = coin.name();
                if self.store.get_coin_record(&coin_id).await?.is_some() {
                    self.store.set_coin_spent(&coin_id, record.height()).await?;
                }
            }
        }
        self.store.add_header_block_records(records).await?;

        let new_peak = blocks.last().cloned();
        self.store.add_recent_blocks(blocks).await?;
        if let Some(new_peak) = new_peak {
            self.store.set_peak(new_peak).await?;
        }

        let puzzle_hashes = self.store.create_more_puzzle_hashes().await?;
        if !puzzle_hashes.is_empty() {
            debug!(count = puzzle_hashes.len(), "derived new puzzle hashes");
            self.new_puzzle_hashes_created(puzzle_hashes).await?;
        }

        Ok(PeakOutcome::Backtracked { fork_height, headers_fetched })
    }

    /// Fetches headers below `peak` until the parent of the oldest one is known locally. Returns
    /// the walked blocks oldest first, including `peak`, and the fork height.
    ///
    /// The walk never goes below [`Self::backtrack_floor`]; a fork deeper than that fails with
    /// [`SyncError::SpanValidationFailed`] and closes the connection.
    async fn walk_to_fork(
        &self,
        peak: HeaderBlock,
        peer: &dyn PeerLink,
    ) -> Result<(Vec<HeaderBlock>, u32), SyncError> {
        let peak_height = peak.height;
        let floor = self.backtrack_floor(peak_height).await?;
        let mut fork_height = 0;
        if self.store.contains_block(&peak.prev_header_hash).await? {
            fork_height = peak.height.saturating_sub(1);
        }

        let mut blocks = vec![peak];
        loop {
            let Some(top) = blocks.last() else {
                break;
            };
            if top.height == 0 || self.store.contains_block(&top.prev_header_hash).await? {
                break;
            }
            if top.height <= floor {
                warn!(
                    floor,
                    peak_height,
                    peer = %peer.peer_node_id(),
                    "fork is deeper than backtracking reaches"
                );
                peer.close().await;
                let start_height = top.height;
                return Err(SyncError::SpanValidationFailed { start_height, end_height: peak_height });
            }

            let parent = self.request_header(peer, top.height - 1).await?;
            if parent.header_hash() != top.prev_header_hash {
                warn!(height = parent.height, "peer served a header off its own chain");
                peer.close().await;
                let (start_height, end_height) = (parent.height, top.height);
                return Err(SyncError::SpanValidationFailed { start_height, end_height });
            }
            fork_height = parent.height.saturating_sub(1);
            blocks.push(parent);
        }

        blocks.reverse();
        Ok((blocks, fork_height))
    }

    /// Lowest height a backtrack from `peak_height` may fetch: one weight proof window below the
    /// peak, and never below the recent window of the stored weight proof.
    async fn backtrack_floor(&self, peak_height: u32) -> Result<u32, SyncError> {
        let window_floor = peak_height.saturating_sub(self.constants().weight_proof_recent_blocks);
        let proof_floor = self
            .store
            .get_weight_proof()
            .await?
            .and_then(|weight_proof| weight_proof.recent_start_height())
            .unwrap_or(0);
        Ok(window_floor.max(proof_floor))
    }

    /// Picks the difficulty and sub-slot iterations to validate `blocks` with.
    ///
    /// The most recent sub-epoch boundary in the local chain wins. Without one, the stored weight
    /// proof's latest values apply when the span starts past its recent window. Otherwise the
    /// genesis values apply.
    async fn span_parameters(&self, blocks: &[HeaderBlock]) -> Result<(u64, u64), SyncError> {
        let mut difficulty = self.constants().difficulty_starting;
        let mut sub_slot_iters = self.constants().sub_slot_iters_starting;

        let Some(local_peak) = self.store.get_peak().await? else {
            return Ok((difficulty, sub_slot_iters));
        };

        let mut current = Some(local_peak);
        while let Some(block) = current {
            let boundary = block
                .finished_sub_slots
                .iter()
                .find(|sub_slot| sub_slot.subepoch_summary_hash.is_some());
            if let Some(sub_slot) = boundary {
                debug!(height = block.height, "anchoring span at sub-epoch boundary");
                return Ok((
                    sub_slot.new_difficulty.unwrap_or(difficulty),
                    sub_slot.new_sub_slot_iters.unwrap_or(sub_slot_iters),
                ));
            }
            current = self.store.get_block(&block.prev_header_hash).await?;
        }

        if let Some(weight_proof) = self.store.get_weight_proof().await? {
            let span_start = blocks.first().map(|block| block.height).unwrap_or(0);
            let recent_start = weight_proof.recent_start_height().unwrap_or(u32::MAX);
            if span_start > recent_start {
                let (latest_difficulty, latest_iters) = weight_proof.latest_difficulty_and_iters();
                difficulty = latest_difficulty.unwrap_or(difficulty);
                sub_slot_iters = latest_iters.unwrap_or(sub_slot_iters);
            }
        }
        Ok((difficulty, sub_slot_iters))
    }

    /// Fetches and proves the additions and removals of every transaction block in `blocks`.
    async fn complete_blocks(
        &self,
        blocks: &[HeaderBlock],
        peer: &dyn PeerLink,
    ) -> Result<Vec<HeaderBlockRecord>, SyncError> {
        let mut records = Vec::new();
        for block in blocks.iter().filter(|block| block.is_transaction_block()) {
            let (puzzle_hashes, coin_ids) = self.filter_hints(block).await?;
            let additions = self.get_additions(peer, block, Some(puzzle_hashes)).await?;
            let removals = self.get_removals(peer, block, &additions, coin_ids).await?;
            records.push(HeaderBlockRecord::new(block.clone(), additions, removals));
        }
        Ok(records)
    }
}

fn span_bounds(blocks: &[HeaderBlock]) -> (u32, u32) {
    let start = blocks.first().map(|block| block.height).unwrap_or(0);
    let end = blocks.last().map(|block| block.height).unwrap_or(start);
    (start, end)
}
