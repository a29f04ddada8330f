use std::collections::{HashMap, HashSet};

use crate::{
    objects::{Bytes32, HeaderBlock},
    rpc::domain::SesInfo,
};

// REQUEST CACHE
// ================================================================================================

/// Peer responses memoized for the duration of one sync call.
///
/// A cache is created at the top of a sync entry point and handed down by `&mut`. It is never
/// shared between calls, so responses from one peer are not reused to validate another.
#[derive(Debug, Default)]
pub struct RequestCache {
    blocks: HashMap<u32, HeaderBlock>,
    ses_info: HashMap<Bytes32, SesInfo>,
    block_ranges: HashMap<Bytes32, Vec<HeaderBlock>>,
    validated: HashSet<Bytes32>,
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, height: u32) -> Option<&HeaderBlock> {
        self.blocks.get(&height)
    }

    pub fn add_block(&mut self, block: HeaderBlock) {
        self.blocks.insert(block.height, block);
    }

    pub fn ses_info(&self, request_hash: &Bytes32) -> Option<&SesInfo> {
        self.ses_info.get(request_hash)
    }

    pub fn add_ses_info(&mut self, request_hash: Bytes32, info: SesInfo) {
        self.ses_info.insert(request_hash, info);
    }

    pub fn block_range(&self, request_hash: &Bytes32) -> Option<&Vec<HeaderBlock>> {
        self.block_ranges.get(request_hash)
    }

    pub fn add_block_range(&mut self, request_hash: Bytes32, blocks: Vec<HeaderBlock>) {
        self.block_ranges.insert(request_hash, blocks);
    }

    /// Returns true if the coin state with this hash already passed validation in this call.
    pub fn is_validated(&self, state_hash: &Bytes32) -> bool {
        self.validated.contains(state_hash)
    }

    pub fn mark_validated(&mut self, state_hash: Bytes32) {
        self.validated.insert(state_hash);
    }
}
