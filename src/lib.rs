//! Peer synchronization and state validation core of a light wallet.
//!
//! The [`SyncCoordinator`] reacts to peak announcements from full nodes and keeps the wallet's
//! [`StateStore`](store::StateStore) consistent with the chain. Coin states from trusted peers are
//! applied as received; coin states from any other peer are proven against block commitments and
//! a verified weight proof before they touch the store.

pub mod config;
pub mod consensus;
pub mod objects;
pub mod rpc;
pub mod store;
pub mod sync;
pub mod wallets;

#[cfg(test)]
pub mod mock;


mod errors;

// RE-EXPORTS
// ================================================================================================

pub use config::{PeerConfig, SyncConfig};
pub use errors::SyncError;
pub use sync::{PeakOutcome, RejectReason, StateChange, SyncCoordinator, SyncSummary};
