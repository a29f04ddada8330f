use serde::{Deserialize, Serialize};

use super::{Bytes32, CoinSpend, G1Element, G2Element};
use crate::wallets::{WalletId, WalletType};

// SPEND BUNDLE
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendBundle {
    pub coin_spends: Vec<CoinSpend>,
    pub aggregated_signature: G2Element,
}

// TRANSACTION RECORD
// ================================================================================================

/// Result reported by a full node after it received a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MempoolInclusionStatus {
    Success,
    Pending,
    Failed,
}

/// An outgoing transaction queued by the wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub name: Bytes32,
    pub wallet_id: WalletId,
    pub confirmed: bool,
    pub spend_bundle: Option<SpendBundle>,
    /// `(peer node id, status, error)` for every peer the bundle was sent to.
    pub sent_to: Vec<(Bytes32, MempoolInclusionStatus, Option<String>)>,
}

impl TransactionRecord {
    /// Returns true if `peer` already accepted this transaction into its mempool.
    pub fn accepted_by(&self, peer: &Bytes32) -> bool {
        self.sent_to
            .iter()
            .any(|(node_id, status, _)| node_id == peer && *status == MempoolInclusionStatus::Success)
    }
}

// WALLET ACTION
// ================================================================================================

/// A protocol request a wallet plugin asked to be sent to full nodes. `data` is a JSON document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAction {
    pub id: u32,
    pub name: String,
    pub wallet_id: WalletId,
    pub wallet_type: WalletType,
    pub data: String,
    pub done: bool,
}

// DERIVATION RECORD
// ================================================================================================

/// A puzzle hash derived by the wallet, tagged with the wallet that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationRecord {
    pub index: u32,
    pub puzzle_hash: Bytes32,
    pub pubkey: G1Element,
    pub wallet_type: WalletType,
    pub wallet_id: WalletId,
}

// ADDITIONAL COIN SPEND
// ================================================================================================

/// A coin spend discovered while following singleton launchers and interested coins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalCoinSpend {
    pub coin_spend: CoinSpend,
    pub height: u32,
}
