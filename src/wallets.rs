//! Wallet-type plugins.
//!
//! The sync core does not know how any particular coin type works. Wallet kinds are a closed set
//! ([`WalletType`]) and each live wallet is a [`DerivedWallet`] trait object held by the
//! [`WalletRegistry`]. New derived wallets are created through a [`WalletFactory`] when a sync
//! discovers a singleton launcher nobody tracks yet.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::objects::{AdditionalCoinSpend, Bytes32, CoinSpend};

pub type WalletId = u32;

// WALLET TYPE
// ================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WalletType {
    Standard,
    RateLimited,
    AtomicSwap,
    AuthorizedPayee,
    MultiSig,
    Custody,
    ColouredCoin,
    RecoverableWallet,
    DistributedId,
    Pooling,
}

impl WalletType {
    /// Whether coins of this wallet type need every removal of a block to be fetched, instead of
    /// only the removals hinted by the block filter.
    pub fn requires_full_removals(&self) -> bool {
        matches!(self, WalletType::ColouredCoin | WalletType::DistributedId)
    }

    /// Whether wallets of this type follow singleton state transitions.
    pub fn tracks_singletons(&self) -> bool {
        matches!(self, WalletType::Pooling)
    }
}

// WALLET ERROR
// ================================================================================================

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet {0} rejected coin spends: {1}")]
    ApplyFailed(WalletId, String),
    #[error("could not derive interested coins from spend of {0}: {1}")]
    DerivationFailed(Bytes32, String),
    #[error("could not create wallet from launcher {0}: {1}")]
    CreationFailed(Bytes32, String),
}

// PLUGIN TRAITS
// ================================================================================================

/// A live wallet instance whose state depends on coin spends found during sync.
#[async_trait]
pub trait DerivedWallet: Send + Sync {
    fn wallet_id(&self) -> WalletId;

    fn wallet_type(&self) -> WalletType;

    /// The singleton launcher this wallet follows, if it follows one.
    async fn launcher_id(&self) -> Result<Option<Bytes32>, WalletError>;

    /// Offers the additional coin spends collected by a sync. Implementations ignore spends that
    /// do not concern them and must tolerate seeing the same spend twice.
    async fn apply_coin_spends(&self, spends: &[AdditionalCoinSpend]) -> Result<(), WalletError>;
}

/// Creates derived wallets and interprets coin spends on behalf of the wallet plugins.
#[async_trait]
pub trait WalletFactory: Send + Sync {
    /// Returns the ids of coins that become relevant because of `spend`.
    async fn interesting_coin_ids(&self, spend: &CoinSpend) -> Result<Vec<Bytes32>, WalletError>;

    /// Creates a wallet for the singleton launched by `launcher_spend`, or returns `None` if the
    /// launcher is not one of ours.
    async fn create_from_launcher(
        &self,
        launcher_spend: &CoinSpend,
        spends: &[AdditionalCoinSpend],
    ) -> Result<Option<Arc<dyn DerivedWallet>>, WalletError>;
}

// WALLET REGISTRY
// ================================================================================================

/// The wallet instances known to one sync coordinator.
pub struct WalletRegistry {
    wallets: RwLock<BTreeMap<WalletId, Arc<dyn DerivedWallet>>>,
    factory: Arc<dyn WalletFactory>,
}

impl WalletRegistry {
    pub fn new(factory: Arc<dyn WalletFactory>) -> Self {
        Self { wallets: RwLock::new(BTreeMap::new()), factory }
    }

    pub fn factory(&self) -> &Arc<dyn WalletFactory> {
        &self.factory
    }

    pub async fn register(&self, wallet: Arc<dyn DerivedWallet>) {
        self.wallets.write().await.insert(wallet.wallet_id(), wallet);
    }

    pub async fn wallet_ids(&self) -> Vec<WalletId> {
        self.wallets.read().await.keys().copied().collect()
    }

    /// Snapshot of the wallets that follow singletons.
    pub async fn singleton_wallets(&self) -> Vec<Arc<dyn DerivedWallet>> {
        self.wallets
            .read()
            .await
            .values()
            .filter(|wallet| wallet.wallet_type().tracks_singletons())
            .cloned()
            .collect()
    }

    /// Returns true if some singleton wallet already follows `launcher_id`.
    pub async fn tracks_launcher(&self, launcher_id: &Bytes32) -> Result<bool, WalletError> {
        for wallet in self.singleton_wallets().await {
            if wallet.launcher_id().await?.as_ref() == Some(launcher_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
