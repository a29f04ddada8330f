use core::time::Duration;
use std::{collections::BTreeSet, path::Path};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map},
    Figment, Metadata, Profile, Provider,
};
use serde::{Deserialize, Serialize};

use crate::{consensus::ConsensusConstants, objects::Bytes32, rpc::Endpoint};

/// Prefix of the environment variables that override file settings.
const ENV_PREFIX: &str = "WALLET_SYNC_";

// SYNC CONFIG
// ================================================================================================

/// Configuration options of the wallet sync core.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SyncConfig {
    /// Hex node ids of peers whose coin states are applied without proofs.
    #[serde(default)]
    pub trusted_peers: BTreeSet<String>,
    /// Full node the wallet should stay connected to, if pinned.
    #[serde(default)]
    pub full_node_peer: Option<Endpoint>,
    /// Describes settings related to peer requests.
    #[serde(default)]
    pub peer: PeerConfig,
    /// Consensus parameters of the network.
    #[serde(default)]
    pub constants: ConsensusConstants,
}

impl SyncConfig {
    /// Loads the configuration from defaults, the TOML file at `path` and `WALLET_SYNC_`
    /// environment variables, in increasing priority.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::from(SyncConfig::default())
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Returns true if `node_id` is on the trusted peer list.
    pub fn is_trusted(&self, node_id: &Bytes32) -> bool {
        let hex = node_id.to_hex();
        self.trusted_peers
            .iter()
            .any(|trusted| trusted.trim_start_matches("0x").eq_ignore_ascii_case(&hex))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            trusted_peers: BTreeSet::new(),
            full_node_peer: None,
            peer: PeerConfig::default(),
            constants: ConsensusConstants::default(),
        }
    }
}

// Make `SyncConfig` a provider itself for composability.
impl Provider for SyncConfig {
    fn metadata(&self) -> Metadata {
        Metadata::named("Wallet Sync Config")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(SyncConfig::default()).data()
    }

    fn profile(&self) -> Option<Profile> {
        None
    }
}

// PEER CONFIG
// ================================================================================================

/// Settings for requests to full node peers.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PeerConfig {
    /// Timeout for ordinary peer requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Timeout for weight proof requests, which take long to build and transfer.
    #[serde(default = "default_weight_proof_timeout")]
    pub weight_proof_timeout_secs: u64,
    /// Trusted resync starts this many blocks below the synced height.
    #[serde(default = "default_trusted_lookback")]
    pub trusted_sync_lookback: u32,
    /// Peers whose latest transaction block is older than this are considered unsynced.
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,
    /// Oldest wallet protocol version a peer may speak.
    #[serde(default = "default_min_protocol_version")]
    pub min_protocol_version: String,
    /// Delay between full node connectivity checks.
    #[serde(default = "default_connect_interval")]
    pub peer_connect_interval_secs: u64,
    /// Number of full node connectivity checks before giving up.
    #[serde(default = "default_full_node_check_attempts")]
    pub full_node_check_attempts: u32,
}

const fn default_request_timeout() -> u64 {
    30_000
}

const fn default_weight_proof_timeout() -> u64 {
    360
}

const fn default_trusted_lookback() -> u32 {
    1000
}

const fn default_staleness_threshold() -> u64 {
    600
}

fn default_min_protocol_version() -> String {
    "0.0.33".to_string()
}

const fn default_connect_interval() -> u64 {
    30
}

const fn default_full_node_check_attempts() -> u32 {
    5
}

impl PeerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn weight_proof_timeout(&self) -> Duration {
        Duration::from_secs(self.weight_proof_timeout_secs)
    }

    pub fn peer_connect_interval(&self) -> Duration {
        Duration::from_secs(self.peer_connect_interval_secs)
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            weight_proof_timeout_secs: default_weight_proof_timeout(),
            trusted_sync_lookback: default_trusted_lookback(),
            staleness_threshold_secs: default_staleness_threshold(),
            min_protocol_version: default_min_protocol_version(),
            peer_connect_interval_secs: default_connect_interval(),
            full_node_check_attempts: default_full_node_check_attempts(),
        }
    }
}

// PROTOCOL VERSION
// ================================================================================================

/// Compares dotted version strings numerically. Missing or non-numeric parts count as zero.
pub(crate) fn version_at_least(version: &str, minimum: &str) -> bool {
    let parse = |value: &str| -> Vec<u64> {
        value.split('.').map(|part| part.trim().parse::<u64>().unwrap_or(0)).collect()
    };
    let (version, minimum) = (parse(version), parse(minimum));
    let len = version.len().max(minimum.len());
    let pad = |mut parts: Vec<u64>| {
        parts.resize(len, 0);
        parts
    };
    pad(version) >= pad(minimum)
}
