use std::{path::PathBuf, time::Duration};

use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Default value for `claim_confirmations` in [`PeginConfig`].
const DEFAULT_CLAIM_CONFIRMATIONS: u32 = 102;

/// Default value for `poll_interval_secs` in [`PeginConfig`].
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default value for `lease_ttl_secs` in [`PeginConfig`].
const DEFAULT_LEASE_TTL_SECS: u64 = 10;

/// Default value for `state_file` in [`PeginConfig`].
const DEFAULT_STATE_FILE: &str = "pegin-state.json";

/// Default value for `label` in [`PeginConfig`].
const DEFAULT_LABEL: &str = "Liquid Peg-in";

/// Default request timeout for the node backends, in seconds.
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// `claimpegin` validates the proof against the main chain and can take minutes.
const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LndConfig {
    /// REST endpoint, e.g. `https://localhost:8080`.
    pub rest_url: String,

    /// Path to the admin macaroon.
    pub macaroon_path: PathBuf,

    /// PEM certificate of the node. LND uses self-signed certificates by default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cert_path: Option<PathBuf>,

    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementsConfig {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,

    /// Wallet to route calls to, appended to the url as `/wallet/<name>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,

    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout for `claimpegin` only.
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoindConfig {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,

    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeginConfig {
    /// Main chain network the wallet operates on.
    pub network: Network,

    /// Depth after which the peg-in is claimed on the side chain.
    #[serde(default = "default_claim_confirmations")]
    pub claim_confirmations: u32,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Lease expiration for outputs reserved by a sweep.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Where the pending peg-in is persisted.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Wallet label attached to published peg-in transactions.
    #[serde(default = "default_label")]
    pub label: String,
}

impl PeginConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Service label to append to the service name (e.g., "mainnet", "regtest").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_label: Option<String>,

    /// Directory path for file-based logging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Prefix for log file names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file_prefix: Option<String>,

    /// Use JSON format for logs instead of compact format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_format: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub lnd: LndConfig,
    pub elements: ElementsConfig,
    pub bitcoind: BitcoindConfig,
    pub pegin: PeginConfig,

    /// Logging configuration (optional section in TOML).
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_claim_confirmations() -> u32 {
    DEFAULT_CLAIM_CONFIRMATIONS
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_lease_ttl_secs() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}

fn default_state_file() -> PathBuf {
    DEFAULT_STATE_FILE.into()
}

fn default_label() -> String {
    DEFAULT_LABEL.to_owned()
}

fn default_rpc_timeout_secs() -> u64 {
    DEFAULT_RPC_TIMEOUT_SECS
}

fn default_claim_timeout_secs() -> u64 {
    DEFAULT_CLAIM_TIMEOUT_SECS
}
