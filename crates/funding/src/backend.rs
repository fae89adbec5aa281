//! Capabilities consumed from the node that owns the wallet.

use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{FeeRate, OutPoint, Txid};
use thiserror::Error;

use crate::types::{FundingTemplate, LockId, UnspentOutput, WalletTransaction};

/// Wallet RPCs of the node backend.
///
/// Signing, key derivation and coin selection all happen behind this trait. Implementations
/// must not hold local lock state: leases live in the backend's own table.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait WalletBackend: Send + Sync {
    /// Lists wallet outputs with at least `min_confirmations`.
    async fn list_unspent(&self, min_confirmations: u32)
        -> Result<Vec<UnspentOutput>, BackendError>;

    /// Leases `outpoint` under `lock` for `ttl`.
    async fn lease_output(
        &self,
        lock: LockId,
        outpoint: OutPoint,
        ttl: Duration,
    ) -> Result<(), BackendError>;

    /// Releases a lease. Releasing an output that is not leased may return
    /// [`BackendError::NotLocked`].
    async fn release_output(&self, lock: LockId, outpoint: OutPoint) -> Result<(), BackendError>;

    /// Funds a template and returns the serialized funded PSBT.
    async fn fund_psbt(
        &self,
        template: FundingTemplate,
        fee_rate: FeeRate,
    ) -> Result<Vec<u8>, BackendError>;

    /// Signs and finalizes a funded PSBT, returning the raw transaction bytes.
    async fn finalize_psbt(&self, psbt: Vec<u8>) -> Result<Vec<u8>, BackendError>;

    async fn publish_transaction(&self, raw_tx: Vec<u8>, label: String)
        -> Result<(), BackendError>;

    /// Looks a transaction up in the wallet's local history.
    async fn get_transaction(&self, txid: Txid)
        -> Result<Option<WalletTransaction>, BackendError>;

    /// Drops an unconfirmed transaction from the wallet's view.
    async fn remove_transaction(&self, txid: Txid) -> Result<(), BackendError>;

    /// Asks the backend to attach a child spending `outpoint` at `fee_rate`.
    async fn bump_fee(&self, outpoint: OutPoint, fee_rate: FeeRate) -> Result<(), BackendError>;

    /// Version string of the backend, e.g. `0.18.3-beta commit=v0.18.3-beta`.
    async fn version(&self) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("output already locked")]
    AlreadyLocked,

    #[error("output not locked")]
    NotLocked,

    #[error("unknown output")]
    UnknownOutput,

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("rejected: {0}")]
    Rejected(String),

    /// No answer in time. The request may still have been processed.
    #[error("request timed out")]
    Timeout,

    /// The connection was never established, so nothing was sent.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Whether the backend may have acted on the request despite the error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, BackendError::Timeout | BackendError::Transport(_))
    }
}
