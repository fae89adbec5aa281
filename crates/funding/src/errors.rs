//! Error types for the funding pipeline.

use bitcoin::{Amount, OutPoint, Txid};
use thiserror::Error;

use crate::backend::BackendError;

pub type FundingResult<T> = Result<T, FundingError>;

#[derive(Debug, Error)]
pub enum FundingError {
    /// Bad caller input. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("cannot decode address '{address}' for {network}: {reason}")]
    AddressDecode {
        address: String,
        network: bitcoin::Network,
        reason: String,
    },

    #[error("outpoint {0} is locked by another party")]
    LockConflict(OutPoint),

    #[error("outpoint {0} is spent or unknown to the wallet")]
    NotFound(OutPoint),

    #[error("backend refused to fund the transaction: {0}")]
    Funding(#[source] BackendError),

    #[error(
        "cannot fund {requested} minus fee {fee} with haircuts up to {last_haircut}: {last_error}"
    )]
    FeeCorrectionExhausted {
        requested: Amount,
        fee: Amount,
        last_haircut: Amount,
        #[source]
        last_error: BackendError,
    },

    #[error("failed to finalize psbt: {0}")]
    Finalize(#[source] BackendError),

    #[error("failed to publish {txid}: {source}")]
    Broadcast {
        txid: Txid,
        #[source]
        source: BackendError,
    },

    /// The backend may or may not have accepted `txid`. Its inputs stay leased.
    #[error("outcome of publishing {txid} is unknown: {source}")]
    BroadcastAmbiguous {
        txid: Txid,
        #[source]
        source: BackendError,
    },

    /// Rebuilding a removed transaction failed. `restored` tells whether the original was
    /// published again.
    #[error("replacing {txid} failed (original restored: {restored}): {source}")]
    ReplacementFailed {
        txid: Txid,
        restored: bool,
        #[source]
        source: Box<FundingError>,
    },

    #[error("transaction {0} has no change output to spend")]
    NoChangeOutput(Txid),

    #[error("transaction {0} not found in wallet history")]
    TxNotFound(Txid),

    #[error("backend refused to remove {txid}: {status}")]
    RemovalRejected { txid: Txid, status: String },

    #[error("malformed psbt: {0}")]
    InvalidPsbt(String),

    #[error("malformed transaction: {0}")]
    InvalidTransaction(String),

    #[error("{op}: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: BackendError,
    },
}

impl FundingError {
    pub(crate) fn backend(op: &'static str) -> impl FnOnce(BackendError) -> FundingError {
        move |source| FundingError::Backend { op, source }
    }

    /// The txid of a transaction that may be on the network even though publishing it
    /// reported an error.
    pub fn ambiguous_broadcast(&self) -> Option<Txid> {
        match self {
            FundingError::BroadcastAmbiguous { txid, .. } => Some(*txid),
            _ => None,
        }
    }
}
