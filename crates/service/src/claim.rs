//! Side chain capabilities needed to claim a peg-in.

use async_trait::async_trait;
use bitcoin::Txid;
use thiserror::Error;

/// Address to send main chain coins to, with the script that later unlocks the claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeginAddress {
    pub mainchain_address: String,
    pub claim_script: String,
}

/// RPCs of the side chain node and of the main chain node it validates against.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ClaimBackend: Send + Sync {
    /// Generates a fresh peg-in address.
    async fn get_pegin_address(&self) -> Result<PeginAddress, ClaimError>;

    /// Raw hex of a confirmed main chain transaction.
    async fn get_raw_transaction(&self, txid: Txid) -> Result<String, ClaimError>;

    /// Hex merkle proof that `txid` is in a main chain block.
    async fn get_tx_out_proof(&self, txid: Txid) -> Result<String, ClaimError>;

    /// Claims the peg-in and returns the side chain txid.
    async fn claim_pegin(
        &self,
        raw_tx: &str,
        proof: &str,
        claim_script: &str,
    ) -> Result<String, ClaimError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    /// No answer in time. The call may still have gone through.
    #[error("request timed out")]
    Timeout,

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ClaimError {
    /// Whether the remote side may have acted on the request despite the error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ClaimError::Timeout)
    }
}

/// Step at which a claim attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStage {
    RawTransaction,
    Proof,
    Claim,
}

/// Result of the single claim attempt made for a peg-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { sidechain_txid: String },
    /// The claim call timed out. It may or may not have been accepted.
    Ambiguous,
    Failed { stage: ClaimStage, error: ClaimError },
}
