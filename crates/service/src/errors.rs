use bitcoin::Txid;
use pegin_funding::FundingError;
use thiserror::Error;

use crate::{claim::ClaimError, state::StoreError};

#[derive(Debug, Error)]
pub enum PeginError {
    #[error("peg-in {0} is still pending")]
    AlreadyPending(Txid),

    #[error("no pending peg-in")]
    NoPendingPegin,

    #[error("fee rate {requested} sat/vB is too low, need at least {minimum} sat/vB")]
    FeeRateTooLow { requested: u64, minimum: u64 },

    #[error("funding: {0}")]
    Funding(#[from] FundingError),

    #[error("claim backend: {0}")]
    Claim(#[from] ClaimError),

    #[error("state store: {0}")]
    Store(#[from] StoreError),
}
