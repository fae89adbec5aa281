use pegin_funding::OutpointParseError;
use pegin_lnd::LndError;
use pegin_service::ClaimError;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum InitError {
    #[error("lnd: {0}")]
    Lnd(#[from] LndError),

    #[error("node rpc: {0}")]
    Rpc(#[from] ClaimError),
}

#[derive(Debug, Error)]
pub(crate) enum ArgsError {
    #[error("--amount is required unless sweeping the whole wallet")]
    MissingAmount,

    #[error(transparent)]
    Outpoint(#[from] OutpointParseError),
}
