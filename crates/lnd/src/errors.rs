use std::io;

use pegin_funding::BackendError;
use pegin_service::HistoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LndError {
    #[error("reading {what}: {source}")]
    Io {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid macaroon header")]
    InvalidMacaroon,

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with an error status.
    #[error("lnd error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("decoding response: {0}")]
    Decode(String),
}

// Lock table errors from the wallet, matched on their text since REST only exposes that.
const ALREADY_LOCKED: &str = "output already locked";
const UNKNOWN_OUTPUT: &str = "unknown output";
const INSUFFICIENT_FUNDS: &str = "insufficient funds";

impl From<LndError> for BackendError {
    fn from(e: LndError) -> Self {
        match e {
            LndError::Rpc { message, .. } => {
                let lower = message.to_lowercase();
                if lower.contains(ALREADY_LOCKED) {
                    BackendError::AlreadyLocked
                } else if lower.contains(UNKNOWN_OUTPUT) {
                    BackendError::UnknownOutput
                } else if lower.contains(INSUFFICIENT_FUNDS) {
                    BackendError::InsufficientFunds(message)
                } else {
                    BackendError::Rejected(message)
                }
            }
            LndError::Decode(msg) => BackendError::Malformed(msg),
            LndError::Http(e) if e.is_timeout() => BackendError::Timeout,
            LndError::Http(e) if e.is_connect() => BackendError::Unreachable(e.to_string()),
            other => BackendError::Transport(other.to_string()),
        }
    }
}

impl From<LndError> for HistoryError {
    fn from(e: LndError) -> Self {
        match e {
            LndError::Rpc { message, .. } => HistoryError::Rejected(message),
            LndError::Decode(msg) => HistoryError::Malformed(msg),
            other => HistoryError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(message: &str) -> LndError {
        LndError::Rpc {
            code: 2,
            message: message.to_owned(),
        }
    }

    #[test]
    fn test_lock_errors_are_structured() {
        assert_eq!(
            BackendError::from(rpc("output already locked")),
            BackendError::AlreadyLocked
        );
        assert_eq!(
            BackendError::from(rpc("unknown output")),
            BackendError::UnknownOutput
        );
        assert!(matches!(
            BackendError::from(rpc(
                "insufficient funds available to construct transaction"
            )),
            BackendError::InsufficientFunds(_)
        ));
        assert_eq!(
            BackendError::from(rpc("transaction not found")),
            BackendError::Rejected("transaction not found".into())
        );
    }

    #[test]
    fn test_decode_errors_are_malformed() {
        assert!(matches!(
            BackendError::from(LndError::Decode("bad base64".into())),
            BackendError::Malformed(_)
        ));
        assert!(matches!(
            HistoryError::from(LndError::InvalidMacaroon),
            HistoryError::Transport(_)
        ));
    }
}
