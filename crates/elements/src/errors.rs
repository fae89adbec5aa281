use jsonrpsee::core::ClientError;
use pegin_service::ClaimError;

/// Classifies a JSON-RPC client error by kind. Only a timeout is ambiguous.
pub(crate) fn classify(err: ClientError) -> ClaimError {
    match err {
        ClientError::RequestTimeout => ClaimError::Timeout,
        ClientError::Call(obj) => ClaimError::Rpc {
            code: i64::from(obj.code()),
            message: obj.message().to_owned(),
        },
        ClientError::ParseError(e) => ClaimError::Malformed(e.to_string()),
        other => ClaimError::Transport(other.to_string()),
    }
}
