//! Authenticated HTTP JSON-RPC transport.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use jsonrpsee::http_client::{HeaderMap, HeaderValue, HttpClient, HttpClientBuilder};
use pegin_service::ClaimError;

/// Where and how to reach a node's RPC server.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub url: String,
    pub user: String,
    pub password: String,
    /// Routes wallet calls to `<url>/wallet/<name>`.
    pub wallet: Option<String>,
    pub timeout: Duration,
}

impl RpcEndpoint {
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            wallet: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.wallet = Some(wallet.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn full_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        match &self.wallet {
            Some(w) => format!("{base}/wallet/{w}"),
            None => base.to_owned(),
        }
    }

    /// Builds a client, overriding the endpoint's timeout with `timeout` if given.
    pub(crate) fn build(&self, timeout: Option<Duration>) -> Result<HttpClient, ClaimError> {
        let creds = BASE64.encode(format!("{}:{}", self.user, self.password));
        let mut auth = HeaderValue::from_str(&format!("Basic {creds}"))
            .map_err(|e| ClaimError::Transport(format!("invalid credentials: {e}")))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", auth);

        HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(timeout.unwrap_or(self.timeout))
            .build(self.full_url())
            .map_err(|e| ClaimError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_url() {
        let ep = RpcEndpoint::new("http://127.0.0.1:7041/", "u", "p");
        assert_eq!(ep.full_url(), "http://127.0.0.1:7041");
        assert_eq!(
            ep.with_wallet("peg").full_url(),
            "http://127.0.0.1:7041/wallet/peg"
        );
    }

    #[test]
    fn test_build_rejects_bad_url() {
        let ep = RpcEndpoint::new("not a url", "u", "p");
        assert!(matches!(ep.build(None), Err(ClaimError::Transport(_))));
    }
}
