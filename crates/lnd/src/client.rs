//! HTTP transport to the LND REST gateway.

use std::{fs, path::Path, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderValue},
    Certificate, Client, Method,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::*;

use crate::{errors::LndError, wire::RpcStatus};

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

/// Authenticated client for one LND node.
#[derive(Debug, Clone)]
pub struct LndClient {
    base_url: String,
    http: Client,
    /// Applied to every call except those handing a transaction to the wallet.
    timeout: Duration,
}

impl LndClient {
    /// Builds a client from the node's macaroon and, if it is self-signed, its TLS
    /// certificate.
    pub fn connect(
        rest_url: &str,
        macaroon_path: &Path,
        tls_cert_path: Option<&Path>,
        timeout: Duration,
    ) -> Result<Self, LndError> {
        let macaroon = fs::read(macaroon_path).map_err(|source| LndError::Io {
            what: "macaroon",
            source,
        })?;
        let tls_cert = tls_cert_path
            .map(|p| {
                fs::read(p).map_err(|source| LndError::Io {
                    what: "tls certificate",
                    source,
                })
            })
            .transpose()?;
        Self::new(rest_url, &macaroon, tls_cert.as_deref(), timeout)
    }

    pub fn new(
        rest_url: &str,
        macaroon: &[u8],
        tls_cert_pem: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Self, LndError> {
        let mut auth = HeaderValue::from_str(&hex::encode(macaroon))
            .map_err(|_| LndError::InvalidMacaroon)?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(MACAROON_HEADER, auth);

        let mut builder = Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout);
        if let Some(pem) = tls_cert_pem {
            builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
        }

        Ok(Self {
            base_url: rest_url.trim_end_matches('/').to_owned(),
            http: builder.build()?,
            timeout,
        })
    }

    pub(crate) async fn get<Rs: DeserializeOwned>(&self, path: &str) -> Result<Rs, LndError> {
        self.request(Method::GET, path, None::<&()>, Some(self.timeout))
            .await
    }

    pub(crate) async fn post<Rq: Serialize, Rs: DeserializeOwned>(
        &self,
        path: &str,
        body: &Rq,
    ) -> Result<Rs, LndError> {
        self.request(Method::POST, path, Some(body), Some(self.timeout))
            .await
    }

    /// Like [`Self::post`] but waits for the answer however long it takes. Used where
    /// giving up would leave it unknown whether the wallet acted on the call.
    pub(crate) async fn post_untimed<Rq: Serialize, Rs: DeserializeOwned>(
        &self,
        path: &str,
        body: &Rq,
    ) -> Result<Rs, LndError> {
        self.request(Method::POST, path, Some(body), None).await
    }

    async fn request<Rq: Serialize, Rs: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Rq>,
        timeout: Option<Duration>,
    ) -> Result<Rs, LndError> {
        let url = format!("{}{path}", self.base_url);
        trace!(%method, %url, "lnd request");

        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let payload = resp.bytes().await?;

        if status.is_success() {
            serde_json::from_slice(&payload).map_err(|e| LndError::Decode(e.to_string()))
        } else {
            let err = serde_json::from_slice::<RpcStatus>(&payload).unwrap_or_else(|_| {
                RpcStatus {
                    code: i32::from(status.as_u16()),
                    message: String::from_utf8_lossy(&payload).into_owned(),
                }
            });
            debug!(%url, %status, code = err.code, message = %err.message, "lnd request failed");
            Err(LndError::Rpc {
                code: err.code,
                message: err.message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_connect_reads_macaroon() {
        let mut mac = tempfile::NamedTempFile::new().unwrap();
        mac.write_all(&[0x02, 0x01, 0x03]).unwrap();

        let client = LndClient::connect(
            "https://localhost:8080/",
            mac.path(),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://localhost:8080");
    }

    #[test]
    fn test_connect_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = LndClient::connect(
            "https://localhost:8080",
            &dir.path().join("admin.macaroon"),
            None,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, LndError::Io { what: "macaroon", .. }));
    }
}
