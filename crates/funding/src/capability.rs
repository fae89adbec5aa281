//! Backend capability detection.
//!
//! Backends from 0.18 on can resize an output of a caller-built PSBT to absorb the fee,
//! which makes sweep funding and replacement possible. Older ones fall back to the
//! haircut loop and child-pays-for-parent.

use std::{fmt, str::FromStr};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::*;

use crate::backend::WalletBackend;

/// First backend version that can resize a caller-built PSBT's output.
pub const RBF_SWEEP_MIN_VERSION: BackendVersion = BackendVersion {
    major: 0,
    minor: 18,
};

/// Major/minor version of the backend. Patch level and build metadata are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackendVersion {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for BackendVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparseable backend version '{0}'")]
pub struct VersionParseError(pub String);

impl FromStr for BackendVersion {
    type Err = VersionParseError;

    /// Accepts strings like `0.18.3-beta commit=v0.18.3-beta` or `0.17-beta`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || VersionParseError(s.to_owned());
        let release = s.split_whitespace().next().ok_or_else(err)?;
        let mut parts = release.split('.');

        let mut component = || -> Result<u32, VersionParseError> {
            let part = parts.next().ok_or_else(err)?;
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().map_err(|_| err())
        };
        let major = component()?;
        let minor = component()?;
        Ok(Self { major, minor })
    }
}

/// Memoized answer to "does the backend support sweep funding".
///
/// The first successful probe is cached until [`CapabilityCache::invalidate`] is called,
/// e.g. after reconnecting to a possibly upgraded node. Failed probes are not cached.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    probed: RwLock<Option<BackendVersion>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version seen by the last successful probe, if any.
    pub fn cached(&self) -> Option<BackendVersion> {
        *self.probed.read()
    }

    pub fn invalidate(&self) {
        *self.probed.write() = None;
    }

    /// Whether the backend can fund sweeps and therefore replace transactions.
    ///
    /// Reports `false` if the version cannot be obtained.
    pub async fn supports_rbf_sweep<B: WalletBackend + ?Sized>(&self, backend: &B) -> bool {
        if let Some(version) = self.cached() {
            return version >= RBF_SWEEP_MIN_VERSION;
        }

        let raw = match backend.version().await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, "could not probe backend version");
                return false;
            }
        };
        let version = match raw.parse::<BackendVersion>() {
            Ok(v) => v,
            Err(err) => {
                warn!(%err, "could not probe backend version");
                return false;
            }
        };

        *self.probed.write() = Some(version);
        let capable = version >= RBF_SWEEP_MIN_VERSION;
        info!(%version, capable, "probed backend capabilities");
        capable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MockWalletBackend};

    #[test]
    fn test_parse_versions() {
        let v: BackendVersion = "0.18.3-beta commit=v0.18.3-beta".parse().unwrap();
        assert_eq!(v, BackendVersion { major: 0, minor: 18 });

        let v: BackendVersion = "0.17-beta".parse().unwrap();
        assert_eq!(v, BackendVersion { major: 0, minor: 17 });

        let v: BackendVersion = "1.2.0".parse().unwrap();
        assert!(v >= RBF_SWEEP_MIN_VERSION);

        assert!("".parse::<BackendVersion>().is_err());
        assert!("beta".parse::<BackendVersion>().is_err());
        assert!("0".parse::<BackendVersion>().is_err());
    }

    #[test]
    fn test_minor_compared_numerically() {
        let v: BackendVersion = "0.9.0".parse().unwrap();
        assert!(v < RBF_SWEEP_MIN_VERSION);
        let v: BackendVersion = "0.100.0".parse().unwrap();
        assert!(v > RBF_SWEEP_MIN_VERSION);
    }

    #[tokio::test]
    async fn test_probe_is_memoized_until_invalidated() {
        let mut backend = MockWalletBackend::new();
        backend
            .expect_version()
            .times(2)
            .returning(|| Ok("0.18.0-beta".into()));

        let cache = CapabilityCache::new();
        assert!(cache.supports_rbf_sweep(&backend).await);
        assert!(cache.supports_rbf_sweep(&backend).await);
        assert_eq!(cache.cached(), Some(BackendVersion { major: 0, minor: 18 }));

        cache.invalidate();
        assert_eq!(cache.cached(), None);
        assert!(cache.supports_rbf_sweep(&backend).await);
    }

    #[tokio::test]
    async fn test_failed_probe_is_not_cached() {
        let mut backend = MockWalletBackend::new();
        let mut calls = 0;
        backend.expect_version().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Err(BackendError::Transport("connection refused".into()))
            } else {
                Ok("0.17.4-beta".into())
            }
        });

        let cache = CapabilityCache::new();
        assert!(!cache.supports_rbf_sweep(&backend).await);
        assert_eq!(cache.cached(), None);
        assert!(!cache.supports_rbf_sweep(&backend).await);
        assert_eq!(cache.cached(), Some(BackendVersion { major: 0, minor: 17 }));
    }
}
