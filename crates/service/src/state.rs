//! Persistence of the pending peg-in.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use bitcoin::{Amount, Txid};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything needed to follow a peg-in through to its claim.
///
/// The claim script is written before the funding transaction is sent. Losing it after
/// the coins left the wallet makes the peg-in unclaimable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeginState {
    /// Main chain address the coins are sent to.
    pub mainchain_address: String,
    pub claim_script: String,
    /// Amount requested by the user.
    pub amount: Amount,
    /// Fee rate of the most recent send or bump, in sat/vB.
    pub fee_rate_sat_vb: u64,
    /// Unset between persisting the claim data and a successful send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Txid>,
    /// Unix timestamp of the start.
    pub started_at: u64,
}

impl PeginState {
    pub fn new(
        mainchain_address: String,
        claim_script: String,
        amount: Amount,
        fee_rate_sat_vb: u64,
    ) -> Self {
        Self {
            mainchain_address,
            claim_script,
            amount,
            fee_rate_sat_vb,
            txid: None,
            started_at: unix_now(),
        }
    }

    /// Lowest rate a bump may use. Rates only ever go up.
    pub fn min_bump_rate(&self) -> u64 {
        self.fee_rate_sat_vb + 1
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt state: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Holds at most one pending peg-in.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
pub trait PeginStore: Send + Sync {
    fn load(&self) -> Result<Option<PeginState>, StoreError>;

    /// Replaces whatever was stored.
    fn save(&self, state: &PeginState) -> Result<(), StoreError>;

    /// Forgets the stored peg-in. Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Stores the peg-in as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl PeginStore for JsonFileStore {
    fn load(&self) -> Result<Option<PeginState>, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn save(&self, state: &PeginState) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(state)?;
        // Rename is atomic, so a crash never leaves a half written file behind.
        let tmp = self.tmp_path();
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps the peg-in in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PeginState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeginStore for MemoryStore {
    fn load(&self) -> Result<Option<PeginState>, StoreError> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &PeginState) -> Result<(), StoreError> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.state.lock().take();
        Ok(())
    }
}
