//! Reservation policy for wallet outputs.
//!
//! The backend owns the lock table; this module only decides when to lease and when to
//! release. Every failed funding path releases what it reserved, and release is
//! idempotent so cleanup can be attempted unconditionally.

use std::time::Duration;

use bitcoin::OutPoint;
use tracing::*;

use crate::{
    backend::{BackendError, WalletBackend},
    errors::{FundingError, FundingResult},
    types::{LockId, LockedOutpoint},
};

/// Leases and releases outputs through a [`WalletBackend`].
#[derive(Debug)]
pub struct OutpointLocks<'a, B: ?Sized> {
    backend: &'a B,
}

impl<'a, B: WalletBackend + ?Sized> OutpointLocks<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Leases every outpoint under `lock` for `ttl`.
    ///
    /// If any lease fails, the ones already taken by this call are released before the
    /// error is returned.
    pub async fn lock(
        &self,
        outpoints: &[OutPoint],
        lock: LockId,
        ttl: Duration,
    ) -> FundingResult<Vec<LockedOutpoint>> {
        let mut taken = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            match self.backend.lease_output(lock, *outpoint, ttl).await {
                Ok(()) => {
                    trace!(%outpoint, %lock, ttl_secs = ttl.as_secs(), "leased output");
                    taken.push(*outpoint);
                }
                Err(err) => {
                    warn!(%outpoint, %lock, %err, "failed to lease output");
                    self.release(&taken, lock).await;
                    return Err(lease_error(*outpoint, err));
                }
            }
        }
        Ok(taken
            .into_iter()
            .map(|op| LockedOutpoint::new(op, lock))
            .collect())
    }

    /// Releases `outpoints` under `lock`.
    ///
    /// Never fails and never stops early: outputs that were not leased are skipped and
    /// other errors are logged. Returns how many leases the backend confirmed released.
    pub async fn release(&self, outpoints: &[OutPoint], lock: LockId) -> usize {
        let mut released = 0;
        for outpoint in outpoints {
            match self.backend.release_output(lock, *outpoint).await {
                Ok(()) => {
                    trace!(%outpoint, %lock, "released output");
                    released += 1;
                }
                Err(BackendError::NotLocked | BackendError::UnknownOutput) => {
                    trace!(%outpoint, %lock, "output was not leased");
                }
                Err(err) => {
                    warn!(%outpoint, %lock, %err, "failed to release output");
                }
            }
        }
        released
    }

    /// Releases a set of tagged reservations, each under its own lock id.
    pub async fn release_locked(&self, locked: &[LockedOutpoint]) -> usize {
        let mut released = 0;
        for l in locked {
            released += self.release(&[l.outpoint], l.lock).await;
        }
        released
    }

    /// Releases `outpoints` under both lock ids.
    ///
    /// Used after a transaction is removed from the wallet, where removal alone does not
    /// always drop the leases its inputs were funded under.
    pub async fn release_all_tokens(&self, outpoints: &[OutPoint]) -> usize {
        let mut released = 0;
        for lock in LockId::ALL {
            released += self.release(outpoints, lock).await;
        }
        released
    }
}

fn lease_error(outpoint: OutPoint, err: BackendError) -> FundingError {
    match err {
        BackendError::AlreadyLocked => FundingError::LockConflict(outpoint),
        BackendError::UnknownOutput => FundingError::NotFound(outpoint),
        other => FundingError::Backend {
            op: "lease_output",
            source: other,
        },
    }
}
