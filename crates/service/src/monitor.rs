//! Background polling of the pending peg-in.

use std::{sync::Arc, time::Duration};

use bitcoin::Txid;
use pegin_funding::WalletBackend;
use tokio::{
    sync::watch,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::*;

use crate::{
    claim::{ClaimBackend, ClaimError, ClaimOutcome, ClaimStage},
    errors::PeginError,
    service::PeginService,
    state::{PeginState, PeginStore},
};

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is pending.
    Idle,
    /// Pending but not deep enough yet. `None` when the wallet does not know the txid.
    Waiting {
        txid: Txid,
        confirmations: Option<u32>,
    },
    /// A claim was attempted and the peg-in forgotten.
    Claimed { txid: Txid, outcome: ClaimOutcome },
}

/// Polls the pending peg-in and claims it once.
#[derive(Debug)]
pub struct PeginMonitor<W: ?Sized, C: ?Sized, S: ?Sized> {
    service: Arc<PeginService<W, C, S>>,
}

impl<W, C, S> PeginMonitor<W, C, S>
where
    W: WalletBackend + ?Sized,
    C: ClaimBackend + ?Sized,
    S: PeginStore + ?Sized,
{
    pub fn new(service: Arc<PeginService<W, C, S>>) -> Self {
        Self { service }
    }

    /// Checks the depth of the pending peg-in and claims it at the threshold.
    ///
    /// There is exactly one claim attempt per peg-in: the stored state is cleared whatever
    /// the outcome, and failures are logged with everything needed to claim by hand.
    pub async fn tick(&self) -> Result<TickOutcome, PeginError> {
        let svc = &self.service;
        let _guard = svc.state_guard.lock().await;

        let Some(state) = svc.store.load()? else {
            return Ok(TickOutcome::Idle);
        };
        let Some(txid) = state.txid else {
            return Ok(TickOutcome::Idle);
        };

        let confirmations = svc.engine.confirmations(txid).await?.confirmations();
        match confirmations {
            Some(c) if c >= svc.claim_confirmations => {}
            _ => {
                trace!(%txid, ?confirmations, "peg-in not deep enough yet");
                return Ok(TickOutcome::Waiting {
                    txid,
                    confirmations,
                });
            }
        }

        info!(%txid, ?confirmations, "claiming peg-in");
        let outcome = self.claim(&state, txid).await;
        svc.store.clear()?;
        Ok(TickOutcome::Claimed { txid, outcome })
    }

    async fn claim(&self, state: &PeginState, txid: Txid) -> ClaimOutcome {
        let claims = &self.service.claims;

        let raw_tx = match claims.get_raw_transaction(txid).await {
            Ok(raw) => raw,
            Err(error) => return failed(state, txid, ClaimStage::RawTransaction, error),
        };
        let proof = match claims.get_tx_out_proof(txid).await {
            Ok(proof) => proof,
            Err(error) => return failed(state, txid, ClaimStage::Proof, error),
        };

        match claims
            .claim_pegin(&raw_tx, &proof, &state.claim_script)
            .await
        {
            Ok(sidechain_txid) => {
                info!(%txid, %sidechain_txid, "peg-in claimed");
                ClaimOutcome::Claimed { sidechain_txid }
            }
            Err(e) if e.is_ambiguous() => {
                warn!(
                    %txid,
                    claim_script = %state.claim_script,
                    "claim timed out, check the side chain wallet before retrying"
                );
                ClaimOutcome::Ambiguous
            }
            Err(error) => {
                error!(%raw_tx, %proof, "claim inputs");
                failed(state, txid, ClaimStage::Claim, error)
            }
        }
    }

    /// Polls every `interval` until `shutdown` flips to true or its sender goes away.
    ///
    /// A tick in progress always runs to completion.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?interval, "peg-in monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(TickOutcome::Claimed { txid, outcome }) => {
                            info!(%txid, ?outcome, "peg-in finished");
                        }
                        Ok(outcome) => debug!(?outcome, "peg-in poll"),
                        Err(e) => warn!(err = %e, "peg-in poll failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("peg-in monitor stopped");
    }
}

fn failed(state: &PeginState, txid: Txid, stage: ClaimStage, error: ClaimError) -> ClaimOutcome {
    error!(
        %txid,
        ?stage,
        %error,
        claim_script = %state.claim_script,
        "peg-in claim failed, claim manually"
    );
    ClaimOutcome::Failed { stage, error }
}
