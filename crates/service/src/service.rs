//! Starting, bumping and inspecting the pending peg-in.

use std::{sync::Arc, time::Duration};

use bitcoin::{Amount, FeeRate, OutPoint};
use pegin_funding::{
    BumpOutcome, BumpRequest, FundingEngine, FundingError, SendRequest, SentResult,
    WalletBackend, MIN_INPUT_CONFIRMATIONS,
};
use tokio::sync::Mutex;
use tracing::*;

use crate::{
    claim::ClaimBackend,
    errors::PeginError,
    state::{PeginState, PeginStore},
};

/// Expected main chain block interval, used for the time estimate.
const BLOCK_INTERVAL: Duration = Duration::from_secs(600);

/// Parameters of a new peg-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub amount: Amount,
    pub fee_rate_sat_vb: u64,
    /// Pay the fee out of the amount. Without explicit outpoints this spends every
    /// confirmed output and the amount becomes their total.
    pub sweep_all: bool,
    pub outpoints: Vec<OutPoint>,
}

/// Progress report of the pending peg-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeginStatus {
    pub state: PeginState,
    /// `None` until the transaction was sent, or if the wallet lost track of it.
    pub confirmations: Option<u32>,
    pub target_confirmations: u32,
    pub progress_percent: u32,
    /// Rough estimate assuming one block every ten minutes.
    pub time_left: Duration,
    pub min_bump_rate: u64,
}

impl PeginStatus {
    fn new(state: PeginState, confirmations: Option<u32>, target: u32) -> Self {
        let confs = confirmations.unwrap_or(0);
        let remaining = target.saturating_sub(confs);
        let progress_percent = (u64::from(confs.min(target)) * 100)
            .checked_div(u64::from(target))
            .unwrap_or(100) as u32;
        let min_bump_rate = state.min_bump_rate();
        Self {
            state,
            confirmations,
            target_confirmations: target,
            progress_percent,
            time_left: BLOCK_INTERVAL * remaining,
            min_bump_rate,
        }
    }
}

/// Owns the pending peg-in on behalf of the user.
#[derive(Debug)]
pub struct PeginService<W: ?Sized, C: ?Sized, S: ?Sized> {
    pub(crate) engine: Arc<FundingEngine<W>>,
    pub(crate) claims: Arc<C>,
    pub(crate) store: Arc<S>,
    pub(crate) claim_confirmations: u32,
    label: String,
    /// Serializes state transitions between user requests and the monitor.
    pub(crate) state_guard: Mutex<()>,
}

impl<W, C, S> PeginService<W, C, S>
where
    W: WalletBackend + ?Sized,
    C: ClaimBackend + ?Sized,
    S: PeginStore + ?Sized,
{
    pub fn new(
        engine: Arc<FundingEngine<W>>,
        claims: Arc<C>,
        store: Arc<S>,
        claim_confirmations: u32,
        label: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            claims,
            store,
            claim_confirmations,
            label: label.into(),
            state_guard: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<FundingEngine<W>> {
        &self.engine
    }

    pub fn claim_confirmations(&self) -> u32 {
        self.claim_confirmations
    }

    /// Sends a new peg-in.
    ///
    /// The claim script is stored before anything leaves the wallet. If the send fails the
    /// stored peg-in is dropped again, unless the transaction may have been published, in
    /// which case it is kept pending under its computed txid.
    pub async fn start(&self, req: StartRequest) -> Result<SentResult, PeginError> {
        let _guard = self.state_guard.lock().await;

        if let Some(prev) = self.store.load()? {
            match prev.txid {
                Some(txid) => return Err(PeginError::AlreadyPending(txid)),
                None => warn!(
                    address = %prev.mainchain_address,
                    "discarding peg-in that was never sent"
                ),
            }
        }

        let fee_rate = to_fee_rate(req.fee_rate_sat_vb)?;
        let (amount, outpoints) = self.resolve_inputs(&req).await?;

        let addr = self.claims.get_pegin_address().await?;
        let mut state = PeginState::new(
            addr.mainchain_address,
            addr.claim_script,
            amount,
            req.fee_rate_sat_vb,
        );
        self.store.save(&state)?;
        info!(
            address = %state.mainchain_address,
            claim_script = %state.claim_script,
            %amount,
            "stored peg-in claim data"
        );

        let send = SendRequest {
            address: state.mainchain_address.clone(),
            amount,
            fee_rate,
            outpoints,
            subtract_fee: req.sweep_all,
            label: self.label.clone(),
        };
        let sent = match self.engine.send(send).await {
            Ok(sent) => sent,
            Err(e) => {
                if let Some(txid) = e.ambiguous_broadcast() {
                    state.txid = Some(txid);
                    self.store.save(&state)?;
                    warn!(
                        %txid,
                        claim_script = %state.claim_script,
                        err = %e,
                        "peg-in may have been published, keeping it pending"
                    );
                } else if let Err(clear_err) = self.store.clear() {
                    error!(%clear_err, "failed to drop unsent peg-in");
                }
                return Err(e.into());
            }
        };

        state.txid = Some(sent.txid);
        self.store.save(&state)?;
        info!(
            txid = %sent.txid,
            amount = %sent.amount,
            fee_rate = req.fee_rate_sat_vb,
            "peg-in sent"
        );
        Ok(sent)
    }

    /// Raises the fee of the pending peg-in. Rates must strictly increase.
    pub async fn bump_fee(&self, fee_rate_sat_vb: u64) -> Result<BumpOutcome, PeginError> {
        let _guard = self.state_guard.lock().await;

        let mut state = self.store.load()?.ok_or(PeginError::NoPendingPegin)?;
        let txid = state.txid.ok_or(PeginError::NoPendingPegin)?;

        let minimum = state.min_bump_rate();
        if fee_rate_sat_vb < minimum {
            return Err(PeginError::FeeRateTooLow {
                requested: fee_rate_sat_vb,
                minimum,
            });
        }

        let bumped = self
            .engine
            .bump(BumpRequest {
                txid,
                destination: state.mainchain_address.clone(),
                amount: state.amount,
                fee_rate: to_fee_rate(fee_rate_sat_vb)?,
                label: self.label.clone(),
            })
            .await;
        let outcome = match bumped {
            Ok(outcome) => outcome,
            Err(e) => {
                // The original was removed and the replacement may be live.
                if let Some(new_txid) = e.ambiguous_broadcast() {
                    state.txid = Some(new_txid);
                    state.fee_rate_sat_vb = fee_rate_sat_vb;
                    self.store.save(&state)?;
                    warn!(
                        old_txid = %txid,
                        txid = %new_txid,
                        err = %e,
                        "replacement outcome unknown"
                    );
                }
                return Err(e.into());
            }
        };

        state.txid = Some(outcome.payment_txid());
        state.fee_rate_sat_vb = fee_rate_sat_vb;
        self.store.save(&state)?;
        info!(
            old_txid = %txid,
            txid = %outcome.payment_txid(),
            fee_rate = fee_rate_sat_vb,
            "peg-in fee bumped"
        );
        Ok(outcome)
    }

    /// Reports the pending peg-in, if any.
    pub async fn status(&self) -> Result<Option<PeginStatus>, PeginError> {
        let Some(state) = self.store.load()? else {
            return Ok(None);
        };
        let confirmations = match state.txid {
            Some(txid) => self.engine.confirmations(txid).await?.confirmations(),
            None => None,
        };
        Ok(Some(PeginStatus::new(
            state,
            confirmations,
            self.claim_confirmations,
        )))
    }

    async fn resolve_inputs(
        &self,
        req: &StartRequest,
    ) -> Result<(Amount, Vec<OutPoint>), PeginError> {
        if !req.sweep_all || !req.outpoints.is_empty() {
            return Ok((req.amount, req.outpoints.clone()));
        }

        let utxos = self.engine.list_unspent(MIN_INPUT_CONFIRMATIONS).await?;
        if utxos.is_empty() {
            return Err(FundingError::Validation("no confirmed outputs to sweep".into()).into());
        }
        let total = utxos.iter().map(|u| u.amount).sum::<Amount>();
        debug!(inputs = utxos.len(), %total, "sweeping all confirmed outputs");
        Ok((total, utxos.into_iter().map(|u| u.outpoint).collect()))
    }
}

fn to_fee_rate(sat_vb: u64) -> Result<FeeRate, FundingError> {
    FeeRate::from_sat_per_vb(sat_vb)
        .ok_or_else(|| FundingError::Validation(format!("fee rate {sat_vb} sat/vB overflows")))
}

#[cfg(test)]
mod tests {
    use std::io;

    use pegin_funding::test_utils::{destination_address, FakeWallet, TEST_NETWORK};

    use super::*;
    use crate::{
        claim::{MockClaimBackend, PeginAddress},
        state::{MockPeginStore, StoreError},
    };

    fn state(fee: u64) -> PeginState {
        PeginState::new("addr".into(), "script".into(), Amount::from_sat(1_000), fee)
    }

    #[test]
    fn test_status_math() {
        let status = PeginStatus::new(state(3), Some(51), 102);
        assert_eq!(status.progress_percent, 50);
        assert_eq!(status.time_left, Duration::from_secs(51 * 600));
        assert_eq!(status.min_bump_rate, 4);

        let done = PeginStatus::new(state(3), Some(150), 102);
        assert_eq!(done.progress_percent, 100);
        assert_eq!(done.time_left, Duration::ZERO);
    }

    #[test]
    fn test_status_unknown_counts_as_zero() {
        let status = PeginStatus::new(state(1), None, 102);
        assert_eq!(status.progress_percent, 0);
        assert_eq!(status.time_left, Duration::from_secs(102 * 600));
        assert_eq!(status.confirmations, None);
    }

    #[tokio::test]
    async fn test_unsaved_claim_data_blocks_send() {
        let wallet = FakeWallet::new();
        wallet.add_utxo(600_000, 3);
        let engine = Arc::new(FundingEngine::new(Arc::new(wallet), TEST_NETWORK));

        let mut claims = MockClaimBackend::new();
        claims.expect_get_pegin_address().returning(|| {
            Ok(PeginAddress {
                mainchain_address: destination_address(),
                claim_script: "0014ab".into(),
            })
        });
        let mut store = MockPeginStore::new();
        store.expect_load().returning(|| Ok(None));
        store
            .expect_save()
            .times(1)
            .returning(|_| Err(StoreError::Io(io::Error::other("disk full"))));
        store.expect_clear().never();

        let svc = PeginService::new(engine, Arc::new(claims), Arc::new(store), 102, "peg-in");
        let err = svc
            .start(StartRequest {
                amount: Amount::ZERO,
                fee_rate_sat_vb: 5,
                sweep_all: true,
                outpoints: Vec::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PeginError::Store(StoreError::Io(_))));
        let wallet = svc.engine().backend();
        assert!(wallet.published().is_empty());
        assert!(wallet.fund_calls().is_empty());
    }
}
