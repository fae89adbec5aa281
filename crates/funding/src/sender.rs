//! Entry point tying the pipeline together.

use std::{sync::Arc, time::Duration};

use bitcoin::{Amount, FeeRate, Network, Txid};
use tokio::sync::Mutex;
use tracing::*;

use crate::{
    backend::WalletBackend,
    broadcast::{finalize_and_publish, PaidAmount},
    capability::CapabilityCache,
    confirmations::ConfirmationTracker,
    errors::{FundingError, FundingResult},
    escalation::{BumpOutcome, BumpRequest, FeeEscalator},
    fee::FeeCorrector,
    psbt::{parse_address, PsbtBuilder},
    types::{ConfirmationStatus, SendRequest, SentResult, UnspentOutput, DEFAULT_LEASE_TTL},
};

/// Lowest fee rate accepted for a send.
pub const MIN_FEE_RATE: FeeRate = FeeRate::from_sat_per_vb_unchecked(1);

/// Sends and fee bumps against one wallet backend.
///
/// Whole operations are serialized so that two callers never fund from the same reserved
/// set at the same time.
#[derive(Debug)]
pub struct FundingEngine<B: ?Sized> {
    network: Network,
    lease_ttl: Duration,
    capability: CapabilityCache,
    op_guard: Mutex<()>,
    backend: Arc<B>,
}

impl<B: WalletBackend + ?Sized> FundingEngine<B> {
    pub fn new(backend: Arc<B>, network: Network) -> Self {
        Self {
            network,
            lease_ttl: DEFAULT_LEASE_TTL,
            capability: CapabilityCache::new(),
            op_guard: Mutex::new(()),
            backend,
        }
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn capability(&self) -> &CapabilityCache {
        &self.capability
    }

    /// Funds, signs and publishes `req`.
    ///
    /// With `subtract_fee` the fee is paid out of the given outpoints: a backend that can
    /// resize outputs sweeps them, an older one goes through the haircut loop. Otherwise
    /// `amount` is paid exactly and change returns to the wallet.
    pub async fn send(&self, req: SendRequest) -> FundingResult<SentResult> {
        let _guard = self.op_guard.lock().await;
        self.pipeline().send(req).await
    }

    /// Raises the fee of the unconfirmed transaction `req.txid`.
    pub async fn bump(&self, req: BumpRequest) -> FundingResult<BumpOutcome> {
        let _guard = self.op_guard.lock().await;
        FeeEscalator::new(self.pipeline()).bump(&req).await
    }

    pub async fn confirmations(&self, txid: Txid) -> FundingResult<ConfirmationStatus> {
        ConfirmationTracker::new(self.backend.as_ref())
            .status(txid)
            .await
    }

    pub async fn list_unspent(&self, min_confirmations: u32) -> FundingResult<Vec<UnspentOutput>> {
        self.backend
            .list_unspent(min_confirmations)
            .await
            .map_err(FundingError::backend("list_unspent"))
    }

    fn pipeline(&self) -> SendPipeline<'_, B> {
        SendPipeline {
            backend: self.backend.as_ref(),
            network: self.network,
            lease_ttl: self.lease_ttl,
            capability: &self.capability,
        }
    }
}

/// One send, without the operation guard. Shared by fresh sends and replacements.
#[derive(Debug)]
pub(crate) struct SendPipeline<'a, B: ?Sized> {
    pub(crate) backend: &'a B,
    network: Network,
    lease_ttl: Duration,
    pub(crate) capability: &'a CapabilityCache,
}

impl<B: WalletBackend + ?Sized> SendPipeline<'_, B> {
    pub(crate) async fn send(&self, req: SendRequest) -> FundingResult<SentResult> {
        validate(&req)?;
        let address = parse_address(&req.address, self.network)?;
        let builder = PsbtBuilder::new(self.backend, self.network, self.lease_ttl);

        if !req.subtract_fee {
            let funded = builder
                .fund_direct(&address, req.amount, &req.outpoints, req.fee_rate)
                .await?;
            return finalize_and_publish(
                self.backend,
                funded,
                &req.label,
                PaidAmount::Requested(req.amount),
            )
            .await;
        }

        if self.capability.supports_rbf_sweep(self.backend).await {
            debug!(inputs = req.outpoints.len(), "sweeping with fee subtracted");
            let funded = builder
                .fund_sweep(&address, &req.outpoints, req.fee_rate)
                .await?;
            finalize_and_publish(self.backend, funded, &req.label, PaidAmount::FirstOutput).await
        } else {
            debug!(inputs = req.outpoints.len(), "emulating fee subtraction");
            let corrected = FeeCorrector::new(&builder)
                .fund(&address, req.amount, &req.outpoints, req.fee_rate)
                .await?;
            finalize_and_publish(
                self.backend,
                corrected.funded,
                &req.label,
                PaidAmount::Requested(corrected.amount),
            )
            .await
        }
    }
}

fn validate(req: &SendRequest) -> FundingResult<()> {
    if req.amount == Amount::ZERO {
        return Err(FundingError::Validation("amount must be positive".into()));
    }
    if req.fee_rate < MIN_FEE_RATE {
        return Err(FundingError::Validation(format!(
            "fee rate must be at least {} sat/vB",
            MIN_FEE_RATE.to_sat_per_vb_floor()
        )));
    }
    if req.subtract_fee && req.outpoints.is_empty() {
        return Err(FundingError::Validation(
            "subtracting the fee requires explicit outpoints".into(),
        ));
    }
    Ok(())
}
