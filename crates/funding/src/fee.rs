//! Fee-from-amount emulation for backends that cannot resize an output themselves.
//!
//! The fee is learned by funding a change-only template over the same inputs, then the
//! payment is retried with the amount reduced by that fee plus a growing haircut until
//! the backend accepts it. Older backends underestimate the final witness size by a few
//! bytes, so the exact "inputs minus fee" amount is usually refused at first.

use std::collections::BTreeMap;

use bitcoin::{Address, Amount, FeeRate, OutPoint, Psbt};
use tracing::*;

use crate::{
    backend::{BackendError, WalletBackend},
    errors::{FundingError, FundingResult},
    locks::OutpointLocks,
    psbt::{decode_psbt, FundedPsbt, PsbtBuilder},
    types::LockId,
};

/// Increment between two funding retries.
pub const HAIRCUT_STEP: Amount = Amount::from_sat(5);

/// Largest haircut tried before giving up.
pub const HAIRCUT_CEILING: Amount = Amount::from_sat(2000);

/// Haircuts in the order they are tried: 0, 5, 10, ... up to the ceiling inclusive.
pub fn haircuts() -> impl Iterator<Item = Amount> {
    (0..=HAIRCUT_CEILING.to_sat())
        .step_by(HAIRCUT_STEP.to_sat() as usize)
        .map(Amount::from_sat)
}

/// Miner fee of a funded PSBT: sum of spent output values minus sum of created outputs.
///
/// Every input must carry either a witness utxo or the full previous transaction.
pub fn psbt_fee(psbt: &Psbt) -> FundingResult<Amount> {
    let mut spent = Amount::ZERO;
    for (idx, (input, txin)) in psbt
        .inputs
        .iter()
        .zip(&psbt.unsigned_tx.input)
        .enumerate()
    {
        let value = if let Some(utxo) = &input.witness_utxo {
            utxo.value
        } else if let Some(prev) = &input.non_witness_utxo {
            prev.output
                .get(txin.previous_output.vout as usize)
                .map(|o| o.value)
                .ok_or_else(|| {
                    FundingError::InvalidPsbt(format!("input {idx} points past its previous tx"))
                })?
        } else {
            return Err(FundingError::InvalidPsbt(format!(
                "input {idx} has no utxo information"
            )));
        };
        spent = spent
            .checked_add(value)
            .ok_or_else(|| FundingError::InvalidPsbt("input value overflow".into()))?;
    }

    let created = psbt
        .unsigned_tx
        .output
        .iter()
        .try_fold(Amount::ZERO, |acc, o| acc.checked_add(o.value))
        .ok_or_else(|| FundingError::InvalidPsbt("output value overflow".into()))?;

    spent.checked_sub(created).ok_or_else(|| {
        FundingError::InvalidPsbt(format!("outputs {created} exceed inputs {spent}"))
    })
}

/// `requested - fee - haircut`, clamped to zero.
pub fn corrected_amount(requested: Amount, fee: Amount, haircut: Amount) -> Amount {
    let deduction = fee.to_sat().saturating_add(haircut.to_sat());
    Amount::from_sat(requested.to_sat().saturating_sub(deduction))
}

/// Result of a successful correction.
#[derive(Debug, Clone)]
pub struct CorrectedFunding {
    pub funded: FundedPsbt,
    /// Amount that ends up in the payment output.
    pub amount: Amount,
    pub fee: Amount,
    pub haircut: Amount,
}

/// Runs the change-only probe and the haircut loop.
#[derive(Debug)]
pub struct FeeCorrector<'a, 'b, B: ?Sized> {
    builder: &'b PsbtBuilder<'a, B>,
}

impl<'a, 'b, B: WalletBackend + ?Sized> FeeCorrector<'a, 'b, B> {
    pub fn new(builder: &'b PsbtBuilder<'a, B>) -> Self {
        Self { builder }
    }

    /// Funds a payment of `requested` minus the fee to `address` from exactly `outpoints`.
    ///
    /// Leases taken by the backend are released before each retry. On exhaustion nothing
    /// stays leased.
    pub async fn fund(
        &self,
        address: &Address,
        requested: Amount,
        outpoints: &[OutPoint],
        fee_rate: FeeRate,
    ) -> FundingResult<CorrectedFunding> {
        if outpoints.is_empty() {
            return Err(FundingError::Validation(
                "subtracting the fee requires explicit outpoints".into(),
            ));
        }
        let locks = OutpointLocks::new(self.builder.backend());

        let fee = match self.probe_fee(outpoints, fee_rate).await {
            Ok(fee) => fee,
            Err(err) => {
                locks.release(outpoints, LockId::Implicit).await;
                return Err(err);
            }
        };
        debug!(%requested, %fee, "probed fee for change-only template");

        let destination = address.to_string();
        let mut last: Option<(Amount, BackendError)> = None;
        for haircut in haircuts() {
            locks.release(outpoints, LockId::Implicit).await;

            let amount = corrected_amount(requested, fee, haircut);
            let outputs = BTreeMap::from([(destination.clone(), amount)]);
            match self.builder.fund_outputs(outpoints, outputs, fee_rate).await {
                Ok(funded) => {
                    info!(%requested, %fee, %haircut, %amount, "funded with fee subtracted");
                    return Ok(CorrectedFunding {
                        funded,
                        amount,
                        fee,
                        haircut,
                    });
                }
                Err(FundingError::Funding(err)) => {
                    trace!(%haircut, %amount, %err, "funding refused, increasing haircut");
                    last = Some((haircut, err));
                }
                Err(other) => {
                    locks.release(outpoints, LockId::Implicit).await;
                    return Err(other);
                }
            }
        }

        locks.release(outpoints, LockId::Implicit).await;
        let (last_haircut, last_error) = last.unwrap_or((
            HAIRCUT_CEILING,
            BackendError::Rejected("no funding attempt was made".into()),
        ));
        warn!(%requested, %fee, %last_haircut, %last_error, "fee correction exhausted");
        Err(FundingError::FeeCorrectionExhausted {
            requested,
            fee,
            last_haircut,
            last_error,
        })
    }

    async fn probe_fee(&self, outpoints: &[OutPoint], fee_rate: FeeRate) -> FundingResult<Amount> {
        let funded = self
            .builder
            .fund_outputs(outpoints, BTreeMap::new(), fee_rate)
            .await?;
        psbt_fee(&decode_psbt(&funded.psbt)?)
    }
}
