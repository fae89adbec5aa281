//! Finalization and publication of funded PSBTs.

use bitcoin::{consensus::deserialize, Amount, Transaction};
use tracing::*;

use crate::{
    backend::WalletBackend,
    errors::{FundingError, FundingResult},
    locks::OutpointLocks,
    psbt::FundedPsbt,
    types::SentResult,
};

/// How the amount reported in [`SentResult`] is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaidAmount {
    /// The amount the template asked for.
    Requested(Amount),
    /// Whatever the backend left in output 0, as in a sweep.
    FirstOutput,
}

/// Signs, finalizes and publishes `funded`.
///
/// The txid is computed from the finalized bytes, which are exactly the bytes handed to
/// the backend for broadcast. If any step fails the leases in `funded.reserved` are
/// released, unless the backend may have accepted the transaction anyway.
pub async fn finalize_and_publish<B: WalletBackend + ?Sized>(
    backend: &B,
    funded: FundedPsbt,
    label: &str,
    paid: PaidAmount,
) -> FundingResult<SentResult> {
    let FundedPsbt { psbt, reserved } = funded;

    let result = finalize_then_publish(backend, psbt, label, paid).await;

    match &result {
        Ok(sent) => {
            info!(txid = %sent.txid, amount = %sent.amount, %label, "published transaction");
        }
        Err(err @ FundingError::BroadcastAmbiguous { .. }) => {
            let inputs = reserved.len();
            warn!(%err, %inputs, "publication outcome unknown, keeping inputs leased");
        }
        Err(err) => {
            warn!(%err, inputs = reserved.len(), "publication failed, releasing inputs");
            OutpointLocks::new(backend).release_locked(&reserved).await;
        }
    }
    result
}

async fn finalize_then_publish<B: WalletBackend + ?Sized>(
    backend: &B,
    psbt: Vec<u8>,
    label: &str,
    paid: PaidAmount,
) -> FundingResult<SentResult> {
    let raw = backend
        .finalize_psbt(psbt)
        .await
        .map_err(FundingError::Finalize)?;
    let tx: Transaction =
        deserialize(&raw).map_err(|e| FundingError::InvalidTransaction(e.to_string()))?;
    let txid = tx.compute_txid();

    let amount = match paid {
        PaidAmount::Requested(amount) => amount,
        PaidAmount::FirstOutput => tx
            .output
            .first()
            .map(|o| o.value)
            .ok_or_else(|| FundingError::InvalidTransaction(format!("{txid} has no outputs")))?,
    };

    backend
        .publish_transaction(raw.clone(), label.to_owned())
        .await
        .map_err(|source| {
            if source.is_ambiguous() {
                FundingError::BroadcastAmbiguous { txid, source }
            } else {
                FundingError::Broadcast { txid, source }
            }
        })?;

    Ok(SentResult {
        raw_hex: hex::encode(&raw),
        txid,
        amount,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bitcoin::FeeRate;

    use super::*;
    use crate::{
        backend::BackendError,
        psbt::{parse_address, PsbtBuilder},
        test_utils::*,
    };

    async fn funded_sweep(wallet: &FakeWallet, sats: u64) -> FundedPsbt {
        let op = wallet.add_utxo(sats, 3);
        let dest = parse_address(&destination_address(), TEST_NETWORK).unwrap();
        PsbtBuilder::new(wallet, TEST_NETWORK, Duration::from_secs(10))
            .fund_sweep(&dest, &[op], FeeRate::from_sat_per_vb_unchecked(2))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_txid_is_hash_of_published_bytes() {
        let wallet = FakeWallet::new();
        let funded = funded_sweep(&wallet, 80_000).await;

        let sent = finalize_and_publish(&wallet, funded, "peg-in", PaidAmount::FirstOutput)
            .await
            .unwrap();

        let published = wallet.published();
        assert_eq!(published.len(), 1);
        assert_eq!(hex::encode(&published[0]), sent.raw_hex);
        let tx: Transaction = deserialize(&published[0]).unwrap();
        assert_eq!(tx.compute_txid(), sent.txid);
        assert_eq!(tx.output[0].value, sent.amount);
    }

    #[tokio::test]
    async fn test_publish_failure_releases_leases() {
        let wallet = FakeWallet::new();
        let funded = funded_sweep(&wallet, 80_000).await;
        let held = funded.reserved[0].outpoint;
        wallet.reject_publish("min relay fee not met");

        let err = finalize_and_publish(&wallet, funded, "peg-in", PaidAmount::FirstOutput)
            .await
            .expect_err("publish rejected");

        assert!(matches!(err, FundingError::Broadcast { source: BackendError::Rejected(_), .. }));
        assert_eq!(wallet.lease_of(&held), None);
        assert!(wallet.is_unspent(&held));
    }

    #[tokio::test]
    async fn test_publish_timeout_keeps_leases() {
        let wallet = FakeWallet::new();
        let funded = funded_sweep(&wallet, 80_000).await;
        let held = funded.reserved[0];
        wallet.time_out_publish();

        let err = finalize_and_publish(&wallet, funded, "peg-in", PaidAmount::FirstOutput)
            .await
            .expect_err("publish timed out");

        let published: Transaction = deserialize(&wallet.published()[0]).unwrap();
        assert_eq!(err.ambiguous_broadcast(), Some(published.compute_txid()));
        assert_eq!(wallet.lease_of(&held.outpoint), Some(held.lock));
    }

    #[tokio::test]
    async fn test_finalize_failure_releases_leases() {
        let wallet = FakeWallet::new();
        let funded = funded_sweep(&wallet, 80_000).await;
        let held = funded.reserved[0].outpoint;
        wallet.reject_finalize("signer unavailable");

        let paid = PaidAmount::Requested(Amount::ONE_SAT);
        let err = finalize_and_publish(&wallet, funded, "peg-in", paid)
            .await
            .expect_err("finalize rejected");

        assert!(matches!(err, FundingError::Finalize(_)));
        assert_eq!(wallet.lease_of(&held), None);
        assert!(wallet.published().is_empty());
    }

    #[tokio::test]
    async fn test_success_keeps_leases() {
        let wallet = FakeWallet::new();
        let funded = funded_sweep(&wallet, 80_000).await;
        let held = funded.reserved[0];

        let sent = finalize_and_publish(&wallet, funded, "peg-in", PaidAmount::FirstOutput)
            .await
            .unwrap();

        assert_eq!(wallet.published().len(), 1);
        assert!(wallet.removed().iter().all(|t| *t != sent.txid));
        assert_eq!(wallet.lease_of(&held.outpoint), Some(held.lock));
    }
}
