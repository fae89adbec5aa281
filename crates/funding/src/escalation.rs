//! Fee escalation for stuck transactions.
//!
//! A backend that can fund sweeps gets the transaction replaced: the original is dropped
//! from the wallet, its inputs are freed and the same payment is rebuilt at the higher
//! rate. Older backends get a child spending our change output instead, which leaves the
//! original txid untouched.

use bitcoin::{Amount, FeeRate, OutPoint, Txid};
use tracing::*;

use crate::{
    backend::WalletBackend,
    errors::{FundingError, FundingResult},
    locks::OutpointLocks,
    sender::SendPipeline,
    types::{SendRequest, SentResult, WalletTransaction},
};

/// What to bump and how the original payment looked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BumpRequest {
    pub txid: Txid,
    /// Destination of the original payment.
    pub destination: String,
    /// Amount originally requested.
    pub amount: Amount,
    pub fee_rate: FeeRate,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BumpOutcome {
    /// The transaction was replaced. The old txid is gone.
    Replaced(SentResult),
    /// A child spending `change` was requested. The parent keeps its txid.
    ChildAttached { parent: Txid, change: OutPoint },
}

impl BumpOutcome {
    /// Txid that now represents the payment.
    pub fn payment_txid(&self) -> Txid {
        match self {
            BumpOutcome::Replaced(sent) => sent.txid,
            BumpOutcome::ChildAttached { parent, .. } => *parent,
        }
    }
}

#[derive(Debug)]
pub(crate) struct FeeEscalator<'a, B: ?Sized> {
    pipeline: SendPipeline<'a, B>,
}

impl<'a, B: WalletBackend + ?Sized> FeeEscalator<'a, B> {
    pub(crate) fn new(pipeline: SendPipeline<'a, B>) -> Self {
        Self { pipeline }
    }

    pub(crate) async fn bump(&self, req: &BumpRequest) -> FundingResult<BumpOutcome> {
        let backend = self.pipeline.backend;
        let tx = backend
            .get_transaction(req.txid)
            .await
            .map_err(FundingError::backend("get_transaction"))?
            .ok_or(FundingError::TxNotFound(req.txid))?;

        if self.pipeline.capability.supports_rbf_sweep(backend).await {
            self.replace(req, tx).await
        } else {
            self.attach_child(req, &tx).await
        }
    }

    async fn replace(
        &self,
        req: &BumpRequest,
        tx: WalletTransaction,
    ) -> FundingResult<BumpOutcome> {
        let backend = self.pipeline.backend;
        let inputs = tx.wallet_inputs();
        // A payment without change was a sweep and is rebuilt as one.
        let subtract_fee = !tx.has_change_output();

        backend
            .remove_transaction(req.txid)
            .await
            .map_err(|e| FundingError::RemovalRejected {
                txid: req.txid,
                status: e.to_string(),
            })?;
        info!(txid = %req.txid, inputs = inputs.len(), "removed transaction for replacement");

        // Removal does not always drop the leases the inputs were funded under.
        OutpointLocks::new(backend)
            .release_all_tokens(&inputs)
            .await;

        let rebuilt = self
            .pipeline
            .send(SendRequest {
                address: req.destination.clone(),
                amount: req.amount,
                fee_rate: req.fee_rate,
                outpoints: inputs,
                subtract_fee,
                label: req.label.clone(),
            })
            .await;

        match rebuilt {
            Ok(sent) => {
                info!(old = %req.txid, new = %sent.txid, "replaced transaction");
                Ok(BumpOutcome::Replaced(sent))
            }
            // The replacement may be out there, so the original must not come back.
            Err(err @ FundingError::BroadcastAmbiguous { .. }) => Err(err),
            Err(err) => {
                warn!(txid = %req.txid, %err, "replacement failed, restoring original");
                let restored = self.restore(req, &tx.raw_hex).await;
                Err(FundingError::ReplacementFailed {
                    txid: req.txid,
                    restored,
                    source: Box::new(err),
                })
            }
        }
    }

    /// Publishes the removed original again so its txid stays valid.
    async fn restore(&self, req: &BumpRequest, raw_hex: &str) -> bool {
        let raw = match hex::decode(raw_hex) {
            Ok(raw) => raw,
            Err(err) => {
                error!(txid = %req.txid, %err, "cannot decode original transaction");
                return false;
            }
        };
        match self
            .pipeline
            .backend
            .publish_transaction(raw, req.label.clone())
            .await
        {
            Ok(()) => {
                info!(txid = %req.txid, "original transaction published again");
                true
            }
            Err(err) => {
                let txid = req.txid;
                error!(%txid, %err, %raw_hex, "failed to restore original transaction");
                false
            }
        }
    }

    async fn attach_child(
        &self,
        req: &BumpRequest,
        tx: &WalletTransaction,
    ) -> FundingResult<BumpOutcome> {
        if !tx.has_change_output() {
            return Err(FundingError::NoChangeOutput(req.txid));
        }
        let change = tx
            .outputs
            .iter()
            .find(|o| o.address != req.destination)
            .ok_or(FundingError::NoChangeOutput(req.txid))?;
        let outpoint = OutPoint {
            txid: req.txid,
            vout: change.index,
        };

        self.pipeline
            .backend
            .bump_fee(outpoint, req.fee_rate)
            .await
            .map_err(FundingError::backend("bump_fee"))?;
        info!(
            txid = %req.txid,
            change = %outpoint,
            sat_per_vb = req.fee_rate.to_sat_per_vb_ceil(),
            "requested child pays for parent"
        );
        Ok(BumpOutcome::ChildAttached {
            parent: req.txid,
            change: outpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bitcoin::consensus::deserialize;

    use super::*;
    use crate::{
        sender::FundingEngine,
        test_utils::*,
        types::{ConfirmationStatus, LockId},
    };

    fn send_request(amount: u64, outpoints: Vec<OutPoint>, subtract_fee: bool) -> SendRequest {
        SendRequest {
            address: destination_address(),
            amount: Amount::from_sat(amount),
            fee_rate: FeeRate::from_sat_per_vb_unchecked(2),
            outpoints,
            subtract_fee,
            label: "Liquid Peg-in".into(),
        }
    }

    fn bump_request(txid: Txid, amount: u64, sat_vb: u64) -> BumpRequest {
        BumpRequest {
            txid,
            destination: destination_address(),
            amount: Amount::from_sat(amount),
            fee_rate: FeeRate::from_sat_per_vb_unchecked(sat_vb),
            label: "Liquid Peg-in".into(),
        }
    }

    #[tokio::test]
    async fn test_rbf_replaces_sweep() {
        let wallet = FakeWallet::new();
        let op = wallet.add_utxo(600_000, 3);
        let engine = FundingEngine::new(Arc::new(wallet), TEST_NETWORK);

        let first = engine
            .send(send_request(600_000, vec![op], true))
            .await
            .unwrap();
        let outcome = engine
            .bump(bump_request(first.txid, 600_000, 9))
            .await
            .unwrap();

        let BumpOutcome::Replaced(second) = outcome else {
            panic!("capable backend must replace");
        };
        assert_ne!(first.txid, second.txid);
        assert!(second.amount < first.amount, "higher rate, smaller sweep");
        assert_eq!(
            engine.confirmations(first.txid).await.unwrap(),
            ConfirmationStatus::Unknown,
            "old txid must no longer be known"
        );
        assert!(matches!(
            engine.confirmations(second.txid).await.unwrap(),
            ConfirmationStatus::Seen { confirmations: 0, .. }
        ));

        let wallet = engine.backend();
        assert_eq!(wallet.removed(), vec![first.txid]);
        let published = wallet.published();
        assert_eq!(published.len(), 2);
        let replacement: bitcoin::Transaction = deserialize(&published[1]).unwrap();
        assert_eq!(replacement.compute_txid(), second.txid);
        assert_eq!(replacement.input[0].previous_output, op);
        assert_eq!(wallet.lease_of(&op), Some(LockId::Explicit));
    }

    #[tokio::test]
    async fn test_failed_rebuild_restores_original() {
        let wallet = FakeWallet::new();
        let op = wallet.add_utxo(600_000, 3);
        let engine = FundingEngine::new(Arc::new(wallet), TEST_NETWORK);

        let first = engine
            .send(send_request(600_000, vec![op], true))
            .await
            .unwrap();
        let err = engine
            .bump(bump_request(first.txid, 600_000, 10_000))
            .await
            .expect_err("fee exceeds the sweep");

        assert!(matches!(
            err,
            FundingError::ReplacementFailed { txid, restored: true, .. } if txid == first.txid
        ));
        assert!(matches!(
            engine.confirmations(first.txid).await.unwrap(),
            ConfirmationStatus::Seen { confirmations: 0, .. }
        ));
        let wallet = engine.backend();
        assert_eq!(wallet.removed(), vec![first.txid]);
        let published = wallet.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], published[1], "original bytes are republished");
        assert!(!wallet.is_unspent(&op));
    }

    #[tokio::test]
    async fn test_ambiguous_replacement_is_not_rolled_back() {
        let wallet = FakeWallet::new();
        let op = wallet.add_utxo(600_000, 3);
        let engine = FundingEngine::new(Arc::new(wallet), TEST_NETWORK);

        let first = engine
            .send(send_request(600_000, vec![op], true))
            .await
            .unwrap();
        engine.backend().time_out_publish();
        let err = engine
            .bump(bump_request(first.txid, 600_000, 9))
            .await
            .expect_err("publish timed out");

        let replacement: bitcoin::Transaction =
            deserialize(&engine.backend().published()[1]).unwrap();
        assert_eq!(err.ambiguous_broadcast(), Some(replacement.compute_txid()));
        assert_eq!(engine.backend().published().len(), 2);
        assert_eq!(
            engine.confirmations(first.txid).await.unwrap(),
            ConfirmationStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_rbf_keeps_change_for_direct_payment() {
        let wallet = FakeWallet::new();
        let op = wallet.add_utxo(900_000, 3);
        let engine = FundingEngine::new(Arc::new(wallet), TEST_NETWORK);

        let first = engine
            .send(send_request(300_000, vec![op], false))
            .await
            .unwrap();
        let outcome = engine
            .bump(bump_request(first.txid, 300_000, 6))
            .await
            .unwrap();

        let BumpOutcome::Replaced(second) = outcome else {
            panic!("expected replacement");
        };
        assert_eq!(second.amount, Amount::from_sat(300_000));
        let tx: bitcoin::Transaction = deserialize(&engine.backend().published()[1]).unwrap();
        assert_eq!(tx.output.len(), 2, "replacement keeps its change output");
    }

    #[tokio::test]
    async fn test_cpfp_on_legacy_backend() {
        let wallet = FakeWallet::new().with_version(LEGACY_VERSION);
        let op = wallet.add_utxo(900_000, 3);
        let engine = FundingEngine::new(Arc::new(wallet), TEST_NETWORK);

        let first = engine
            .send(send_request(300_000, vec![op], false))
            .await
            .unwrap();
        let outcome = engine
            .bump(bump_request(first.txid, 300_000, 20))
            .await
            .unwrap();

        assert_eq!(outcome.payment_txid(), first.txid, "CPFP keeps the parent txid");
        let BumpOutcome::ChildAttached { change, .. } = outcome else {
            panic!("legacy backend must attach a child");
        };
        let tx = engine
            .backend()
            .get_transaction(first.txid)
            .await
            .unwrap()
            .unwrap();
        let change_out = &tx.outputs[change.vout as usize];
        assert_ne!(change_out.address, destination_address());
        assert!(change_out.is_ours);
        assert_eq!(
            engine.backend().cpfp_requests(),
            vec![(change, FeeRate::from_sat_per_vb_unchecked(20))]
        );
        assert!(engine.backend().removed().is_empty());
    }

    #[tokio::test]
    async fn test_cpfp_without_change_fails() {
        let wallet = FakeWallet::new()
            .with_version(LEGACY_VERSION)
            .with_fee_slack(0);
        let op = wallet.add_utxo(200_000, 3);
        let engine = FundingEngine::new(Arc::new(wallet), TEST_NETWORK);

        let first = engine
            .send(send_request(200_000, vec![op], true))
            .await
            .unwrap();
        let err = engine
            .bump(bump_request(first.txid, 200_000, 10))
            .await
            .expect_err("nothing to spend");

        assert!(matches!(err, FundingError::NoChangeOutput(t) if t == first.txid));
        assert!(engine.backend().cpfp_requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_txid() {
        let engine = FundingEngine::new(Arc::new(FakeWallet::new()), TEST_NETWORK);
        let txid = dummy_outpoint(4).txid;
        let err = engine
            .bump(bump_request(txid, 1_000, 5))
            .await
            .expect_err("unknown tx");
        assert!(matches!(err, FundingError::TxNotFound(t) if t == txid));
    }

    #[tokio::test]
    async fn test_confirmed_tx_cannot_be_replaced() {
        let wallet = FakeWallet::new();
        let op = wallet.add_utxo(600_000, 3);
        let engine = FundingEngine::new(Arc::new(wallet), TEST_NETWORK);

        let first = engine
            .send(send_request(600_000, vec![op], true))
            .await
            .unwrap();
        engine.backend().confirm(first.txid, 1);

        let err = engine
            .bump(bump_request(first.txid, 600_000, 9))
            .await
            .expect_err("already mined");
        assert!(matches!(err, FundingError::RemovalRejected { .. }));
        assert_eq!(engine.backend().published().len(), 1);
    }
}
