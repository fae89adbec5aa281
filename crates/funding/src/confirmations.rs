//! Confirmation depth lookups.

use bitcoin::Txid;
use tracing::*;

use crate::{
    backend::WalletBackend,
    errors::{FundingError, FundingResult},
    types::ConfirmationStatus,
};

#[derive(Debug)]
pub struct ConfirmationTracker<'a, B: ?Sized> {
    backend: &'a B,
}

impl<'a, B: WalletBackend + ?Sized> ConfirmationTracker<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Reports how deep `txid` is buried according to the wallet's history.
    ///
    /// A transaction the wallet has never seen (or has dropped) is
    /// [`ConfirmationStatus::Unknown`], never zero confirmations.
    pub async fn status(&self, txid: Txid) -> FundingResult<ConfirmationStatus> {
        let tx = self
            .backend
            .get_transaction(txid)
            .await
            .map_err(FundingError::backend("get_transaction"))?;

        let status = match tx {
            None => ConfirmationStatus::Unknown,
            Some(tx) => ConfirmationStatus::Seen {
                confirmations: tx.confirmations,
                has_change_output: tx.has_change_output(),
            },
        };
        trace!(%txid, ?status, "checked confirmations");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bitcoin::{consensus::deserialize, Amount, FeeRate, Transaction};

    use super::*;
    use crate::{
        backend::{BackendError, MockWalletBackend},
        test_utils::*,
        types::FundingTemplate,
    };

    #[tokio::test]
    async fn test_unknown_txid() {
        let wallet = FakeWallet::new();
        let status = ConfirmationTracker::new(&wallet)
            .status(dummy_outpoint(3).txid)
            .await
            .unwrap();
        assert_eq!(status, ConfirmationStatus::Unknown);
    }

    #[tokio::test]
    async fn test_tracks_depth_and_change() {
        let wallet = FakeWallet::new();
        let op = wallet.add_utxo(500_000, 6);
        let template = FundingTemplate::Outputs {
            inputs: vec![op],
            outputs: BTreeMap::from([(destination_address(), Amount::from_sat(100_000))]),
        };
        let psbt = wallet
            .fund_psbt(template, FeeRate::from_sat_per_vb_unchecked(1))
            .await
            .unwrap();
        let raw = wallet.finalize_psbt(psbt).await.unwrap();
        let txid = deserialize::<Transaction>(&raw)
            .unwrap()
            .compute_txid();
        wallet.publish_transaction(raw, "test".into()).await.unwrap();

        let tracker = ConfirmationTracker::new(&wallet);
        assert_eq!(
            tracker.status(txid).await.unwrap(),
            ConfirmationStatus::Seen {
                confirmations: 0,
                has_change_output: true
            }
        );

        wallet.confirm(txid, 4);
        assert_eq!(tracker.status(txid).await.unwrap().confirmations(), Some(4));
    }

    #[tokio::test]
    async fn test_backend_error_is_wrapped() {
        let mut backend = MockWalletBackend::new();
        backend
            .expect_get_transaction()
            .returning(|_| Err(BackendError::Transport("timed out".into())));

        let err = ConfirmationTracker::new(&backend)
            .status(dummy_outpoint(1).txid)
            .await
            .expect_err("transport failure");
        assert!(matches!(err, FundingError::Backend { op: "get_transaction", .. }));
    }
}
