//! [`WalletBackend`] over the LND wallet kit.

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use bitcoin::{Amount, FeeRate, OutPoint, Txid};
use pegin_funding::{
    parse_outpoint, BackendError, FundingTemplate, LockId, PreviousOutpoint, TxOutputDetail,
    UnspentOutput, WalletBackend, WalletTransaction,
};
use tracing::*;

use crate::{
    client::LndClient,
    errors::LndError,
    wire::{
        decode_bytes, encode_bytes, BumpFeeRequest, FinalizePsbtRequest, FinalizePsbtResponse,
        FundPsbtRequest, FundPsbtResponse, GetInfoResponse, LeaseOutputRequest,
        ListUnspentRequest, ListUnspentResponse, PsbtCoinSelect, PublishRequest, PublishResponse,
        ReleaseOutputRequest, RemoveTransactionRequest, RpcTransaction, StatusResponse,
        TransactionsResponse, TxTemplate, Utxo, CHANGE_TYPE_P2TR, REMOVED_STATUS,
    },
};

fn decode(field: &'static str, s: &str) -> Result<Vec<u8>, LndError> {
    decode_bytes(s).map_err(|e| LndError::Decode(format!("{field}: {e}")))
}

fn malformed(what: impl fmt::Display) -> BackendError {
    BackendError::Malformed(what.to_string())
}

fn to_unspent(u: Utxo) -> Result<UnspentOutput, BackendError> {
    let txid = Txid::from_str(&u.outpoint.txid_str).map_err(malformed)?;
    Ok(UnspentOutput {
        address: u.address,
        amount: Amount::from_sat(u64::try_from(u.amount_sat).map_err(malformed)?),
        confirmations: u32::try_from(u.confirmations).unwrap_or(0),
        outpoint: OutPoint {
            txid,
            vout: u.outpoint.output_index,
        },
    })
}

fn to_wallet_tx(tx: RpcTransaction) -> Result<WalletTransaction, BackendError> {
    let outputs = tx
        .output_details
        .into_iter()
        .map(|o| {
            Ok(TxOutputDetail {
                index: u32::try_from(o.output_index).map_err(malformed)?,
                address: o.address,
                amount: Amount::from_sat(u64::try_from(o.amount).map_err(malformed)?),
                is_ours: o.is_our_address,
            })
        })
        .collect::<Result<Vec<_>, BackendError>>()?;
    let previous_outpoints = tx
        .previous_outpoints
        .into_iter()
        .map(|p| {
            Ok(PreviousOutpoint {
                outpoint: parse_outpoint(&p.outpoint).map_err(malformed)?,
                is_ours: p.is_our_output,
            })
        })
        .collect::<Result<Vec<_>, BackendError>>()?;

    Ok(WalletTransaction {
        txid: Txid::from_str(&tx.tx_hash).map_err(malformed)?,
        confirmations: u32::try_from(tx.num_confirmations).unwrap_or(0),
        outputs,
        previous_outpoints,
        raw_hex: tx.raw_tx_hex,
    })
}

fn fund_request(template: FundingTemplate, fee_rate: FeeRate) -> FundPsbtRequest {
    let (raw, coin_select) = match template {
        FundingTemplate::Outputs { inputs, outputs } => (
            Some(TxTemplate {
                inputs: inputs.into_iter().map(Into::into).collect(),
                outputs: outputs
                    .into_iter()
                    .map(|(addr, amt)| (addr, amt.to_sat()))
                    .collect(),
            }),
            None,
        ),
        FundingTemplate::CoinSelect { psbt, change_index } => (
            None,
            Some(PsbtCoinSelect {
                psbt: encode_bytes(&psbt),
                existing_output_index: change_index as i32,
            }),
        ),
    };
    FundPsbtRequest {
        raw,
        coin_select,
        sat_per_vbyte: fee_rate.to_sat_per_vb_ceil(),
        min_confs: 1,
        spend_unconfirmed: false,
        change_type: CHANGE_TYPE_P2TR,
    }
}

#[async_trait]
impl WalletBackend for LndClient {
    async fn list_unspent(
        &self,
        min_confirmations: u32,
    ) -> Result<Vec<UnspentOutput>, BackendError> {
        let req = ListUnspentRequest {
            min_confs: i32::try_from(min_confirmations).unwrap_or(i32::MAX),
            max_confs: i32::MAX,
        };
        let resp: ListUnspentResponse = self.post("/v2/wallet/utxos", &req).await?;
        resp.utxos.into_iter().map(to_unspent).collect()
    }

    async fn lease_output(
        &self,
        lock: LockId,
        outpoint: OutPoint,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        let req = LeaseOutputRequest {
            id: encode_bytes(lock.as_bytes()),
            outpoint: outpoint.into(),
            expiration_seconds: ttl.as_secs(),
        };
        let _: serde_json::Value = self.post("/v2/wallet/utxos/lease", &req).await?;
        Ok(())
    }

    async fn release_output(&self, lock: LockId, outpoint: OutPoint) -> Result<(), BackendError> {
        let req = ReleaseOutputRequest {
            id: encode_bytes(lock.as_bytes()),
            outpoint: outpoint.into(),
        };
        let _: serde_json::Value = self.post("/v2/wallet/utxos/release", &req).await?;
        Ok(())
    }

    async fn fund_psbt(
        &self,
        template: FundingTemplate,
        fee_rate: FeeRate,
    ) -> Result<Vec<u8>, BackendError> {
        let req = fund_request(template, fee_rate);
        let resp: FundPsbtResponse = self.post("/v2/wallet/psbt/fund", &req).await?;
        Ok(decode("funded_psbt", &resp.funded_psbt)?)
    }

    async fn finalize_psbt(&self, psbt: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let req = FinalizePsbtRequest {
            funded_psbt: encode_bytes(&psbt),
        };
        let resp: FinalizePsbtResponse = self
            .post_untimed("/v2/wallet/psbt/finalize", &req)
            .await?;
        Ok(decode("raw_final_tx", &resp.raw_final_tx)?)
    }

    async fn publish_transaction(
        &self,
        raw_tx: Vec<u8>,
        label: String,
    ) -> Result<(), BackendError> {
        let req = PublishRequest {
            tx_hex: encode_bytes(&raw_tx),
            label,
        };
        let resp: PublishResponse = self.post_untimed("/v2/wallet/tx", &req).await?;
        if resp.publish_error.is_empty() {
            Ok(())
        } else {
            Err(BackendError::Rejected(resp.publish_error))
        }
    }

    async fn get_transaction(
        &self,
        txid: Txid,
    ) -> Result<Option<WalletTransaction>, BackendError> {
        // The gateway has no single-transaction lookup for the main wallet.
        let resp: TransactionsResponse = self.get("/v1/transactions").await?;
        let wanted = txid.to_string();
        resp.transactions
            .into_iter()
            .find(|t| t.tx_hash == wanted)
            .map(to_wallet_tx)
            .transpose()
    }

    async fn remove_transaction(&self, txid: Txid) -> Result<(), BackendError> {
        let req = RemoveTransactionRequest {
            txid: txid.to_string(),
        };
        let resp: StatusResponse = self.post("/v2/wallet/removetx", &req).await?;
        if resp.status == REMOVED_STATUS {
            Ok(())
        } else {
            warn!(%txid, status = %resp.status, "lnd did not remove transaction");
            Err(BackendError::Rejected(resp.status))
        }
    }

    async fn bump_fee(&self, outpoint: OutPoint, fee_rate: FeeRate) -> Result<(), BackendError> {
        let req = BumpFeeRequest {
            outpoint: outpoint.into(),
            sat_per_vbyte: fee_rate.to_sat_per_vb_ceil(),
        };
        let resp: StatusResponse = self.post("/v2/wallet/bumpfee", &req).await?;
        debug!(%outpoint, status = %resp.status, "bumpfee accepted");
        Ok(())
    }

    async fn version(&self) -> Result<String, BackendError> {
        let info: GetInfoResponse = self.get("/v1/getinfo").await?;
        Ok(info.version)
    }
}
