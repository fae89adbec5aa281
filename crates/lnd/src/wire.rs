//! JSON bodies of the LND REST gateway.
//!
//! The gateway encodes 64-bit integers as strings and `bytes` fields as base64.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

pub(crate) const CHANGE_TYPE_P2TR: &str = "CHANGE_ADDRESS_TYPE_P2TR";

/// Status `removetx` reports on success.
pub(crate) const REMOVED_STATUS: &str = "Successfully removed transaction";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RpcOutPoint {
    #[serde(default)]
    pub(crate) txid_str: String,
    #[serde(default)]
    pub(crate) output_index: u32,
}

impl From<OutPoint> for RpcOutPoint {
    fn from(op: OutPoint) -> Self {
        Self {
            txid_str: op.txid.to_string(),
            output_index: op.vout,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ListUnspentRequest {
    pub(crate) min_confs: i32,
    pub(crate) max_confs: i32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListUnspentResponse {
    #[serde(default)]
    pub(crate) utxos: Vec<Utxo>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(crate) struct Utxo {
    #[serde(default)]
    pub(crate) address: String,
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) amount_sat: i64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub(crate) confirmations: i64,
    pub(crate) outpoint: RpcOutPoint,
}

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct LeaseOutputRequest {
    pub(crate) id: String,
    pub(crate) outpoint: RpcOutPoint,
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) expiration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReleaseOutputRequest {
    pub(crate) id: String,
    pub(crate) outpoint: RpcOutPoint,
}

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct TxTemplate {
    pub(crate) inputs: Vec<RpcOutPoint>,
    #[serde_as(as = "BTreeMap<_, DisplayFromStr>")]
    pub(crate) outputs: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PsbtCoinSelect {
    pub(crate) psbt: String,
    pub(crate) existing_output_index: i32,
}

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct FundPsbtRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) raw: Option<TxTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) coin_select: Option<PsbtCoinSelect>,
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) sat_per_vbyte: u64,
    pub(crate) min_confs: i32,
    pub(crate) spend_unconfirmed: bool,
    pub(crate) change_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FundPsbtResponse {
    pub(crate) funded_psbt: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct FinalizePsbtRequest {
    pub(crate) funded_psbt: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FinalizePsbtResponse {
    pub(crate) raw_final_tx: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct PublishRequest {
    pub(crate) tx_hex: String,
    pub(crate) label: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishResponse {
    #[serde(default)]
    pub(crate) publish_error: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransactionsResponse {
    #[serde(default)]
    pub(crate) transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcTransaction {
    pub(crate) tx_hash: String,
    #[serde(default)]
    pub(crate) num_confirmations: i32,
    #[serde(default)]
    pub(crate) output_details: Vec<OutputDetail>,
    #[serde(default)]
    pub(crate) previous_outpoints: Vec<PreviousOutPoint>,
    #[serde(default)]
    pub(crate) raw_tx_hex: String,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(crate) struct OutputDetail {
    #[serde(default)]
    pub(crate) address: String,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub(crate) output_index: i64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub(crate) amount: i64,
    #[serde(default)]
    pub(crate) is_our_address: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreviousOutPoint {
    pub(crate) outpoint: String,
    #[serde(default)]
    pub(crate) is_our_output: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct RemoveTransactionRequest {
    pub(crate) txid: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    #[serde(default)]
    pub(crate) status: String,
}

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct BumpFeeRequest {
    pub(crate) outpoint: RpcOutPoint,
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) sat_per_vbyte: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GetInfoResponse {
    pub(crate) version: String,
}

#[serde_as]
#[derive(Debug, Serialize)]
pub(crate) struct ForwardingHistoryRequest {
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) start_time: u64,
    pub(crate) index_offset: u32,
    pub(crate) num_max_events: u32,
    pub(crate) peer_alias_lookup: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ForwardingHistoryResponse {
    #[serde(default)]
    pub(crate) forwarding_events: Vec<RpcForwardingEvent>,
    #[serde(default)]
    pub(crate) last_offset_index: u32,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(crate) struct RpcForwardingEvent {
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) timestamp_ns: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) chan_id_in: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) chan_id_out: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) amt_in: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) amt_out: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) fee_msat: u64,
}

/// Body of a non-2xx gateway response.
#[derive(Debug, Deserialize)]
pub(crate) struct RpcStatus {
    #[serde(default)]
    pub(crate) code: i32,
    #[serde(default)]
    pub(crate) message: String,
}

pub(crate) fn encode_bytes(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub(crate) fn decode_bytes(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(s)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_int64_fields_are_strings() {
        let req = FundPsbtRequest {
            raw: Some(TxTemplate {
                inputs: vec![],
                outputs: BTreeMap::from([("bcrt1qaddr".to_owned(), 150_000)]),
            }),
            coin_select: None,
            sat_per_vbyte: 7,
            min_confs: 1,
            spend_unconfirmed: false,
            change_type: CHANGE_TYPE_P2TR,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "raw": { "inputs": [], "outputs": { "bcrt1qaddr": "150000" } },
                "sat_per_vbyte": "7",
                "min_confs": 1,
                "spend_unconfirmed": false,
                "change_type": "CHANGE_ADDRESS_TYPE_P2TR"
            })
        );
    }

    #[test]
    fn test_transaction_decodes() {
        let body = json!({
            "transactions": [{
                "tx_hash": "4cfbec13cf1510545f285cceceb6229bd7b6a918a8f6eba1dbee64d26226a3b7",
                "amount": "-150000",
                "num_confirmations": 3,
                "output_details": [
                    {
                        "output_type": "SCRIPT_TYPE_WITNESS_V0_SCRIPT_HASH",
                        "address": "bcrt1qpegin",
                        "pk_script": "0020",
                        "output_index": "0",
                        "amount": "150000",
                        "is_our_address": false
                    },
                    {
                        "output_type": "SCRIPT_TYPE_WITNESS_V1_TAPROOT",
                        "address": "bcrt1pchange",
                        "output_index": "1",
                        "amount": "49000",
                        "is_our_address": true
                    }
                ],
                "previous_outpoints": [{
                    "outpoint": "1111111111111111111111111111111111111111111111111111111111111111:2",
                    "is_our_output": true
                }],
                "raw_tx_hex": "0200"
            }]
        });
        let resp: TransactionsResponse = serde_json::from_value(body).unwrap();
        let tx = &resp.transactions[0];
        assert_eq!(tx.num_confirmations, 3);
        assert_eq!(tx.output_details[1].output_index, 1);
        assert_eq!(tx.output_details[1].amount, 49_000);
        assert!(tx.output_details[1].is_our_address);
        assert!(tx.previous_outpoints[0].is_our_output);
    }

    #[test]
    fn test_forwarding_event_decodes() {
        let body = json!({
            "forwarding_events": [{
                "timestamp": "1700000000",
                "chan_id_in": "855429369458409473",
                "chan_id_out": "858571369458409473",
                "amt_in": "100010",
                "amt_out": "100000",
                "fee": "10",
                "fee_msat": "10250",
                "amt_in_msat": "100010250",
                "amt_out_msat": "100000000",
                "timestamp_ns": "1700000000123456789"
            }],
            "last_offset_index": 41
        });
        let resp: ForwardingHistoryResponse = serde_json::from_value(body).unwrap();
        assert_eq!(resp.last_offset_index, 41);
        let e = &resp.forwarding_events[0];
        assert_eq!(e.chan_id_in, 855_429_369_458_409_473);
        assert_eq!(e.fee_msat, 10_250);
        assert_eq!(e.timestamp_ns, 1_700_000_000_123_456_789);
    }
}
