//! In-memory wallet backend for tests.
//!
//! [`FakeWallet`] keeps a lease table, a UTXO set and a transaction history and charges
//! fees from the virtual size of the transaction it will later "sign", so amounts computed
//! by the pipeline can be checked against the bytes that get published.

use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
    time::Duration,
};

use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    address::NetworkUnchecked,
    consensus::{deserialize, encode::serialize_hex, serialize},
    hashes::Hash,
    transaction::Version,
    Address, Amount, FeeRate, Network, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, WPubkeyHash, WScriptHash, Witness,
};
use parking_lot::Mutex;

use crate::{
    backend::{BackendError, WalletBackend},
    types::{
        FundingTemplate, LockId, PreviousOutpoint, TxOutputDetail, UnspentOutput,
        WalletTransaction,
    },
};

/// Network all fake addresses are encoded for.
pub const TEST_NETWORK: Network = Network::Regtest;

/// Smallest change output the fake backend will create.
pub const FAKE_DUST_LIMIT: u64 = 330;

/// Version string of a backend that supports coin-select templates.
pub const RBF_CAPABLE_VERSION: &str = "0.18.3-beta commit=v0.18.3-beta";

/// Version string of a backend that does not.
pub const LEGACY_VERSION: &str = "0.17.5-beta commit=v0.17.5-beta";

/// Builds a deterministic outpoint that the fake wallet does not know about.
pub fn dummy_outpoint(n: u8) -> OutPoint {
    OutPoint {
        txid: Txid::from_byte_array([n; 32]),
        vout: n as u32,
    }
}

/// A P2WSH address outside the wallet, used as peg-in destination.
pub fn destination_address() -> String {
    let script = ScriptBuf::new_p2wsh(&WScriptHash::from_byte_array([0x42; 32]));
    Address::from_script(&script, TEST_NETWORK)
        .expect("p2wsh is a standard script")
        .to_string()
}

#[derive(Debug, Clone)]
struct FakeUtxo {
    amount: Amount,
    confirmations: u32,
    script: ScriptBuf,
}

#[derive(Debug, Clone)]
struct FakeTx {
    tx: Transaction,
    confirmations: u32,
    spent: Vec<(OutPoint, FakeUtxo)>,
}

#[derive(Debug)]
struct FakeState {
    counter: u64,
    version: String,
    receive_script: ScriptBuf,
    change_script: ScriptBuf,
    utxos: BTreeMap<OutPoint, FakeUtxo>,
    leases: BTreeMap<OutPoint, LockId>,
    txs: BTreeMap<Txid, FakeTx>,
    fee_slack: u64,
    reject_publish: Option<String>,
    time_out_publish: bool,
    reject_finalize: Option<String>,
    fund_calls: Vec<FundingTemplate>,
    published: Vec<Vec<u8>>,
    cpfp_requests: Vec<(OutPoint, FeeRate)>,
    removed: Vec<Txid>,
}

/// Wallet backend that lives entirely in memory.
#[derive(Debug)]
pub struct FakeWallet {
    state: Mutex<FakeState>,
}

impl Default for FakeWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWallet {
    pub fn new() -> Self {
        let receive_script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([0x11; 20]));
        // OP_1 <32 bytes>: a taproot output, the change type the pipeline asks for.
        let mut p2tr = vec![0x51, 0x20];
        p2tr.extend_from_slice(&[0x22; 32]);
        let change_script = ScriptBuf::from_bytes(p2tr);

        Self {
            state: Mutex::new(FakeState {
                counter: 0,
                version: RBF_CAPABLE_VERSION.to_owned(),
                receive_script,
                change_script,
                utxos: BTreeMap::new(),
                leases: BTreeMap::new(),
                txs: BTreeMap::new(),
                fee_slack: 0,
                reject_publish: None,
                time_out_publish: false,
                reject_finalize: None,
                fund_calls: Vec::new(),
                published: Vec::new(),
                cpfp_requests: Vec::new(),
                removed: Vec::new(),
            }),
        }
    }

    pub fn with_version(self, version: &str) -> Self {
        self.state.lock().version = version.to_owned();
        self
    }

    /// Makes funding without change fail unless `slack` sats beyond the estimated fee are
    /// left over, the way a backend that underestimates witness sizes behaves.
    pub fn with_fee_slack(self, slack: u64) -> Self {
        self.state.lock().fee_slack = slack;
        self
    }

    pub fn reject_publish(&self, reason: &str) {
        self.state.lock().reject_publish = Some(reason.to_owned());
    }

    /// Makes publishing accept the transaction but report a timeout to the caller.
    pub fn time_out_publish(&self) {
        self.state.lock().time_out_publish = true;
    }

    pub fn reject_finalize(&self, reason: &str) {
        self.state.lock().reject_finalize = Some(reason.to_owned());
    }

    /// Adds a wallet output paying to the receive script.
    pub fn add_utxo(&self, amount_sat: u64, confirmations: u32) -> OutPoint {
        let mut st = self.state.lock();
        let txid = next_txid(&mut st);
        let outpoint = OutPoint { txid, vout: 0 };
        let script = st.receive_script.clone();
        st.utxos.insert(
            outpoint,
            FakeUtxo {
                amount: Amount::from_sat(amount_sat),
                confirmations,
                script,
            },
        );
        outpoint
    }

    /// Sets the confirmation count of a published transaction and its wallet outputs.
    pub fn confirm(&self, txid: Txid, confirmations: u32) {
        let mut st = self.state.lock();
        if let Some(entry) = st.txs.get_mut(&txid) {
            entry.confirmations = confirmations;
        }
        for (op, utxo) in st.utxos.iter_mut() {
            if op.txid == txid {
                utxo.confirmations = confirmations;
            }
        }
    }

    pub fn leases(&self) -> BTreeMap<OutPoint, LockId> {
        self.state.lock().leases.clone()
    }

    pub fn lease_of(&self, outpoint: &OutPoint) -> Option<LockId> {
        self.state.lock().leases.get(outpoint).copied()
    }

    pub fn fund_calls(&self) -> Vec<FundingTemplate> {
        self.state.lock().fund_calls.clone()
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state.lock().published.clone()
    }

    pub fn cpfp_requests(&self) -> Vec<(OutPoint, FeeRate)> {
        self.state.lock().cpfp_requests.clone()
    }

    pub fn removed(&self) -> Vec<Txid> {
        self.state.lock().removed.clone()
    }

    pub fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        self.state.lock().utxos.contains_key(outpoint)
    }

    fn fund_outputs(
        st: &mut FakeState,
        inputs: Vec<OutPoint>,
        outputs: BTreeMap<String, Amount>,
        fee_rate: FeeRate,
    ) -> Result<Psbt, BackendError> {
        let rate = fee_rate.to_sat_per_vb_ceil();
        let mut txouts = Vec::with_capacity(outputs.len() + 1);
        for (addr, amount) in &outputs {
            txouts.push(TxOut {
                value: *amount,
                script_pubkey: parse_script(addr)?,
            });
        }
        let out_total: u64 = txouts.iter().map(|o| o.value.to_sat()).sum();

        let selected = if inputs.is_empty() {
            select_coins(st, &txouts, rate)?
        } else {
            for op in &inputs {
                check_spendable(st, op, None)?;
            }
            inputs
        };

        let sum_in: u64 = selected.iter().map(|op| st.utxos[op].amount.to_sat()).sum();
        let change_out = TxOut {
            value: Amount::ZERO,
            script_pubkey: st.change_script.clone(),
        };

        let mut with_change = txouts.clone();
        with_change.push(change_out);
        let fee_with_change = vsize_of(st, &selected, &with_change) * rate;
        let fee_no_change = vsize_of(st, &selected, &txouts) * rate;

        let final_outs = if sum_in >= out_total + fee_with_change + FAKE_DUST_LIMIT {
            let last = with_change.len() - 1;
            with_change[last].value = Amount::from_sat(sum_in - out_total - fee_with_change);
            with_change
        } else if !txouts.is_empty() && sum_in >= out_total + fee_no_change + st.fee_slack {
            txouts
        } else {
            return Err(BackendError::InsufficientFunds(format!(
                "inputs {sum_in} sat cannot cover outputs {out_total} sat plus fee"
            )));
        };

        for op in &selected {
            st.leases.insert(*op, LockId::Implicit);
        }
        build_psbt(st, &selected, final_outs)
    }

    fn fund_coin_select(
        st: &mut FakeState,
        psbt: Vec<u8>,
        change_index: u32,
        fee_rate: FeeRate,
    ) -> Result<Psbt, BackendError> {
        let rate = fee_rate.to_sat_per_vb_ceil();
        let template =
            Psbt::deserialize(&psbt).map_err(|e| BackendError::Rejected(e.to_string()))?;
        let inputs: Vec<OutPoint> = template
            .unsigned_tx
            .input
            .iter()
            .map(|i| i.previous_output)
            .collect();
        for op in &inputs {
            check_spendable(st, op, Some(LockId::Explicit))?;
        }

        let mut outputs = template.unsigned_tx.output.clone();
        let idx = change_index as usize;
        if idx >= outputs.len() {
            return Err(BackendError::Rejected(format!(
                "change index {change_index} out of range"
            )));
        }

        let sum_in: u64 = inputs.iter().map(|op| st.utxos[op].amount.to_sat()).sum();
        let others: u64 = outputs
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != idx)
            .map(|(_, o)| o.value.to_sat())
            .sum();
        let fee = vsize_of(st, &inputs, &outputs) * rate;
        let change = sum_in
            .checked_sub(others + fee)
            .filter(|c| *c >= FAKE_DUST_LIMIT)
            .ok_or_else(|| {
                BackendError::InsufficientFunds(format!(
                    "inputs {sum_in} sat cannot cover fee {fee} sat"
                ))
            })?;
        outputs[idx].value = Amount::from_sat(change);

        build_psbt(st, &inputs, outputs)
    }
}

#[async_trait]
impl WalletBackend for FakeWallet {
    async fn list_unspent(
        &self,
        min_confirmations: u32,
    ) -> Result<Vec<UnspentOutput>, BackendError> {
        let st = self.state.lock();
        Ok(st
            .utxos
            .iter()
            .filter(|(op, u)| u.confirmations >= min_confirmations && !st.leases.contains_key(op))
            .map(|(op, u)| UnspentOutput {
                address: address_of(&u.script),
                amount: u.amount,
                confirmations: u.confirmations,
                outpoint: *op,
            })
            .collect())
    }

    async fn lease_output(
        &self,
        lock: LockId,
        outpoint: OutPoint,
        _ttl: Duration,
    ) -> Result<(), BackendError> {
        let mut st = self.state.lock();
        if !st.utxos.contains_key(&outpoint) {
            return Err(BackendError::UnknownOutput);
        }
        match st.leases.get(&outpoint) {
            Some(held) if *held != lock => Err(BackendError::AlreadyLocked),
            _ => {
                st.leases.insert(outpoint, lock);
                Ok(())
            }
        }
    }

    async fn release_output(&self, lock: LockId, outpoint: OutPoint) -> Result<(), BackendError> {
        let mut st = self.state.lock();
        match st.leases.get(&outpoint) {
            None => Err(BackendError::NotLocked),
            Some(held) if *held != lock => Err(BackendError::Rejected(
                "output is leased under a different id".into(),
            )),
            Some(_) => {
                st.leases.remove(&outpoint);
                Ok(())
            }
        }
    }

    async fn fund_psbt(
        &self,
        template: FundingTemplate,
        fee_rate: FeeRate,
    ) -> Result<Vec<u8>, BackendError> {
        let mut st = self.state.lock();
        st.fund_calls.push(template.clone());
        let psbt = match template {
            FundingTemplate::Outputs { inputs, outputs } => {
                Self::fund_outputs(&mut st, inputs, outputs, fee_rate)?
            }
            FundingTemplate::CoinSelect { psbt, change_index } => {
                Self::fund_coin_select(&mut st, psbt, change_index, fee_rate)?
            }
        };
        Ok(psbt.serialize())
    }

    async fn finalize_psbt(&self, psbt: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let st = self.state.lock();
        if let Some(reason) = &st.reject_finalize {
            return Err(BackendError::Rejected(reason.clone()));
        }
        let psbt = Psbt::deserialize(&psbt).map_err(|e| BackendError::Rejected(e.to_string()))?;
        let inputs: Vec<OutPoint> = psbt
            .unsigned_tx
            .input
            .iter()
            .map(|i| i.previous_output)
            .collect();
        for op in &inputs {
            if !st.utxos.contains_key(op) {
                return Err(BackendError::Rejected(format!("cannot sign for {op}")));
            }
        }
        let signed = signed_tx(&st, &inputs, psbt.unsigned_tx.output.clone());
        Ok(serialize(&signed))
    }

    async fn publish_transaction(
        &self,
        raw_tx: Vec<u8>,
        _label: String,
    ) -> Result<(), BackendError> {
        let mut st = self.state.lock();
        if let Some(reason) = &st.reject_publish {
            return Err(BackendError::Rejected(reason.clone()));
        }
        let tx: Transaction =
            deserialize(&raw_tx).map_err(|e| BackendError::Rejected(e.to_string()))?;
        for input in &tx.input {
            if !st.utxos.contains_key(&input.previous_output) {
                return Err(BackendError::Rejected(format!(
                    "input {} already spent",
                    input.previous_output
                )));
            }
        }

        let txid = tx.compute_txid();
        let spent = tx
            .input
            .iter()
            .filter_map(|i| {
                st.utxos
                    .remove(&i.previous_output)
                    .map(|u| (i.previous_output, u))
            })
            .collect();
        for (vout, out) in tx.output.iter().enumerate() {
            if out.script_pubkey == st.receive_script || out.script_pubkey == st.change_script {
                st.utxos.insert(
                    OutPoint {
                        txid,
                        vout: vout as u32,
                    },
                    FakeUtxo {
                        amount: out.value,
                        confirmations: 0,
                        script: out.script_pubkey.clone(),
                    },
                );
            }
        }
        st.txs.insert(
            txid,
            FakeTx {
                tx,
                confirmations: 0,
                spent,
            },
        );
        st.published.push(raw_tx);
        if st.time_out_publish {
            return Err(BackendError::Timeout);
        }
        Ok(())
    }

    async fn get_transaction(
        &self,
        txid: Txid,
    ) -> Result<Option<WalletTransaction>, BackendError> {
        let st = self.state.lock();
        let Some(entry) = st.txs.get(&txid) else {
            return Ok(None);
        };
        let outputs = entry
            .tx
            .output
            .iter()
            .enumerate()
            .map(|(i, o)| TxOutputDetail {
                index: i as u32,
                address: address_of(&o.script_pubkey),
                amount: o.value,
                is_ours: o.script_pubkey == st.receive_script
                    || o.script_pubkey == st.change_script,
            })
            .collect();
        let previous_outpoints = entry
            .tx
            .input
            .iter()
            .map(|i| PreviousOutpoint {
                outpoint: i.previous_output,
                is_ours: entry.spent.iter().any(|(op, _)| *op == i.previous_output),
            })
            .collect();
        Ok(Some(WalletTransaction {
            txid,
            confirmations: entry.confirmations,
            outputs,
            previous_outpoints,
            raw_hex: serialize_hex(&entry.tx),
        }))
    }

    async fn remove_transaction(&self, txid: Txid) -> Result<(), BackendError> {
        let mut st = self.state.lock();
        let entry = match st.txs.get(&txid) {
            Some(e) if e.confirmations > 0 => {
                return Err(BackendError::Rejected("transaction already confirmed".into()))
            }
            Some(_) => st.txs.remove(&txid).expect("checked above"),
            None => return Err(BackendError::Rejected("transaction not found".into())),
        };
        st.utxos.retain(|op, _| op.txid != txid);
        for (op, utxo) in entry.spent {
            st.utxos.insert(op, utxo);
        }
        st.removed.push(txid);
        Ok(())
    }

    async fn bump_fee(&self, outpoint: OutPoint, fee_rate: FeeRate) -> Result<(), BackendError> {
        let mut st = self.state.lock();
        let unconfirmed_parent = st
            .txs
            .get(&outpoint.txid)
            .is_some_and(|t| t.confirmations == 0);
        if !unconfirmed_parent || !st.utxos.contains_key(&outpoint) {
            return Err(BackendError::UnknownOutput);
        }
        st.cpfp_requests.push((outpoint, fee_rate));
        Ok(())
    }

    async fn version(&self) -> Result<String, BackendError> {
        Ok(self.state.lock().version.clone())
    }
}

fn next_txid(st: &mut FakeState) -> Txid {
    st.counter += 1;
    let mut bytes = [0xab; 32];
    bytes[..8].copy_from_slice(&st.counter.to_le_bytes());
    Txid::from_byte_array(bytes)
}

fn parse_script(addr: &str) -> Result<ScriptBuf, BackendError> {
    Address::<NetworkUnchecked>::from_str(addr)
        .map(|a| a.assume_checked().script_pubkey())
        .map_err(|e| BackendError::Rejected(format!("invalid address {addr}: {e}")))
}

fn address_of(script: &ScriptBuf) -> String {
    Address::from_script(script, TEST_NETWORK)
        .map(|a| a.to_string())
        .unwrap_or_default()
}

fn check_spendable(
    st: &FakeState,
    op: &OutPoint,
    allowed_lock: Option<LockId>,
) -> Result<(), BackendError> {
    let utxo = st.utxos.get(op).ok_or(BackendError::UnknownOutput)?;
    if utxo.confirmations < 1 {
        return Err(BackendError::Rejected(format!("{op} is unconfirmed")));
    }
    match st.leases.get(op) {
        Some(held) if Some(*held) != allowed_lock => Err(BackendError::AlreadyLocked),
        _ => Ok(()),
    }
}

/// Largest-first selection over unleased confirmed outputs.
fn select_coins(
    st: &FakeState,
    outputs: &[TxOut],
    rate: u64,
) -> Result<Vec<OutPoint>, BackendError> {
    let target: u64 = outputs.iter().map(|o| o.value.to_sat()).sum();
    let mut candidates: Vec<(&OutPoint, &FakeUtxo)> = st
        .utxos
        .iter()
        .filter(|(op, u)| u.confirmations >= 1 && !st.leases.contains_key(op))
        .collect();
    candidates.sort_by(|a, b| b.1.amount.cmp(&a.1.amount));

    let mut selected = Vec::new();
    let mut sum = 0;
    for (op, utxo) in candidates {
        selected.push(*op);
        sum += utxo.amount.to_sat();
        if sum >= target + vsize_of(st, &selected, outputs) * rate {
            return Ok(selected);
        }
    }
    Err(BackendError::InsufficientFunds(format!(
        "wallet holds {sum} sat, need {target} sat plus fee"
    )))
}

fn dummy_witness(script: &ScriptBuf) -> Witness {
    if script.is_p2tr() {
        Witness::from_slice(&[vec![0u8; 64]])
    } else {
        Witness::from_slice(&[vec![0u8; 72], vec![0u8; 33]])
    }
}

fn signed_tx(st: &FakeState, inputs: &[OutPoint], outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|op| TxIn {
                previous_output: *op,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: st
                    .utxos
                    .get(op)
                    .map(|u| dummy_witness(&u.script))
                    .unwrap_or_default(),
            })
            .collect(),
        output: outputs,
    }
}

fn vsize_of(st: &FakeState, inputs: &[OutPoint], outputs: &[TxOut]) -> u64 {
    signed_tx(st, inputs, outputs.to_vec()).vsize() as u64
}

fn build_psbt(
    st: &FakeState,
    inputs: &[OutPoint],
    outputs: Vec<TxOut>,
) -> Result<Psbt, BackendError> {
    let mut unsigned = signed_tx(st, inputs, outputs);
    for input in unsigned.input.iter_mut() {
        input.witness = Witness::new();
    }
    let mut psbt =
        Psbt::from_unsigned_tx(unsigned).map_err(|e| BackendError::Rejected(e.to_string()))?;
    for (psbt_in, op) in psbt.inputs.iter_mut().zip(inputs) {
        let utxo = &st.utxos[op];
        psbt_in.witness_utxo = Some(TxOut {
            value: utxo.amount,
            script_pubkey: utxo.script.clone(),
        });
    }
    Ok(psbt)
}
