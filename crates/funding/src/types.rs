//! Data types shared by the funding pipeline.

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use bitcoin::{Amount, FeeRate, OutPoint, Txid};
use serde::{Deserialize, Serialize};

/// Lease expiration used when outputs are reserved for a hand-assembled sweep.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(10);

/// Minimum confirmations an input needs before it may be spent by a peg-in.
pub const MIN_INPUT_CONFIRMATIONS: u32 = 1;

/// Lock id the backend uses for its own coin selection.
const IMPLICIT_LOCK_ID: [u8; 32] = [
    0xed, 0xe1, 0x9a, 0x92, 0xed, 0x32, 0x1a, 0x47, 0x05, 0xf8, 0xa1, 0xcc, 0xcc, 0x1d, 0x4f, 0x61,
    0x82, 0x54, 0x5d, 0x4b, 0xb4, 0xfa, 0xe0, 0x8b, 0xd5, 0x93, 0x78, 0x31, 0xb7, 0xe3, 0x8f, 0x98,
];

/// Lock id used for leases taken while assembling a sweep by hand.
const EXPLICIT_LOCK_ID: [u8; 32] = [
    0x00, 0xe1, 0x9a, 0x92, 0xed, 0x32, 0x1a, 0x47, 0x05, 0xf8, 0xa1, 0xcc, 0xcc, 0x1d, 0x4f, 0x61,
    0x82, 0x54, 0x5d, 0x4b, 0xb4, 0xfa, 0xe0, 0x8b, 0xd5, 0x93, 0x78, 0x31, 0xb7, 0xe3, 0x8f, 0x98,
];

/// Owner tag of an output lease in the backend's lock table.
///
/// Both variants address the same table, so an output leased under one id cannot be
/// released under the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockId {
    /// Leases the backend takes on its own when it selects coins.
    Implicit,
    /// Leases taken by us when the transaction skeleton is built manually.
    Explicit,
}

impl LockId {
    /// Both ids, in the order they are released during cleanup.
    pub const ALL: [LockId; 2] = [LockId::Implicit, LockId::Explicit];

    /// Raw 32-byte id as understood by the backend.
    pub fn as_bytes(&self) -> &'static [u8; 32] {
        match self {
            LockId::Implicit => &IMPLICIT_LOCK_ID,
            LockId::Explicit => &EXPLICIT_LOCK_ID,
        }
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockId::Implicit => f.write_str("implicit"),
            LockId::Explicit => f.write_str("explicit"),
        }
    }
}

/// An outpoint together with the lock id it is (or will be) leased under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockedOutpoint {
    pub outpoint: OutPoint,
    pub lock: LockId,
}

impl LockedOutpoint {
    pub fn new(outpoint: OutPoint, lock: LockId) -> Self {
        Self { outpoint, lock }
    }
}

/// Snapshot of a wallet output as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub address: String,
    pub amount: Amount,
    pub confirmations: u32,
    pub outpoint: OutPoint,
}

/// Parses a `txid:vout` reference.
pub fn parse_outpoint(s: &str) -> Result<OutPoint, OutpointParseError> {
    let (txid, vout) = s
        .split_once(':')
        .ok_or_else(|| OutpointParseError(s.to_owned()))?;
    let txid = Txid::from_str(txid).map_err(|_| OutpointParseError(s.to_owned()))?;
    let vout = vout
        .parse::<u32>()
        .map_err(|_| OutpointParseError(s.to_owned()))?;
    Ok(OutPoint { txid, vout })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed outpoint '{0}', expected <txid>:<vout>")]
pub struct OutpointParseError(pub String);

/// What the backend is asked to fund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingTemplate {
    /// Plain inputs/outputs template. Empty `inputs` lets the backend select coins, empty
    /// `outputs` sends everything selected back to a change address.
    Outputs {
        inputs: Vec<OutPoint>,
        outputs: BTreeMap<String, Amount>,
    },
    /// A pre-built unsigned PSBT whose output at `change_index` is resized by the backend
    /// to absorb whatever is left after the fee.
    CoinSelect { psbt: Vec<u8>, change_index: u32 },
}

/// One try at getting a template funded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingAttempt {
    pub template: FundingTemplate,
    pub fee_rate: FeeRate,
    pub lock: LockId,
}

impl FundingAttempt {
    /// Outpoints this attempt may have reserved, tagged with the lock it used.
    pub fn reserved(&self, outpoints: &[OutPoint]) -> Vec<LockedOutpoint> {
        outpoints
            .iter()
            .map(|op| LockedOutpoint::new(*op, self.lock))
            .collect()
    }
}

/// Record of a transaction that was accepted for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentResult {
    /// Hex of the exact bytes published. Empty when no new transaction was created.
    pub raw_hex: String,
    pub txid: Txid,
    pub amount: Amount,
}

/// An output of a wallet transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutputDetail {
    pub index: u32,
    pub address: String,
    pub amount: Amount,
    pub is_ours: bool,
}

/// An input of a wallet transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousOutpoint {
    pub outpoint: OutPoint,
    pub is_ours: bool,
}

/// Entry of the backend's local transaction history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTransaction {
    pub txid: Txid,
    pub confirmations: u32,
    pub outputs: Vec<TxOutputDetail>,
    pub previous_outpoints: Vec<PreviousOutpoint>,
    pub raw_hex: String,
}

impl WalletTransaction {
    /// A change output exists when there is more than just the payment output.
    pub fn has_change_output(&self) -> bool {
        self.outputs.len() > 1
    }

    /// Inputs that belong to our wallet.
    pub fn wallet_inputs(&self) -> Vec<OutPoint> {
        self.previous_outpoints
            .iter()
            .filter(|p| p.is_ours)
            .map(|p| p.outpoint)
            .collect()
    }
}

/// Confirmation depth of a transaction as seen by the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// The backend has no record of the transaction.
    Unknown,
    Seen {
        confirmations: u32,
        has_change_output: bool,
    },
}

impl ConfirmationStatus {
    /// Confirmations if the transaction is known.
    pub fn confirmations(&self) -> Option<u32> {
        match self {
            ConfirmationStatus::Unknown => None,
            ConfirmationStatus::Seen { confirmations, .. } => Some(*confirmations),
        }
    }
}

/// A request to move coins out of the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub address: String,
    pub amount: Amount,
    pub fee_rate: FeeRate,
    /// Explicit inputs. Required when `subtract_fee` is set.
    pub outpoints: Vec<OutPoint>,
    /// Pay the fee out of `amount` instead of from a change output.
    pub subtract_fee: bool,
    pub label: String,
}
