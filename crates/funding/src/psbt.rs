//! Funding template construction.
//!
//! Two shapes are supported. Direct mode hands the backend an address→amount map and lets
//! it pick inputs (or use the ones given) and add change. Sweep mode builds the unsigned
//! transaction here, with a placeholder 1-sat output that the backend grows into
//! "everything minus the fee".

use std::{collections::BTreeMap, str::FromStr, time::Duration};

use bitcoin::{
    absolute::LockTime, address::NetworkUnchecked, transaction::Version, Address, Amount,
    FeeRate, Network, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use tracing::*;

use crate::{
    backend::WalletBackend,
    errors::{FundingError, FundingResult},
    locks::OutpointLocks,
    types::{FundingAttempt, FundingTemplate, LockId, LockedOutpoint, MIN_INPUT_CONFIRMATIONS},
};

/// Value of the placeholder output in a sweep skeleton.
const SWEEP_PLACEHOLDER: Amount = Amount::from_sat(1);

/// Index of the output the backend resizes in sweep mode.
const SWEEP_CHANGE_INDEX: u32 = 0;

/// Parses `address` and checks it belongs to `network`.
pub fn parse_address(address: &str, network: Network) -> FundingResult<Address> {
    let decode_err = |reason: String| FundingError::AddressDecode {
        address: address.to_owned(),
        network,
        reason,
    };
    Address::<NetworkUnchecked>::from_str(address)
        .map_err(|e| decode_err(e.to_string()))?
        .require_network(network)
        .map_err(|e| decode_err(e.to_string()))
}

/// Decodes serialized PSBT bytes.
pub fn decode_psbt(bytes: &[u8]) -> FundingResult<Psbt> {
    Psbt::deserialize(bytes).map_err(|e| FundingError::InvalidPsbt(e.to_string()))
}

/// A PSBT the backend has funded, with the leases held on its inputs.
#[derive(Debug, Clone)]
pub struct FundedPsbt {
    pub psbt: Vec<u8>,
    pub reserved: Vec<LockedOutpoint>,
}

/// Builds and funds templates against a backend.
#[derive(Debug)]
pub struct PsbtBuilder<'a, B: ?Sized> {
    backend: &'a B,
    network: Network,
    lease_ttl: Duration,
}

impl<'a, B: WalletBackend + ?Sized> PsbtBuilder<'a, B> {
    pub fn new(backend: &'a B, network: Network, lease_ttl: Duration) -> Self {
        Self {
            backend,
            network,
            lease_ttl,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub(crate) fn backend(&self) -> &'a B {
        self.backend
    }

    /// Funds `amount` to `address` with change going back to the wallet.
    ///
    /// With an empty `outpoints` the backend selects inputs itself.
    pub async fn fund_direct(
        &self,
        address: &Address,
        amount: Amount,
        outpoints: &[OutPoint],
        fee_rate: FeeRate,
    ) -> FundingResult<FundedPsbt> {
        let outputs = BTreeMap::from([(address.to_string(), amount)]);
        self.fund_outputs(outpoints, outputs, fee_rate).await
    }

    /// Funds a plain inputs/outputs template. The backend leases whatever it spends under
    /// [`LockId::Implicit`]; an empty `outputs` map sends everything to change.
    ///
    /// If the funded PSBT cannot be decoded only the caller's `outpoints` are released.
    /// Inputs the backend picked itself are unknown at that point and stay leased until
    /// the backend's default lease expires.
    pub(crate) async fn fund_outputs(
        &self,
        outpoints: &[OutPoint],
        outputs: BTreeMap<String, Amount>,
        fee_rate: FeeRate,
    ) -> FundingResult<FundedPsbt> {
        let attempt = FundingAttempt {
            template: FundingTemplate::Outputs {
                inputs: outpoints.to_vec(),
                outputs,
            },
            fee_rate,
            lock: LockId::Implicit,
        };
        let psbt = self
            .backend
            .fund_psbt(attempt.template.clone(), fee_rate)
            .await
            .map_err(FundingError::Funding)?;

        let inputs = match decode_psbt(&psbt) {
            Ok(decoded) => input_outpoints(&decoded),
            Err(err) => {
                if outpoints.is_empty() {
                    warn!(%err, "undecodable psbt, backend-selected inputs stay leased");
                }
                OutpointLocks::new(self.backend)
                    .release(outpoints, attempt.lock)
                    .await;
                return Err(err);
            }
        };
        debug!(
            inputs = inputs.len(),
            sat_per_vb = fee_rate.to_sat_per_vb_ceil(),
            "funded output template"
        );

        Ok(FundedPsbt {
            psbt,
            reserved: attempt.reserved(&inputs),
        })
    }

    /// Sweeps exactly `outpoints` to `address`, paying the fee from the swept value.
    ///
    /// The outpoints must all be confirmed wallet outputs. They are leased under
    /// [`LockId::Explicit`] for the configured TTL; every lease is released again if
    /// funding fails.
    pub async fn fund_sweep(
        &self,
        address: &Address,
        outpoints: &[OutPoint],
        fee_rate: FeeRate,
    ) -> FundingResult<FundedPsbt> {
        if outpoints.is_empty() {
            return Err(FundingError::Validation(
                "sweep requires at least one outpoint".into(),
            ));
        }

        let unspent = self
            .backend
            .list_unspent(MIN_INPUT_CONFIRMATIONS)
            .await
            .map_err(FundingError::backend("list_unspent"))?;
        for outpoint in outpoints {
            if !unspent.iter().any(|u| u.outpoint == *outpoint) {
                return Err(FundingError::NotFound(*outpoint));
            }
        }

        let locks = OutpointLocks::new(self.backend);
        let reserved = locks
            .lock(outpoints, LockId::Explicit, self.lease_ttl)
            .await?;

        match self.fund_skeleton(address, outpoints, fee_rate).await {
            Ok(psbt) => Ok(FundedPsbt { psbt, reserved }),
            Err(err) => {
                warn!(%err, inputs = outpoints.len(), "sweep funding failed, releasing inputs");
                locks.release_locked(&reserved).await;
                Err(err)
            }
        }
    }

    async fn fund_skeleton(
        &self,
        address: &Address,
        outpoints: &[OutPoint],
        fee_rate: FeeRate,
    ) -> FundingResult<Vec<u8>> {
        let skeleton = sweep_skeleton(address.script_pubkey(), outpoints);
        let psbt = Psbt::from_unsigned_tx(skeleton)
            .map_err(|e| FundingError::InvalidPsbt(e.to_string()))?;

        let template = FundingTemplate::CoinSelect {
            psbt: psbt.serialize(),
            change_index: SWEEP_CHANGE_INDEX,
        };
        let funded = self
            .backend
            .fund_psbt(template, fee_rate)
            .await
            .map_err(FundingError::Funding)?;
        debug!(
            inputs = outpoints.len(),
            sat_per_vb = fee_rate.to_sat_per_vb_ceil(),
            "funded sweep"
        );
        Ok(funded)
    }
}

/// Unsigned v2 transaction spending `outpoints` into one placeholder output.
fn sweep_skeleton(script_pubkey: ScriptBuf, outpoints: &[OutPoint]) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: outpoints
            .iter()
            .map(|op| TxIn {
                previous_output: *op,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: vec![TxOut {
            value: SWEEP_PLACEHOLDER,
            script_pubkey,
        }],
    }
}

pub(crate) fn input_outpoints(psbt: &Psbt) -> Vec<OutPoint> {
    psbt.unsigned_tx
        .input
        .iter()
        .map(|i| i.previous_output)
        .collect()
}
