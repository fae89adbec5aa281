//! [`ClaimBackend`] over Elements and Bitcoin Core RPC.

use std::time::Duration;

use async_trait::async_trait;
use bitcoin::Txid;
use jsonrpsee::{core::client::ClientT, http_client::HttpClient, rpc_params};
use pegin_service::{ClaimBackend, ClaimError, PeginAddress};
use serde::Deserialize;
use tracing::*;

use crate::{errors::classify, rpc::RpcEndpoint};

#[derive(Debug, Deserialize)]
struct GetPeginAddressResponse {
    mainchain_address: String,
    claim_script: String,
}

/// Claims peg-ins on an Elements node, fetching main chain data from Bitcoin Core.
#[derive(Debug)]
pub struct ElementsClaimClient {
    elements: HttpClient,
    /// Same node, with the longer timeout `claimpegin` needs.
    claimer: HttpClient,
    bitcoind: HttpClient,
}

impl ElementsClaimClient {
    pub fn new(
        elements: &RpcEndpoint,
        claim_timeout: Duration,
        bitcoind: &RpcEndpoint,
    ) -> Result<Self, ClaimError> {
        Ok(Self {
            elements: elements.build(None)?,
            claimer: elements.build(Some(claim_timeout))?,
            bitcoind: bitcoind.build(None)?,
        })
    }
}

#[async_trait]
impl ClaimBackend for ElementsClaimClient {
    async fn get_pegin_address(&self) -> Result<PeginAddress, ClaimError> {
        let resp: GetPeginAddressResponse = self
            .elements
            .request("getpeginaddress", rpc_params![])
            .await
            .map_err(classify)?;
        Ok(PeginAddress {
            mainchain_address: resp.mainchain_address,
            claim_script: resp.claim_script,
        })
    }

    async fn get_raw_transaction(&self, txid: Txid) -> Result<String, ClaimError> {
        self.bitcoind
            .request("getrawtransaction", rpc_params![txid.to_string()])
            .await
            .map_err(classify)
    }

    async fn get_tx_out_proof(&self, txid: Txid) -> Result<String, ClaimError> {
        self.bitcoind
            .request("gettxoutproof", rpc_params![vec![txid.to_string()]])
            .await
            .map_err(classify)
    }

    async fn claim_pegin(
        &self,
        raw_tx: &str,
        proof: &str,
        claim_script: &str,
    ) -> Result<String, ClaimError> {
        debug!(%claim_script, "calling claimpegin");
        self.claimer
            .request("claimpegin", rpc_params![raw_tx, proof, claim_script])
            .await
            .map_err(classify)
    }
}
