//! Wiring of the node clients into a peg-in service.

use std::{sync::Arc, time::Duration};

use pegin_config::Config;
use pegin_elements::{ElementsClaimClient, RpcEndpoint};
use pegin_funding::FundingEngine;
use pegin_lnd::LndClient;
use pegin_service::{JsonFileStore, PeginService};
use tracing::*;

use crate::errors::InitError;

pub(crate) type Service = PeginService<LndClient, ElementsClaimClient, JsonFileStore>;

pub(crate) struct Context {
    pub lnd: Arc<LndClient>,
    pub service: Arc<Service>,
}

pub(crate) fn build(config: &Config) -> Result<Context, InitError> {
    let lnd = Arc::new(LndClient::connect(
        &config.lnd.rest_url,
        &config.lnd.macaroon_path,
        config.lnd.tls_cert_path.as_deref(),
        Duration::from_secs(config.lnd.timeout_secs),
    )?);
    info!(url = %config.lnd.rest_url, "using lnd");

    let engine = FundingEngine::new(lnd.clone(), config.pegin.network)
        .with_lease_ttl(config.pegin.lease_ttl());

    let mut elements = RpcEndpoint::new(
        &config.elements.rpc_url,
        &config.elements.rpc_user,
        &config.elements.rpc_password,
    )
    .with_timeout(Duration::from_secs(config.elements.timeout_secs));
    if let Some(wallet) = &config.elements.wallet {
        elements = elements.with_wallet(wallet);
    }
    let bitcoind = RpcEndpoint::new(
        &config.bitcoind.rpc_url,
        &config.bitcoind.rpc_user,
        &config.bitcoind.rpc_password,
    )
    .with_timeout(Duration::from_secs(config.bitcoind.timeout_secs));
    let claims = ElementsClaimClient::new(
        &elements,
        Duration::from_secs(config.elements.claim_timeout_secs),
        &bitcoind,
    )?;

    let store = JsonFileStore::new(&config.pegin.state_file);
    debug!(path = %store.path().display(), "peg-in state file");

    let service = PeginService::new(
        Arc::new(engine),
        Arc::new(claims),
        Arc::new(store),
        config.pegin.claim_confirmations,
        &config.pegin.label,
    );

    Ok(Context {
        lnd,
        service: Arc::new(service),
    })
}
