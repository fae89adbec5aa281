//! Subcommand handlers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use bitcoin::Amount;
use pegin_funding::{parse_outpoint, BumpOutcome};
use pegin_service::{ForwardingLog, PeginMonitor, StartRequest};
use tokio::{signal, sync::watch};
use tracing::*;

use crate::{
    args::{BumpFeeArgs, ForwardsArgs, PeginArgs, UtxosArgs},
    context::Context,
    errors::ArgsError,
};

pub(crate) async fn run(ctx: Context, interval: Duration) -> anyhow::Result<()> {
    let monitor = PeginMonitor::new(ctx.service);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { monitor.run(interval, shutdown_rx).await });

    signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("shutting down");
    // Fails only if the monitor already exited.
    shutdown_tx.send(true).ok();
    task.await.context("monitor task")?;
    Ok(())
}

pub(crate) fn start_request(args: PeginArgs) -> Result<StartRequest, ArgsError> {
    let outpoints = args
        .utxo
        .iter()
        .map(|s| parse_outpoint(s))
        .collect::<Result<Vec<_>, _>>()?;

    // A full sweep sizes itself from the wallet balance.
    let amount = match args.amount {
        Some(sat) => Amount::from_sat(sat),
        None if args.sweep_all && outpoints.is_empty() => Amount::ZERO,
        None => return Err(ArgsError::MissingAmount),
    };

    Ok(StartRequest {
        amount,
        fee_rate_sat_vb: args.fee_rate,
        sweep_all: args.sweep_all,
        outpoints,
    })
}

pub(crate) async fn pegin(ctx: Context, args: PeginArgs) -> anyhow::Result<()> {
    let req = start_request(args)?;
    let sent = ctx.service.start(req).await?;
    println!("txid: {}", sent.txid);
    println!("amount: {}", sent.amount);
    Ok(())
}

pub(crate) async fn bump_fee(ctx: Context, args: BumpFeeArgs) -> anyhow::Result<()> {
    match ctx.service.bump_fee(args.fee_rate).await? {
        BumpOutcome::Replaced(sent) => println!("replaced by {}", sent.txid),
        BumpOutcome::ChildAttached { parent, change } => {
            println!("child attached to {parent} spending change {change}")
        }
    }
    Ok(())
}

pub(crate) async fn status(ctx: Context) -> anyhow::Result<()> {
    let Some(status) = ctx.service.status().await? else {
        println!("no pending peg-in");
        return Ok(());
    };

    let state = &status.state;
    println!("address: {}", state.mainchain_address);
    println!("claim script: {}", state.claim_script);
    println!("amount: {}", state.amount);
    println!("fee rate: {} sat/vB", state.fee_rate_sat_vb);
    match state.txid {
        Some(txid) => println!("txid: {txid}"),
        None => println!("txid: not sent"),
    }
    match status.confirmations {
        Some(confs) => println!(
            "confirmations: {confs}/{} ({}%)",
            status.target_confirmations, status.progress_percent
        ),
        None => println!("confirmations: unknown"),
    }
    println!("time left: ~{} min", status.time_left.as_secs() / 60);
    println!("next bump: >= {} sat/vB", status.min_bump_rate);
    Ok(())
}

pub(crate) async fn utxos(ctx: Context, args: UtxosArgs) -> anyhow::Result<()> {
    let utxos = ctx.service.engine().list_unspent(args.min_confs).await?;
    for u in &utxos {
        println!("{} {} {} confs {}", u.outpoint, u.amount, u.confirmations, u.address);
    }
    let total = utxos.iter().map(|u| u.amount).sum::<Amount>();
    println!("{} outputs, {total}", utxos.len());
    Ok(())
}

pub(crate) async fn forwards(ctx: Context, args: ForwardsArgs) -> anyhow::Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs();

    let mut log = ForwardingLog::new();
    let fetched = log.sync(ctx.lnd.as_ref(), now).await?;
    debug!(fetched, "forwarding history loaded");

    let s = log.channel_stats(args.channel_id, now);
    println!("window  out(sat)  in(sat)  fee(sat)  assisted(sat)");
    println!(
        "7d      {}  {}  {}  {}",
        s.amount_out_7d, s.amount_in_7d, s.fee_sat_7d, s.assisted_fee_sat_7d
    );
    println!(
        "30d     {}  {}  {}  {}",
        s.amount_out_30d, s.amount_in_30d, s.fee_sat_30d, s.assisted_fee_sat_30d
    );
    println!(
        "6m      {}  {}  {}  {}",
        s.amount_out_6m, s.amount_in_6m, s.fee_sat_6m, s.assisted_fee_sat_6m
    );
    Ok(())
}
