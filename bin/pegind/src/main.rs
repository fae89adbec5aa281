//! Peg-in daemon for an LND wallet.
//!
//! Sends peg-in transactions from the node's on-chain wallet, raises their fee while they
//! wait in the mempool and claims them on the side chain once they are deep enough.

mod args;
mod cmd;
mod context;
mod errors;

use anyhow::Context as _;
use args::{Args, Command};
use pegin_common::logging::{init_logging_from_config, LoggingInitConfig};
use pegin_config::{load_config, Config};
use tokio::runtime::Builder;
use tracing::*;

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    let config = load_config(&args.config, &args.overrides)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    init_logging(&config);

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("pegind-rt")
        .build()
        .context("building runtime")?;

    if let Err(e) = runtime.block_on(main_inner(args.command, config)) {
        error!(err = %format!("{e:#}"), "fatal");
        return Err(e);
    }
    Ok(())
}

async fn main_inner(command: Command, config: Config) -> anyhow::Result<()> {
    let ctx = context::build(&config)?;

    match command {
        Command::Run(_) => cmd::run(ctx, config.pegin.poll_interval()).await,
        Command::Pegin(args) => cmd::pegin(ctx, args).await,
        Command::BumpFee(args) => cmd::bump_fee(ctx, args).await,
        Command::Status(_) => cmd::status(ctx).await,
        Command::Utxos(args) => cmd::utxos(ctx, args).await,
        Command::Forwards(args) => cmd::forwards(ctx, args).await,
    }
}

fn init_logging(config: &Config) {
    let logging = &config.logging;
    init_logging_from_config(LoggingInitConfig {
        service_base_name: "pegind",
        service_label: logging.service_label.as_deref(),
        service_version: Some(env!("CARGO_PKG_VERSION")),
        log_dir: logging.log_dir.as_ref(),
        log_file_prefix: logging.log_file_prefix.as_deref(),
        json_format: logging.json_format,
        default_log_prefix: "pegind",
    });
    debug!(network = %config.pegin.network, "config loaded");
}
