use std::path::PathBuf;

use argh::FromArgs;

#[derive(Debug, FromArgs)]
#[argh(description = "Lightning wallet peg-in daemon")]
pub(crate) struct Args {
    #[argh(option, short = 'c', description = "path to the TOML config file")]
    pub config: PathBuf,

    #[argh(
        option,
        short = 'o',
        description = "config override, e.g. pegin.poll_interval_secs=30"
    )]
    pub overrides: Vec<String>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
pub(crate) enum Command {
    Run(RunArgs),
    Pegin(PeginArgs),
    BumpFee(BumpFeeArgs),
    Status(StatusArgs),
    Utxos(UtxosArgs),
    Forwards(ForwardsArgs),
}

/// Watch the pending peg-in and claim it once it is deep enough.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
pub(crate) struct RunArgs {}

/// Send a new peg-in.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "pegin")]
pub(crate) struct PeginArgs {
    /// amount in sats. not needed when sweeping the whole wallet
    #[argh(option, short = 'a')]
    pub amount: Option<u64>,

    /// fee rate in sat/vB
    #[argh(option, short = 'f')]
    pub fee_rate: u64,

    /// pay the fee out of the amount
    #[argh(switch)]
    pub sweep_all: bool,

    /// outpoint to spend as `txid:vout`, may be repeated
    #[argh(option, short = 'u')]
    pub utxo: Vec<String>,
}

/// Raise the fee of the pending peg-in.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "bump-fee")]
pub(crate) struct BumpFeeArgs {
    /// new fee rate in sat/vB, above the last one
    #[argh(positional)]
    pub fee_rate: u64,
}

/// Show the pending peg-in.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "status")]
pub(crate) struct StatusArgs {}

/// List spendable wallet outputs.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "utxos")]
pub(crate) struct UtxosArgs {
    /// minimum confirmations
    #[argh(option, default = "1")]
    pub min_confs: u32,
}

/// Show forwarding statistics of a channel.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "forwards")]
pub(crate) struct ForwardsArgs {
    /// short channel id
    #[argh(positional)]
    pub channel_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pegin_args() {
        let args = Args::from_args(
            &["pegind"],
            &[
                "-c",
                "pegind.toml",
                "-o",
                "pegin.network=signet",
                "pegin",
                "--fee-rate",
                "5",
                "--sweep-all",
                "-u",
                "4cfbec13cf1510545f285cceceb6229bd7b6a918a8f6eba1dbee64d26226a3b7:0",
            ],
        )
        .unwrap();

        assert_eq!(args.config, PathBuf::from("pegind.toml"));
        assert_eq!(args.overrides, vec!["pegin.network=signet".to_owned()]);
        let Command::Pegin(pegin) = args.command else {
            panic!("expected pegin subcommand");
        };
        assert_eq!(pegin.fee_rate, 5);
        assert!(pegin.sweep_all);
        assert!(pegin.amount.is_none());
        assert_eq!(pegin.utxo.len(), 1);
    }

    #[test]
    fn test_bump_fee_args() {
        let args = Args::from_args(&["pegind"], &["-c", "p.toml", "bump-fee", "12"]).unwrap();
        assert!(matches!(args.command, Command::BumpFee(BumpFeeArgs { fee_rate: 12 })));
    }
}
