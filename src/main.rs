//! cardano-toolkit command line
//!
//! Thin front end over the library: loads configuration, applies command-line
//! and environment overrides, then runs one operation and prints its result
//! as JSON.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardano_toolkit::config::{NodeSettings, ToolkitConfig};
use cardano_toolkit::endpoints;
use cardano_toolkit::funding::{DelegationLevel, Orchestrator};
use cardano_toolkit::tx_builder::{
    BuildOptions, FeeEstimator, FeeShape, SigningKey, Tx, TxBuilder, TxIn, TxOut,
};
use cardano_toolkit::utxo::{exclude_scripts, exclude_tokens, UtxoFilter};
use cardano_toolkit::CardanoCli;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Base CLI command, split on whitespace (e.g. "ssh node cardano-cli")
    #[arg(long, env = "CARDANO_CLI")]
    cli: Option<String>,

    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "CARDANO_NODE_SOCKET_PATH")]
    socket_path: Option<PathBuf>,

    /// Testnet magic; mainnet when unset everywhere
    #[arg(long, env = "TESTNET_MAGIC")]
    testnet_magic: Option<u32>,

    #[arg(long, env = "TREASURY_ADDR")]
    treasury_addr: Option<String>,

    #[arg(long, env = "TREASURY_ADDR_FILE")]
    treasury_addr_file: Option<PathBuf>,

    #[arg(long, env = "TREASURY_SIGNING_KEY_FILE")]
    treasury_signing_key_file: Option<PathBuf>,

    #[arg(long, env = "POOL_COLD_VKEY_FILE")]
    pool_cold_vkey_file: Option<PathBuf>,

    /// Mirror CLI output and keep scratch files
    #[arg(long)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Serve Prometheus metrics on this port while the command runs
    #[arg(long)]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Current chain tip
    Tip,
    /// CLI build information
    Version,
    /// UTXOs at an address or wallet (whole UTxO set when omitted)
    Utxos {
        address: Option<String>,
        #[arg(long)]
        exclude_scripts: bool,
        #[arg(long)]
        exclude_tokens: bool,
    },
    /// Send lovelace from the treasury
    Fund { address: String, quantity: String },
    /// Generate a wallet, fund it and optionally stake it
    CreateWallet {
        #[arg(default_value = "")]
        name: String,
        #[arg(long, default_value = "0")]
        initial_funds: String,
        #[arg(long, value_enum, default_value_t = Staking::None)]
        staking: Staking,
    },
    /// Register a wallet's stake address
    Register { wallet: String },
    /// Delegate a wallet to the configured pool
    Delegate { wallet: String },
    /// Mint tokens under the wallet's single-signature policy
    Mint {
        wallet: String,
        asset_name: String,
        quantity: String,
    },
    /// Sweep UTXOs (`<hash>#<index>`) from a wallet into one output
    Send {
        source: String,
        #[arg(long)]
        to: Option<String>,
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// Build a raw transaction body
    Build {
        #[arg(long, default_value = "0")]
        fee: String,
        /// `<hash>#<index>`
        #[arg(long = "tx-in", required = true)]
        tx_in: Vec<TxIn>,
        /// `<addr|wallet>+<lovelace>[+<qty> <policy>.<name>]`
        #[arg(long = "tx-out", required = true)]
        tx_out: Vec<TxOut>,
        #[arg(long)]
        out_file: Option<PathBuf>,
    },
    /// Minimum fee of a transaction body
    Fee {
        body_file: PathBuf,
        #[arg(long)]
        tx_in_count: usize,
        #[arg(long)]
        tx_out_count: usize,
        #[arg(long, default_value_t = 1)]
        witness_count: u32,
    },
    /// Sign a body with wallet keys (the treasury key when none are given)
    Sign {
        body_file: PathBuf,
        #[arg(long = "wallet")]
        wallets: Vec<String>,
        #[arg(long)]
        out_file: Option<PathBuf>,
    },
    /// Submit a signed transaction
    Submit { signed_file: PathBuf },
    /// Transaction id of a body or signed transaction envelope
    TxId { file: PathBuf },
}

/// Envelope produced by `build` or `sign`, with its transaction id
#[derive(Debug, Serialize)]
struct EnvelopeOutput {
    id: String,
    envelope: serde_json::Value,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Staking {
    None,
    Registered,
    Delegated,
}

impl From<Staking> for DelegationLevel {
    fn from(s: Staking) -> Self {
        match s {
            Staking::None => DelegationLevel::None,
            Staking::Registered => DelegationLevel::Registered,
            Staking::Delegated => DelegationLevel::Delegated,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args);
    init_logging(args.verbose, args.json_logs || config.monitoring.json_logs)?;

    let cancel = CancellationToken::new();
    let metrics_port = args
        .metrics_port
        .or_else(|| config.monitoring.enable_metrics.then_some(config.monitoring.metrics_port));
    if let Some(port) = metrics_port {
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = endpoints::endpoint_server(port, shutdown).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling");
            trigger.cancel();
        }
    });

    let result = run(args.command, &config, cancel.clone()).await;
    cancel.cancel();
    result
}

async fn run(command: Command, config: &ToolkitConfig, cancel: CancellationToken) -> Result<()> {
    if let Command::TxId { file } = &command {
        let data = read_file(file).await?;
        return print_json(&Tx::from_envelope(&data)?);
    }

    let settings = NodeSettings::resolve(config).context("Failed to resolve node settings")?;
    info!(network = %settings.network, data_dir = %settings.data_dir.display(), "node settings resolved");
    let cli = CardanoCli::new(settings);
    let orchestrator = Orchestrator::new(cli.clone(), config.funding.clone(), cancel);

    match command {
        Command::Tip => print_json(&cli.query_tip().await?),
        Command::Version => print_json(&cli.version().await?),
        Command::Utxos {
            address,
            exclude_scripts: scripts,
            exclude_tokens: tokens,
        } => {
            let mut filters: Vec<UtxoFilter> = Vec::new();
            if scripts {
                filters.push(exclude_scripts());
            }
            if tokens {
                filters.push(exclude_tokens());
            }
            print_json(&cli.utxos(address.as_deref(), &filters).await?)
        }
        Command::Fund { address, quantity } => {
            print_json(&orchestrator.fund_wallet(&address, &quantity).await?)
        }
        Command::CreateWallet {
            name,
            initial_funds,
            staking,
        } => print_json(
            &orchestrator
                .create_wallet(&name, &initial_funds, staking.into())
                .await?,
        ),
        Command::Register { wallet } => print_json(&orchestrator.register_stake(&wallet).await?),
        Command::Delegate { wallet } => print_json(&orchestrator.delegate(&wallet).await?),
        Command::Mint {
            wallet,
            asset_name,
            quantity,
        } => print_json(&orchestrator.mint(&wallet, &asset_name, &quantity).await?),
        Command::Send { source, to, inputs } => {
            let inputs = inputs
                .iter()
                .map(|s| s.parse::<TxIn>())
                .collect::<Result<Vec<_>, _>>()?;
            print_json(&orchestrator.send_funds(&source, to.as_deref(), &inputs).await?)
        }
        Command::Build {
            fee,
            tx_in,
            tx_out,
            out_file,
        } => {
            let mut options = BuildOptions::builder().fee(fee);
            for input in tx_in {
                options = options.tx_in(input.tx_hash, input.index);
            }
            for output in tx_out {
                options = options.tx_out(output.address, output.quantity, output.tokens);
            }
            let body = TxBuilder::new(cli).build(&options.finalize()?).await?;
            emit_envelope(&body, out_file.as_deref()).await
        }
        Command::Fee {
            body_file,
            tx_in_count,
            tx_out_count,
            witness_count,
        } => {
            let body = read_file(&body_file).await?;
            let shape = FeeShape::new(tx_in_count, tx_out_count, witness_count);
            let fee = FeeEstimator::new(cli).min_fee_for_body(&body, shape).await?;
            print_json(&serde_json::json!({ "fee": fee }))
        }
        Command::Sign {
            body_file,
            wallets,
            out_file,
        } => {
            let body = read_file(&body_file).await?;
            let keys: Vec<SigningKey> = if wallets.is_empty() {
                vec![SigningKey::Treasury]
            } else {
                wallets.iter().map(|w| SigningKey::from_wallet_name(w)).collect()
            };
            let signed = TxBuilder::new(cli).sign(&body, &keys).await?;
            emit_envelope(&signed, out_file.as_deref()).await
        }
        Command::Submit { signed_file } => {
            let signed = read_file(&signed_file).await?;
            let tx = Tx::from_envelope(&signed)?;
            TxBuilder::new(cli).submit(&signed).await?;
            print_json(&tx)
        }
        Command::TxId { .. } => Ok(()),
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Print an envelope with its id, writing it to `out_file` when given
async fn emit_envelope(data: &[u8], out_file: Option<&Path>) -> Result<()> {
    let id = Tx::from_envelope(data)?.id;
    let envelope = serde_json::from_slice(data).context("Failed to parse envelope")?;
    if let Some(path) = out_file {
        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    print_json(&EnvelopeOutput { id, envelope })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "cardano_toolkit=debug,info"
    } else {
        "cardano_toolkit=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<ToolkitConfig> {
    if std::path::Path::new(path).exists() {
        ToolkitConfig::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))
    } else {
        let _ = dotenvy::dotenv();
        Ok(ToolkitConfig::default())
    }
}

fn apply_overrides(config: &mut ToolkitConfig, args: &Args) {
    if let Some(cli) = &args.cli {
        config.node.cli = cli.split_whitespace().map(str::to_string).collect();
    }
    if let Some(dir) = &args.data_dir {
        config.node.data_dir = dir.clone();
    }
    if args.socket_path.is_some() {
        config.node.socket_path = args.socket_path.clone();
    }
    if args.testnet_magic.is_some() {
        config.node.testnet_magic = args.testnet_magic;
    }
    if let Some(addr) = &args.treasury_addr {
        config.treasury.addr = addr.clone();
    }
    if args.treasury_addr_file.is_some() {
        config.treasury.addr_file = args.treasury_addr_file.clone();
    }
    if let Some(key) = &args.treasury_signing_key_file {
        config.treasury.signing_key_file = key.clone();
    }
    if args.pool_cold_vkey_file.is_some() {
        config.pool.cold_vkey_file = args.pool_cold_vkey_file.clone();
    }
    config.debug |= args.debug;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_file() {
        let args = Args::parse_from([
            "cardano-toolkit",
            "--cli",
            "ssh node cardano-cli",
            "--testnet-magic",
            "1097911063",
            "--treasury-addr",
            "addr_test1t",
            "fund",
            "alice",
            "1000000",
        ]);
        let mut config = ToolkitConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.node.cli, vec!["ssh", "node", "cardano-cli"]);
        assert_eq!(config.node.testnet_magic, Some(1_097_911_063));
        assert_eq!(config.treasury.addr, "addr_test1t");
        assert!(matches!(args.command, Command::Fund { .. }));
    }

    #[test]
    fn test_send_requires_inputs() {
        assert!(Args::try_parse_from(["cardano-toolkit", "send", "alice"]).is_err());
    }

    #[test]
    fn test_build_parses_typed_inputs_and_outputs() {
        let args = Args::try_parse_from([
            "cardano-toolkit",
            "build",
            "--fee",
            "171573",
            "--tx-in",
            "aa#0",
            "--tx-in",
            "bb#1",
            "--tx-out",
            "addr_test1_bob+5000000+12 p1.coin",
        ])
        .unwrap();
        match args.command {
            Command::Build {
                fee,
                tx_in,
                tx_out,
                out_file,
            } => {
                assert_eq!(fee, "171573");
                assert_eq!(tx_in, vec![TxIn::new("aa", 0), TxIn::new("bb", 1)]);
                assert_eq!(tx_out.len(), 1);
                assert_eq!(tx_out[0].address, "addr_test1_bob");
                assert_eq!(tx_out[0].tokens, vec!["12 p1.coin".to_string()]);
                assert!(out_file.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_build_rejects_malformed_and_missing_outputs() {
        assert!(Args::try_parse_from(["cardano-toolkit", "build", "--tx-in", "aa#0"]).is_err());
        assert!(Args::try_parse_from([
            "cardano-toolkit",
            "build",
            "--tx-in",
            "aa",
            "--tx-out",
            "bob+1"
        ])
        .is_err());
        assert!(Args::try_parse_from([
            "cardano-toolkit",
            "build",
            "--tx-in",
            "aa#0",
            "--tx-out",
            "bob"
        ])
        .is_err());
    }

    #[test]
    fn test_fee_sign_submit_arguments() {
        let args = Args::try_parse_from([
            "cardano-toolkit",
            "fee",
            "body.raw",
            "--tx-in-count",
            "1",
            "--tx-out-count",
            "2",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::Fee {
                tx_in_count: 1,
                tx_out_count: 2,
                witness_count: 1,
                ..
            }
        ));
        assert!(Args::try_parse_from(["cardano-toolkit", "fee", "body.raw"]).is_err());

        let args = Args::try_parse_from([
            "cardano-toolkit",
            "sign",
            "body.raw",
            "--wallet",
            "alice",
            "--wallet",
            "alice-stake",
        ])
        .unwrap();
        match args.command {
            Command::Sign { wallets, .. } => assert_eq!(wallets, vec!["alice", "alice-stake"]),
            other => panic!("unexpected command: {:?}", other),
        }

        let args = Args::try_parse_from(["cardano-toolkit", "sign", "body.raw"]).unwrap();
        assert!(matches!(args.command, Command::Sign { ref wallets, .. } if wallets.is_empty()));

        assert!(Args::try_parse_from(["cardano-toolkit", "submit"]).is_err());
        assert!(matches!(
            Args::try_parse_from(["cardano-toolkit", "submit", "tx.signed"]).unwrap().command,
            Command::Submit { .. }
        ));
    }
}
