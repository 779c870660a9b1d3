//! Command-line access to a ledger node.
//!
//! Read-only: account state, transaction confirmation and the live block
//! stream. Output is JSON on stdout; logs go to stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use ledger_client::config::{load_config, ClientConfig};
use ledger_client::ledger::{AccountId, EventQuery, TendermintRpc, Transport, TxHash};
use ledger_client::observability::{logging, metrics};
use ledger_client::subscription::SubscriptionRegistry;
use ledger_client::transaction::{ConfirmationPolicy, ConfirmationTracker};

#[derive(Parser)]
#[command(name = "ledger-client")]
#[command(about = "Inspect accounts, transactions and blocks on a ledger node", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show account number, sequence and balances
    Account { address: String },
    /// Wait for a transaction to reach a terminal state
    Tx {
        hash: String,
        /// Override the configured number of queryTx attempts
        #[arg(long)]
        attempts: Option<u32>,
    },
    /// Stream new blocks
    Blocks {
        /// Event query; defaults to every new block
        #[arg(short, long)]
        query: Option<String>,
        /// Stop after this many blocks
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(
        rpc_url = %config.node.rpc_url,
        chain_id = %config.node.chain_id,
        "ledger-client starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let transport: Arc<dyn Transport> = Arc::new(TendermintRpc::new(&config.node)?);

    match cli.command {
        Commands::Account { address } => {
            let info = transport.query_account(&AccountId::new(address)).await?;
            print_json(&info)?;
        }
        Commands::Tx { hash, attempts } => {
            let hash: TxHash = hash.parse()?;
            let mut policy = ConfirmationPolicy::from(&config.confirmation);
            if let Some(attempts) = attempts {
                policy.retry = policy.retry.with_max_attempts(attempts);
            }
            let result = ConfirmationTracker::new(transport).confirm(&hash, &policy).await?;
            print_json(&result)?;
        }
        Commands::Blocks { query, count } => {
            let query = query.map(EventQuery::new).unwrap_or_else(EventQuery::new_blocks);
            let registry = SubscriptionRegistry::new(transport, &config.subscription);
            let mut subscription = registry.subscribe(query).await?;

            let mut seen = 0usize;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupted");
                        break;
                    }
                    item = subscription.recv() => match item {
                        Some(Ok(block)) => {
                            print_json(&block)?;
                            seen += 1;
                            if count.is_some_and(|limit| seen >= limit) {
                                break;
                            }
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => break,
                    },
                }
            }
            registry.shutdown().await;
        }
    }

    Ok(())
}
