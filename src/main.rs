//! Aid distribution ledger operator binary.
//!
//! # Architecture Overview
//!
//! ```text
//!   aid-ledger --config ledger.toml <command>
//!        │
//!        ▼
//!   ┌──────────────┐    ┌──────────────────┐    ┌─────────────────┐
//!   │ LedgerFacade │───▶│ registry         │    │ events          │
//!   │              │    │ networks/contracts│   │ subscriber      │──▶ handler
//!   └──────┬───────┘    └──────────────────┘    │ + cursor store  │
//!          │                                    └────────┬────────┘
//!          ▼                                             │
//!   ┌──────────────┐    ┌──────────────────┐             │
//!   │ submitter    │───▶│ provider pool    │◀────────────┘
//!   │ + signers    │    │ (one per network)│──▶ JSON-RPC
//!   └──────────────┘    └──────────────────┘
//! ```
//!
//! `run` follows the configured subscriptions until SIGINT/SIGTERM. The other
//! commands perform one read or write and exit.

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aid_ledger::config::load_config;
use aid_ledger::events::{EventHandler, HandlerError, LedgerEvent};
use aid_ledger::ledger::models::display_ether;
use aid_ledger::ledger::{ether, AidStatus, LedgerFacade, Projections, WriteOptions};
use aid_ledger::lifecycle::wait_for_signal;
use aid_ledger::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Parser)]
#[command(name = "aid-ledger")]
#[command(about = "Donation and aid ledger on EVM networks", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "config/ledger.toml")]
    config: PathBuf,

    /// Network to use instead of `ledger.default_network`.
    #[arg(short, long)]
    network: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the configured event subscriptions until interrupted
    Run,
    /// Donate from a configured signer
    Donate {
        /// Signer name from the configuration
        #[arg(long)]
        from: String,
        /// Amount in ether
        #[arg(long)]
        amount: String,
        #[arg(long, default_value_t = 1)]
        confirmations: u64,
    },
    /// Register an aid record (operator)
    CreateAid {
        #[arg(long)]
        receiver: Address,
        /// Amount in ether
        #[arg(long)]
        amount: String,
        #[arg(long, default_value_t = 1)]
        confirmations: u64,
    },
    /// Change the status of an aid record (operator)
    UpdateAid {
        #[arg(long)]
        id: U256,
        /// pending, delivered or cancelled
        #[arg(long)]
        status: String,
        #[arg(long, default_value_t = 1)]
        confirmations: u64,
    },
    /// Fund the contract (operator)
    Fund {
        /// Amount in ether
        #[arg(long)]
        amount: String,
        #[arg(long, default_value_t = 1)]
        confirmations: u64,
    },
    /// Total donated by an address
    DonorTotal {
        #[arg(long)]
        donor: Address,
    },
    /// Read one aid record
    AidRecord {
        #[arg(long)]
        id: U256,
    },
    /// Check a transaction against a confirmation depth
    Await {
        #[arg(long)]
        tx: TxHash,
        #[arg(long, default_value_t = 1)]
        confirmations: u64,
    },
}

/// Logs every event and feeds the projections.
struct LogEvents {
    projections: Projections,
}

#[async_trait]
impl EventHandler for LogEvents {
    async fn handle(&self, event: &LedgerEvent) -> Result<(), HandlerError> {
        tracing::info!(
            network = %event.network,
            event = %event.event_name,
            block = event.block_number,
            log_index = event.log_index,
            tx_hash = %event.tx_hash,
            decoded = ?event.decoded,
            "Contract event"
        );
        self.projections.handle(event).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_logging(&config.observability)?;
    tracing::info!(config = %cli.config.display(), "aid-ledger v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    let mut facade = LedgerFacade::from_config(config).await?;
    if let Some(network) = &cli.network {
        facade = facade.with_network(network)?;
    }

    match cli.command {
        Commands::Run => run(&facade).await?,
        Commands::Donate {
            from,
            amount,
            confirmations,
        } => {
            let donor = facade.signer_address(&from)?;
            let record = facade
                .record_donation(donor, ether(&amount)?, WriteOptions::confirmed(confirmations))
                .await?;
            print_json(&record)?;
        }
        Commands::CreateAid {
            receiver,
            amount,
            confirmations,
        } => {
            let submission = facade
                .create_aid_record(receiver, ether(&amount)?, WriteOptions::confirmed(confirmations))
                .await?;
            print_json(&submission)?;
        }
        Commands::UpdateAid {
            id,
            status,
            confirmations,
        } => {
            let status: AidStatus = status.parse()?;
            let record = facade
                .update_aid_status(id, status, WriteOptions::confirmed(confirmations))
                .await?;
            print_json(&record)?;
        }
        Commands::Fund { amount, confirmations } => {
            let record = facade
                .fund_contract(ether(&amount)?, WriteOptions::confirmed(confirmations))
                .await?;
            print_json(&record)?;
        }
        Commands::DonorTotal { donor } => {
            let total = facade.fetch_donor_totals(donor).await?;
            println!("{} ETH", display_ether(total));
        }
        Commands::AidRecord { id } => {
            let record = facade.fetch_aid_record(id).await?;
            print_json(&record)?;
        }
        Commands::Await { tx, confirmations } => {
            // Not submitted by this process, so only the chain can answer.
            let connection = facade.pool().acquire(facade.network()).await?;
            let receipt = connection
                .transaction_receipt(tx)
                .await
                .map_err(|e| aid_ledger::LedgerError::chain(facade.network(), e))?;
            match receipt {
                Some(receipt) => {
                    let head = connection
                        .block_number()
                        .await
                        .map_err(|e| aid_ledger::LedgerError::chain(facade.network(), e))?;
                    let depth = aid_ledger::blockchain::transaction::confirmations(head, receipt.block_number);
                    println!(
                        "{} included in block {}: success={} confirmations={} (required {})",
                        tx,
                        receipt.block_number,
                        receipt.success,
                        depth,
                        confirmations.max(1)
                    );
                }
                None => println!("{} is pending or unknown", tx),
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run(facade: &LedgerFacade) -> Result<(), Box<dyn std::error::Error>> {
    let subscriptions = facade.config().events.subscriptions.clone();
    if subscriptions.is_empty() {
        tracing::warn!("No event subscriptions configured");
    }

    let handler = Arc::new(LogEvents {
        projections: Projections::new(),
    });

    let mut handles = Vec::with_capacity(subscriptions.len());
    for subscription in &subscriptions {
        let target = match &subscription.network {
            Some(network) => facade.with_network(network)?,
            None => facade.clone(),
        };
        let options = target
            .subscription_options()?
            .with_start_block(subscription.start_block);
        handles.push(target.subscribe_with(&subscription.contract, &subscription.event, handler.clone(), options)?);
    }

    tracing::info!(subscriptions = handles.len(), "Following contract events");
    wait_for_signal().await?;

    let stopping = handles.into_iter().map(|handle| async move {
        let key = handle.key().clone();
        (key, tokio::time::timeout(Duration::from_secs(10), handle.stop()).await)
    });
    for (key, result) in futures_util::future::join_all(stopping).await {
        match result {
            Ok(Ok(())) => tracing::info!(subscription = %key, "Subscription stopped"),
            Ok(Err(e)) => tracing::error!(subscription = %key, error = %e, "Subscription ended with error"),
            Err(_) => tracing::warn!(subscription = %key, "Subscription did not stop in time"),
        }
    }

    tracing::info!(
        donations = handler.projections.donors.len(),
        aid_records = handler.projections.aid.records().len(),
        "Projection summary"
    );
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
