//! Command-line entry point for the ARP ingestion engine.

use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arp_ingest::client::http::ArpApiClient;
use arp_ingest::config::IngestConfig;
use arp_ingest::orchestrator::Orchestrator;
use arp_ingest::shutdown::ShutdownCoordinator;
use arp_ingest::store::memory::MemoryStore;
use arp_ingest::RunCounters;

#[derive(Parser)]
#[command(name = "arp-ingest")]
#[command(about = "Ingest Brazilian government ARP price-registration data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full historical backfill, chunked by quarter
    Backfill {
        /// First validity start date to cover (defaults to the configured
        /// initial date)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last validity start date to cover (defaults to today)
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Sync records changed since the last completed run
    Incremental,
    /// Resume the most recent interrupted run
    Resume,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arp_ingest=info"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn print_stats(stats: &RunCounters) {
    match serde_json::to_string_pretty(stats) {
        Ok(rendered) => println!("{rendered}"),
        Err(_) => println!("{stats:?}"),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(error) = run().await {
        error!(error = %format!("{error:#}"), "run failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = IngestConfig::from_env().context("loading configuration")?;

    let shutdown = ShutdownCoordinator::shared();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, finishing current work");
                shutdown.request_shutdown();
            }
        });
    }

    let source = Arc::new(
        ArpApiClient::new(&config)
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .with_shutdown(shutdown.clone()),
    );
    // In-memory store; deployments wire a durable ArpStore here.
    let store = Arc::new(MemoryStore::new());

    let orchestrator =
        Orchestrator::new(config.clone(), source, store).with_shutdown(shutdown);

    let stats = match cli.command {
        Commands::Backfill { start, end } => {
            let start = start.unwrap_or(config.initial_start_date);
            let end = end.unwrap_or_else(|| config.initial_end_date_or_today());
            orchestrator.run_full_backfill(start, end).await?
        }
        Commands::Incremental => orchestrator.run_incremental().await?,
        Commands::Resume => orchestrator.resume().await?,
    };

    print_stats(&stats);
    Ok(())
}
