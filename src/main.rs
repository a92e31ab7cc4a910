//! Command-line interface for cosmos-mongo-compare
//!
//! # Usage Examples
//!
//! ```bash
//! # Compare every collection configured in compare.yaml
//! cosmos-mongo-compare --config compare.yaml
//!
//! # Compare a single collection
//! cosmos-mongo-compare --config compare.yaml --collection orders
//!
//! # Compare every source collection that has a configuration entry
//! cosmos-mongo-compare --config compare.yaml --all-collections
//! ```
//!
//! Exit codes: 0 when every sampled document matched, 1 when any mismatch,
//! missing document, or fetch error was found (or the run was interrupted),
//! 2 on a configuration or connection error.

use std::path::PathBuf;

use clap::Parser;
use cosmos_mongo_compare::config::AppConfig;
use cosmos_mongo_compare::run::run_compare;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "cosmos-mongo-compare")]
#[command(about = "Sampling-based consistency checker for Cosmos DB (Mongo API) and MongoDB")]
#[command(long_about = None)]
struct Cli {
    /// Path to the YAML or JSON configuration file
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Compare only this collection
    #[arg(long, conflicts_with = "all_collections")]
    collection: Option<String>,

    /// Compare every source collection with a configuration entry
    #[arg(long)]
    all_collections: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match run().await {
        Ok(false) => Ok(()),
        Ok(true) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(2);
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight comparisons");
            interrupt.cancel();
        }
    });

    run_compare(&config, cli.collection.as_deref(), cli.all_collections, cancel).await
}
