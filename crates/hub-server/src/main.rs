//! Sensor hub server
//!
//! Loads the configuration, seeds the in-memory stores and runs the hub
//! until interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hub_config::{HubConfig, SeedData, StoreSettings};
use hub_engine::{Hub, HubOptions, HubStores};
use hub_store::{MemoryMeasurementStore, MemoryRuleStore, MemorySensorStore, MemorySequenceStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, value_name = "FILE", env = "HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Run the hub (default)
    Run,
    /// Load and validate the configuration, then exit
    Check,
}

fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;
    Ok(())
}

fn seed_stores(seed: &SeedData, store: &StoreSettings) -> HubStores {
    HubStores {
        sensors: Arc::new(MemorySensorStore::with_sensors(seed.sensors.clone())),
        measurements: Arc::new(MemoryMeasurementStore::with_retention(store.retention())),
        sequences: Arc::new(MemorySequenceStore::with_sequences(seed.sequences.clone())),
        rules: Arc::new(MemoryRuleStore::with_rules(seed.rules.clone())),
    }
}

async fn run(config: HubConfig) -> Result<()> {
    let stores = seed_stores(&config.seed, &config.store);
    let hub = Hub::with_http(stores, HubOptions::from_config(&config))
        .context("failed to create hub")?;
    hub.bootstrap().await.context("failed to bootstrap hub")?;

    info!("Sensor hub is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    hub.shutdown().await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = match &args.config {
        Some(path) => HubConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => {
            info!("No configuration file given, using defaults");
            HubConfig::default()
        }
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Check => {
            info!(
                sensors = config.seed.sensors.len(),
                sequences = config.seed.sequences.len(),
                rules = config.seed.rules.len(),
                "Configuration is valid"
            );
            Ok(())
        }
        Command::Run => {
            info!("Starting sensor hub");
            run(config).await
        }
    }
}
