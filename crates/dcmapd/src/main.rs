//! dcmapd — the dcmap daemon.
//!
//! Opens (and on first start seeds) the state store that the REST layer
//! and the VM watcher share.
//!
//! # Usage
//!
//! ```text
//! dcmapd run --data-dir /var/lib/dcmap --seed /etc/dcmap/datacenters.yaml
//! dcmapd dump --data-dir /var/lib/dcmap
//! dcmapd reset-sample --data-dir /var/lib/dcmap
//! ```

mod config;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use dcmap_state::Store;
use tracing::{info, warn};

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "dcmapd", about = "dcmap state daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the store and keep it open until Ctrl-C.
    Run(StoreArgs),
    /// Print the collection and migration ledger as JSON.
    Dump(StoreArgs),
    /// Replace the collection with the built-in sample dataset.
    ResetSample(StoreArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// Path to a dcmapd.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the database file.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seed document used when the store is empty.
    #[arg(long)]
    seed: Option<PathBuf>,

    /// VM watcher layout to apply after opening.
    #[arg(long)]
    watcher_config: Option<PathBuf>,
}

impl StoreArgs {
    fn resolve(self) -> anyhow::Result<DaemonConfig> {
        let mut config = DaemonConfig::load(self.config.as_deref())?;
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(seed) = self.seed {
            config.seed_file = Some(seed);
        }
        if let Some(watcher) = self.watcher_config {
            config.watcher_config = Some(watcher);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,dcmapd=debug,dcmap_state=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args.resolve()?).await,
        Command::Dump(args) => dump(args.resolve()?),
        Command::ResetSample(args) => reset_sample(args.resolve()?),
    }
}

fn open_store(config: &DaemonConfig) -> anyhow::Result<Store> {
    let db_path = config.db_path();
    let store = Store::open(&db_path, &config.seed_sources())?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("dcmap daemon starting");

    let store = open_store(&config)?;
    if let Some(source) = store.seeded_from() {
        info!(%source, "fresh store seeded");
    }

    if let Some(watcher) = &config.watcher_config {
        store.initialize_from_watcher_config(watcher)?;
    }

    let datacenters = store.get_datacenters();
    let vms: usize = datacenters.iter().map(|dc| dc.vms.len()).sum();
    let active = store.get_active_migrations()?.len();
    info!(
        datacenters = datacenters.len(),
        vms,
        active_migrations = active,
        "store ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    tokio::task::spawn_blocking(move || {
        if let Err(e) = store.flush_timeout(Duration::from_secs(5)) {
            warn!(error = %e, "pending snapshots not flushed before close");
        }
        store.close()
    })
    .await??;

    info!("dcmap daemon stopped");
    Ok(())
}

fn dump(config: DaemonConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let output = serde_json::json!({
        "datacenters": store.get_datacenters(),
        "migrations": store.get_all_migrations()?,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    store.close()?;
    Ok(())
}

fn reset_sample(config: DaemonConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    store.initialize_with_sample_data()?;
    store.flush()?;
    store.close()?;
    info!("collection reset to sample data");
    Ok(())
}
