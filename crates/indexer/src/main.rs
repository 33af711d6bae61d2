//! witscan indexer - Witnet chain ingestion
//!
//! This binary provides:
//! - Forward block ingestion from a pool of full nodes
//! - Superblock confirmation and rollback reconciliation
//! - Mempool fee-histogram sampling
//!
//! Note: the HTTP explorer API is served by a separate process reading the
//! same database.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use witscan_indexer::config::Config;
use witscan_indexer::node::NodePool;
use witscan_indexer::pipeline::{
    fetch_consensus_constants, ConfirmLoop, InsertLoop, PendingLoop,
};
use witscan_indexer::storage::Storage;

/// Capacity of the insert-to-confirm handoff channel.
const UNCONFIRMED_QUEUE: usize = 1024;

#[derive(Parser)]
#[command(name = "witscan-indexer")]
#[command(version, about = "Witnet chain indexer for the witscan explorer", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "witscan.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexer service (all three ingestion loops)
    Run,

    /// Show indexer status and sync progress
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://witscan.db")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = load_config(&cli.config)?;
            init_logging(&config, cli.debug)?;
            info!("witscan indexer starting");
            info!("Version: {}", env!("CARGO_PKG_VERSION"));
            run_indexer(config).await?
        }
        Commands::Status => {
            let config = load_config(&cli.config)?;
            init_logging(&config, cli.debug)?;
            show_status(&config).await?
        }
        Commands::InitDb { database_url } => {
            init_logging_default(cli.debug)?;
            init_database(&database_url).await?
        }
    }

    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load configuration from {path}"))
}

/// Initialize tracing from the config's logging section.
fn init_logging(config: &Config, debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("witscan_indexer=debug,witscan_core=debug,sqlx=warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("witscan_indexer={0},sqlx=warn", config.logging.level))
        })
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }

    Ok(())
}

fn init_logging_default(debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("witscan_indexer={level}")));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
    Ok(())
}

/// Main indexer service: spawns the three ingestion loops and waits for
/// shutdown or a loop failure.
async fn run_indexer(config: Config) -> Result<()> {
    info!("  Network: {}", config.network.name);
    info!("  Nodes: {:?}", config.node.addresses);
    info!("  Database: {}", config.database.url);
    info!("  Start epoch: {}", config.insert.start_epoch);

    let storage = Storage::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    info!("Database initialized");

    let pool = NodePool::new(&config.node.addresses, config.rpc_timeout());
    info!("Node pool initialized ({} connections)", pool.size());

    // Blocks until the store or a node hands over the constants; the epoch
    // clock cannot run without them.
    let constants = fetch_consensus_constants(&storage, &pool)
        .await
        .context("Failed to obtain consensus constants")?;
    info!(
        "Consensus constants loaded (epoch period {}s, superblock period {})",
        constants.checkpoints_period, constants.superblock_period
    );

    let (unconfirmed_tx, unconfirmed_rx) = tokio::sync::mpsc::channel(UNCONFIRMED_QUEUE);

    let insert = InsertLoop::new(
        &config,
        storage.clone(),
        pool.clone(),
        constants,
        unconfirmed_tx,
    );
    let insert_handle = tokio::spawn(insert.run());
    info!("Insert loop started");

    let confirm = ConfirmLoop::new(
        &config,
        storage.clone(),
        pool.clone(),
        constants,
        unconfirmed_rx,
    );
    let confirm_handle = tokio::spawn(confirm.run());
    info!(
        "Confirm loop started (sweep interval: {}s)",
        config.confirm.interval_secs
    );

    let pending = PendingLoop::new(&config, storage.clone(), pool.clone(), constants);
    let pending_handle = tokio::spawn(pending.run());
    info!(
        "Pending loop started (sample interval: {}s)",
        config.pending.interval_secs
    );

    info!("Indexer is running. Press Ctrl+C to stop.");

    // The loops only return by panicking; any completion is abnormal.
    tokio::select! {
        result = insert_handle => {
            storage.close().await;
            warn!("Insert loop exited unexpectedly");
            result.map_err(|e| anyhow::anyhow!("Insert loop panicked: {e}"))
        }
        result = confirm_handle => {
            storage.close().await;
            warn!("Confirm loop exited unexpectedly");
            result.map_err(|e| anyhow::anyhow!("Confirm loop panicked: {e}"))
        }
        result = pending_handle => {
            storage.close().await;
            warn!("Pending loop exited unexpectedly");
            result.map_err(|e| anyhow::anyhow!("Pending loop panicked: {e}"))
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received shutdown signal, gracefully shutting down");
            storage.close().await;
            Ok(())
        }
    }
}

/// Show indexer status and sync progress.
async fn show_status(config: &Config) -> Result<()> {
    let storage = Storage::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let sync_state = storage.get_sync_state().await?;
    let stats = storage.stats().await?;

    println!("\n=== witscan Indexer Status ===\n");
    println!("Sync Progress:");
    println!("  Network: {}", config.network.name);
    println!("  Last Epoch: {}", sync_state.last_epoch);
    println!(
        "  Last Updated: {}",
        chrono::DateTime::from_timestamp(sync_state.updated_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );

    println!("\nDatabase Statistics:");
    println!("  Indexed Blocks: {}", stats.block_count);
    println!("  Confirmed Blocks: {}", stats.confirmed_count);
    println!("  Data Requests: {}", stats.data_request_count);
    println!("  Tracked Addresses: {}", stats.address_count);
    println!();

    storage.close().await;
    Ok(())
}

/// Initialize the database.
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, 5)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Blocks: {}", stats.block_count);
    info!("  Addresses: {}", stats.address_count);
    info!("  Last epoch: {}", stats.last_epoch);

    storage.close().await;
    Ok(())
}
