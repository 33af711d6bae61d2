//! Storage layer for the witscan indexer.
//!
//! This module provides database operations for:
//! - Blocks and the six transaction tables
//! - The shared hash index
//! - Address activity counters
//! - Sync state, persisted consensus constants, and protocol upgrades
//! - Mempool fee histograms

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub mod addresses;
pub mod batch;
pub mod blocks;
pub mod hashes;
pub mod pending;
pub mod state;
pub mod transactions;
pub mod types;

pub use batch::EpochBatch;
pub use types::*;

/// Database storage for the indexer.
///
/// Provides async access to SQLite database with connection pooling.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist. Call
    /// [`Storage::run_migrations`] before first use.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let database_url = format!("sqlite://{}", path.display());
        Self::new(&database_url, 5).await
    }

    /// Run database migrations.
    ///
    /// This should be called once during initialization to ensure the schema is up to date.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    ///
    /// This is useful for custom queries or transactions.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let block_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
            .fetch_one(&self.pool)
            .await?;

        let confirmed_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE confirmed = 1")
                .fetch_one(&self.pool)
                .await?;

        let data_request_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM data_request_txns")
                .fetch_one(&self.pool)
                .await?;

        let address_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM addresses")
            .fetch_one(&self.pool)
            .await?;

        let sync_state = self.get_sync_state().await?;

        Ok(DatabaseStats {
            block_count: block_count as u64,
            confirmed_count: confirmed_count as u64,
            data_request_count: data_request_count as u64,
            address_count: address_count as u64,
            last_epoch: sync_state.last_epoch,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        // Simple query to check if database is responsive
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of indexed blocks
    pub block_count: u64,

    /// Number of superblock-confirmed blocks
    pub confirmed_count: u64,

    /// Total number of data requests
    pub data_request_count: u64,

    /// Total number of tracked addresses
    pub address_count: u64,

    /// Highest fully ingested epoch (-1 when empty)
    pub last_epoch: i64,
}

/// Serialize an array-valued column as JSON text.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize column to JSON")
}

/// Deserialize an array-valued column from JSON text.
pub(crate) fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).context("Failed to deserialize JSON column")
}
