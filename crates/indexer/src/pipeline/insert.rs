//! Forward ingestion.
//!
//! Each cycle fetches the chain digest after the sync watermark and
//! ingests the returned blocks strictly in order. A failing block is never
//! skipped; the watermark stays put and the next cycle retries it. Between
//! cycles the loop sleeps to the next epoch boundary, so a caught-up
//! indexer wakes once per epoch.

use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use witscan_core::radon::TableActivations;
use witscan_core::{ConsensusConstants, Hash};

use super::{ingest_block, notify_batch, stored_activations};
use crate::config::Config;
use crate::node::NodePool;
use crate::notify::AddressCacheClient;
use crate::storage::Storage;

pub struct InsertLoop {
    storage: Storage,
    pool: NodePool,
    cache: AddressCacheClient,
    constants: ConsensusConstants,
    hrp: String,
    start_epoch: u32,
    batch_size: i64,
    /// Unconfirmed blocks handed to the confirm loop.
    unconfirmed_tx: mpsc::Sender<(u32, Hash)>,
}

impl InsertLoop {
    pub fn new(
        config: &Config,
        storage: Storage,
        pool: NodePool,
        constants: ConsensusConstants,
        unconfirmed_tx: mpsc::Sender<(u32, Hash)>,
    ) -> Self {
        InsertLoop {
            storage,
            pool,
            cache: AddressCacheClient::new(config.address_cache.address.clone()),
            constants,
            hrp: config.network.address_hrp.clone(),
            start_epoch: config.insert.start_epoch,
            batch_size: config.insert.batch_size,
            unconfirmed_tx,
        }
    }

    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.cycle().await {
                warn!(error = %e, "Ingestion cycle failed");
            }
            let wait = self.constants.until_next_epoch(Utc::now().timestamp());
            tokio::time::sleep(Duration::from_secs(wait)).await;
        }
    }

    async fn cycle(&mut self) -> Result<()> {
        let wips = self.refresh_wips().await?;

        let last = self.storage.get_sync_state().await?.last_epoch;
        let next = (last + 1).max(i64::from(self.start_epoch));
        let digest = {
            let mut node = self.pool.acquire().await;
            match node.get_blockchain(next, self.batch_size).await {
                Ok(digest) => digest,
                Err(e) => {
                    warn!(error = %e, from = next, "Chain digest unavailable");
                    return Ok(());
                }
            }
        };
        if digest.is_empty() {
            debug!(from = next, "Caught up, no new blocks");
            return Ok(());
        }

        for (epoch, hash_hex) in digest {
            let hash = Hash::from_hex(&hash_hex)?;
            let block = {
                let mut node = self.pool.acquire().await;
                node.get_block(&hash).await
            };
            let block = match block {
                Ok(block) => block,
                Err(e) => {
                    // Blocks ingest strictly in order; resume here next cycle.
                    warn!(error = %e, epoch, "Block fetch failed, pausing catch-up");
                    break;
                }
            };

            let outcome =
                ingest_block(&self.storage, &self.pool, &self.hrp, &wips, hash, &block).await?;
            info!(
                epoch,
                block = %hash,
                txns = outcome.batch.transaction_count(),
                confirmed = outcome.confirmed,
                "Ingested block"
            );
            notify_batch(&mut self.cache, &outcome.batch).await;

            if !outcome.confirmed {
                if let Err(e) = self.unconfirmed_tx.try_send((epoch, hash)) {
                    // The confirm loop re-seeds from storage, so a full
                    // channel loses nothing permanent.
                    debug!(error = %e, epoch, "Confirm queue full");
                }
            }
        }
        Ok(())
    }

    /// Sync the node's protocol-upgrade windows into the store. A node
    /// failure falls back to whatever the store already has.
    async fn refresh_wips(&mut self) -> Result<TableActivations> {
        let fetched = {
            let mut node = self.pool.acquire().await;
            node.get_supported_wips().await
        };
        match fetched {
            Ok(wips) => {
                self.storage.replace_wips(&wips).await?;
                Ok(TableActivations::new(wips))
            }
            Err(e) => {
                debug!(error = %e, "Protocol upgrade refresh failed, using stored table");
                stored_activations(&self.storage).await
            }
        }
    }
}
