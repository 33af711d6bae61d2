//! Finality reconciliation.
//!
//! Blocks arrive unconfirmed and stay that way until a superblock commits
//! to them. Once a tracked block ages past the finality window this loop
//! asks the chain digest what actually happened at its epoch: the same
//! hash gets promoted when the node reports it confirmed, a different hash
//! means a fork replaced it, and a missing epoch means a rollback with no
//! replacement.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use witscan_core::{ConsensusConstants, Hash};

use super::{ingest_block, notify_batch, stored_activations};
use crate::config::Config;
use crate::node::NodePool;
use crate::notify::AddressCacheClient;
use crate::storage::Storage;

pub struct ConfirmLoop {
    storage: Storage,
    pool: NodePool,
    cache: AddressCacheClient,
    constants: ConsensusConstants,
    hrp: String,
    interval: Duration,
    unconfirmed_rx: mpsc::Receiver<(u32, Hash)>,
    /// Tracked unconfirmed blocks, oldest first.
    pending: BTreeMap<u32, Hash>,
}

impl ConfirmLoop {
    pub fn new(
        config: &Config,
        storage: Storage,
        pool: NodePool,
        constants: ConsensusConstants,
        unconfirmed_rx: mpsc::Receiver<(u32, Hash)>,
    ) -> Self {
        ConfirmLoop {
            storage,
            pool,
            cache: AddressCacheClient::new(config.address_cache.address.clone()),
            constants,
            hrp: config.network.address_hrp.clone(),
            interval: Duration::from_secs(config.confirm.interval_secs),
            unconfirmed_rx,
            pending: BTreeMap::new(),
        }
    }

    pub async fn run(mut self) {
        // Unconfirmed blocks written before a restart are not in the
        // channel; pick them up from the store.
        match self.storage.unconfirmed_blocks_before(u32::MAX).await {
            Ok(rows) => {
                for (epoch, hash) in rows {
                    self.pending.insert(epoch, hash);
                }
            }
            Err(e) => warn!(error = %e, "Could not re-seed unconfirmed blocks"),
        }

        loop {
            tokio::time::sleep(self.interval).await;
            while let Ok((epoch, hash)) = self.unconfirmed_rx.try_recv() {
                self.pending.insert(epoch, hash);
            }
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "Confirmation sweep aborted");
            }
        }
    }

    async fn sweep(&mut self) -> Result<()> {
        let Some((&oldest, _)) = self.pending.iter().next() else {
            return Ok(());
        };
        let Some(now_epoch) = self.constants.epoch_at(Utc::now().timestamp()) else {
            warn!("Clock predates checkpoint zero, sweep skipped");
            return Ok(());
        };
        let cutoff = now_epoch.saturating_sub(self.constants.finality_window());
        if oldest > cutoff {
            return Ok(());
        }

        let ripe: Vec<(u32, Hash)> = self
            .pending
            .range(..=cutoff)
            .map(|(epoch, hash)| (*epoch, *hash))
            .collect();
        let span = i64::from(cutoff - oldest) + 1;
        let digest = {
            let mut node = self.pool.acquire().await;
            node.get_blockchain(i64::from(oldest), span)
                .await
                .context("Chain digest unavailable, sweep postponed")?
        };
        let canonical: HashMap<u32, Hash> = digest
            .into_iter()
            .map(|(epoch, hash)| Ok((epoch, Hash::from_hex(&hash)?)))
            .collect::<Result<_>>()?;

        for (epoch, hash) in ripe {
            match canonical.get(&epoch) {
                None => self.revert(epoch, hash).await?,
                Some(chain_hash) if *chain_hash != hash => {
                    self.replace(epoch, hash, *chain_hash).await?
                }
                Some(_) => self.promote(epoch, hash).await?,
            }
        }
        Ok(())
    }

    /// The chain still carries our hash; promote once the node reports the
    /// superblock sealed it.
    async fn promote(&mut self, epoch: u32, hash: Hash) -> Result<()> {
        let block = {
            let mut node = self.pool.acquire().await;
            node.get_block(&hash)
                .await
                .with_context(|| format!("Could not re-fetch block at epoch {epoch}"))?
        };
        let confirmed = block
            .get("confirmed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !confirmed {
            // Still inside the superblock vote; check again next sweep.
            return Ok(());
        }

        self.storage.mark_block_confirmed(&hash).await?;
        let deltas = self.storage.derive_address_deltas_at_epoch(epoch).await?;
        let addresses: Vec<String> = deltas.keys().cloned().collect();
        self.cache.confirm(epoch, &addresses).await;
        self.pending.remove(&epoch);
        info!(epoch, block = %hash, "Block confirmed");
        Ok(())
    }

    /// The chain dropped the epoch entirely.
    async fn revert(&mut self, epoch: u32, hash: Hash) -> Result<()> {
        let addresses = self.undo_block(epoch, &hash, false).await?;
        self.cache.revert(epoch, &addresses).await;
        self.pending.remove(&epoch);
        warn!(epoch, block = %hash, "Block rolled back, no replacement on chain");
        Ok(())
    }

    /// A fork replaced our block; drop the stale rows and ingest the
    /// canonical block through the normal path.
    async fn replace(&mut self, epoch: u32, stale: Hash, canonical: Hash) -> Result<()> {
        let stale_addresses = self.undo_block(epoch, &stale, true).await?;
        self.cache.revert(epoch, &stale_addresses).await;
        warn!(epoch, stale = %stale, replacement = %canonical, "Fork replaced block");

        let block = {
            let mut node = self.pool.acquire().await;
            node.get_block(&canonical)
                .await
                .with_context(|| format!("Could not fetch replacement block at epoch {epoch}"))?
        };
        let wips = stored_activations(&self.storage).await?;
        let outcome = ingest_block(
            &self.storage,
            &self.pool,
            &self.hrp,
            &wips,
            canonical,
            &block,
        )
        .await?;
        notify_batch(&mut self.cache, &outcome.batch).await;

        if outcome.confirmed {
            self.storage.mark_block_confirmed(&canonical).await?;
            let addresses: Vec<String> = outcome.batch.touched_addresses();
            self.cache.confirm(epoch, &addresses).await;
            self.pending.remove(&epoch);
        } else {
            self.pending.insert(epoch, canonical);
        }
        Ok(())
    }

    /// Subtract a block's address deltas and either delete its rows (fork
    /// replacement) or keep them flagged reverted (plain rollback).
    async fn undo_block(
        &mut self,
        epoch: u32,
        hash: &Hash,
        remove_rows: bool,
    ) -> Result<Vec<String>> {
        let deltas = self.storage.derive_address_deltas_at_epoch(epoch).await?;
        for (address, delta) in &deltas {
            self.storage.revert_address_delta(address, delta).await?;
        }
        if remove_rows {
            self.storage.remove_block_rows(hash, epoch).await?;
        } else {
            self.storage.mark_block_reverted(hash).await?;
        }
        Ok(deltas.keys().cloned().collect())
    }
}
