//! Mempool sampling.
//!
//! Each cycle snapshots the mempool, works out fee and weight for every
//! transaction not seen before, and persists one priority histogram per
//! transaction kind. Fee and weight are memoized per hash, so a
//! transaction lingering in the mempool costs one node round trip total,
//! not one per sample. Decoding stops a few seconds before the next poll
//! is due; whatever was not reached stays unmemoized for the next cycle.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use witscan_core::{ConsensusConstants, Hash};

use super::stored_activations;
use crate::codec::{self, calculate_priority, InputResolver};
use crate::config::Config;
use crate::node::NodePool;
use crate::storage::{PendingSample, Storage};

/// Seconds reserved at the end of each interval for the write-out.
const DECODE_MARGIN: Duration = Duration::from_secs(3);

/// Histogram samples older than this are pruned.
const SAMPLE_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

pub struct PendingLoop {
    storage: Storage,
    pool: NodePool,
    constants: ConsensusConstants,
    interval: Duration,
    /// Memoized `(fee, weight)` per mempool transaction.
    known_drs: HashMap<Hash, (u64, u64)>,
    known_vts: HashMap<Hash, (u64, u64)>,
}

impl PendingLoop {
    pub fn new(
        config: &Config,
        storage: Storage,
        pool: NodePool,
        constants: ConsensusConstants,
    ) -> Self {
        PendingLoop {
            storage,
            pool,
            constants,
            interval: Duration::from_secs(config.pending.interval_secs),
            known_drs: HashMap::new(),
            known_vts: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.sample().await {
                warn!(error = %e, "Mempool sample failed");
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn sample(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.interval.saturating_sub(DECODE_MARGIN);

        let Some(epoch) = self.constants.epoch_at(Utc::now().timestamp()) else {
            warn!("Clock predates checkpoint zero, sample skipped");
            return Ok(());
        };

        let mempool = {
            let mut node = self.pool.acquire().await;
            match node.get_mempool().await {
                Ok(mempool) => mempool,
                Err(e) => {
                    warn!(error = %e, "Mempool unavailable");
                    return Ok(());
                }
            }
        };

        // Transactions that left the mempool (mined or dropped) are
        // forgotten so the memo tables track the live set.
        let live_drs: HashSet<Hash> = mempool.data_request.iter().copied().collect();
        let live_vts: HashSet<Hash> = mempool.value_transfer.iter().copied().collect();
        self.known_drs.retain(|hash, _| live_drs.contains(hash));
        self.known_vts.retain(|hash, _| live_vts.contains(hash));

        let wips = stored_activations(&self.storage).await?;
        let resolver = InputResolver::new(&self.storage, &self.pool);

        for hash in &mempool.data_request {
            if self.known_drs.contains_key(hash) {
                continue;
            }
            if Instant::now() >= deadline {
                debug!(queued = mempool.data_request.len(), "Decode budget exhausted");
                break;
            }
            let Some(txn) = self.fetch(hash).await else {
                continue;
            };
            match codec::data_request::pending_fee_weight(&txn, epoch, &wips, &resolver).await {
                Ok(pair) => {
                    self.known_drs.insert(*hash, pair);
                }
                Err(e) => debug!(error = %e, txn = %hash, "Pending data request undecodable"),
            }
        }

        for hash in &mempool.value_transfer {
            if self.known_vts.contains_key(hash) {
                continue;
            }
            if Instant::now() >= deadline {
                debug!(queued = mempool.value_transfer.len(), "Decode budget exhausted");
                break;
            }
            let Some(txn) = self.fetch(hash).await else {
                continue;
            };
            match codec::value_transfer::pending_fee_weight(&txn, &resolver).await {
                Ok(pair) => {
                    self.known_vts.insert(*hash, pair);
                }
                Err(e) => debug!(error = %e, txn = %hash, "Pending value transfer undecodable"),
            }
        }

        let now = Utc::now().timestamp();
        self.storage
            .insert_pending_data_requests(&histogram(now, self.known_drs.values()))
            .await?;
        self.storage
            .insert_pending_value_transfers(&histogram(now, self.known_vts.values()))
            .await?;
        self.storage
            .prune_pending_before(now - SAMPLE_RETENTION.as_secs() as i64)
            .await?;
        Ok(())
    }

    /// Fetch one mempool transaction, unwrapping the response envelope.
    async fn fetch(&self, hash: &Hash) -> Option<serde_json::Value> {
        let mut node = self.pool.acquire().await;
        match node.get_transaction(hash).await {
            Ok(mut response) => Some(
                response
                    .get_mut("transaction")
                    .map(serde_json::Value::take)
                    .unwrap_or(response),
            ),
            Err(e) => {
                debug!(error = %e, txn = %hash, "Pending transaction fetch failed");
                None
            }
        }
    }
}

/// Bucket memoized transactions by rounded fee-per-weight priority.
fn histogram<'a>(
    timestamp: i64,
    entries: impl Iterator<Item = &'a (u64, u64)>,
) -> PendingSample {
    let mut buckets: BTreeMap<u64, u64> = BTreeMap::new();
    for (fee, weight) in entries {
        let priority = calculate_priority(*fee, *weight, true);
        *buckets.entry(priority).or_insert(0) += 1;
    }
    PendingSample {
        timestamp,
        fee_per_unit: buckets.keys().copied().collect(),
        num_txns: buckets.values().copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn pre_genesis_clock_skips_the_sample() {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp.path()).await.unwrap();
        storage.run_migrations().await.unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dialed = Arc::new(AtomicBool::new(false));
        {
            let dialed = Arc::clone(&dialed);
            tokio::spawn(async move {
                if listener.accept().await.is_ok() {
                    dialed.store(true, Ordering::SeqCst);
                }
            });
        }

        let config = Config::from_toml_str(&format!(
            r#"
            [node]
            addresses = ["{addr}"]
            [database]
            url = "sqlite::memory:"
            "#
        ))
        .unwrap();
        let pool = NodePool::new(&config.node.addresses, Duration::from_secs(1));
        let constants = ConsensusConstants {
            checkpoint_zero_timestamp: Utc::now().timestamp() + 3_600,
            checkpoints_period: 45,
            superblock_period: 10,
            collateral_minimum: 1_000_000_000,
            halving_period: 3_500_000,
            initial_block_reward: 250_000_000_000,
        };
        let mut sampler = PendingLoop::new(&config, storage.clone(), pool, constants);
        sampler.sample().await.unwrap();

        // The skip happens before the mempool call, so the node is never
        // dialed and no histogram row lands.
        assert!(!dialed.load(Ordering::SeqCst));
        let samples = storage
            .recent_pending_samples("pending_data_request_txns", 10)
            .await
            .unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn histogram_buckets_by_priority() {
        // Priorities: 0 (zero fee), 1 (clamped), 2 (rounded 1.5), 2 again.
        let entries = [(0u64, 100u64), (1, 1000), (1500, 1000), (2000, 1000)];
        let sample = histogram(1_700_000_000, entries.iter());
        assert_eq!(sample.fee_per_unit, vec![0, 1, 2]);
        assert_eq!(sample.num_txns, vec![1, 1, 2]);
    }

    #[test]
    fn empty_mempool_yields_empty_sample() {
        let sample = histogram(1_700_000_000, [].iter());
        assert!(sample.fee_per_unit.is_empty());
        assert!(sample.num_txns.is_empty());
    }
}
