//! The three ingestion loops.
//!
//! Insert walks the chain digest forward and writes one [`EpochBatch`] per
//! block. Confirm reconciles unconfirmed blocks once they age past the
//! finality window, promoting, reverting, or replacing them. Pending
//! samples the mempool into fee histograms between epochs.
//!
//! The block-to-batch path is shared: the confirm loop re-ingests a
//! replacement block through the exact code the insert loop used for the
//! stale one.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use witscan_core::radon::{TableActivations, WipActivations, MAINNET_ACTIVATIONS};
use witscan_core::{ConsensusConstants, Hash, TransactionKind};

use crate::address_index::derive_address_deltas;
use crate::codec::{
    decode_commit, decode_data_request, decode_mint, decode_reveal, decode_tally,
    decode_value_transfer, InputResolver, KeyedSignatureJson,
};
use crate::node::NodePool;
use crate::notify::{AddressCacheClient, CacheFunction};
use crate::storage::{BlockRecord, EpochBatch, HashKind, HashRecord, Storage};

mod confirm;
mod insert;
mod pending;

pub use confirm::ConfirmLoop;
pub use insert::InsertLoop;
pub use pending::PendingLoop;

#[derive(Debug, Deserialize)]
struct BlockJson {
    block_header: BlockHeaderJson,
    block_sig: KeyedSignatureJson,
    txns: BlockTxnsJson,
    #[serde(default)]
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct BlockHeaderJson {
    beacon: BeaconJson,
    #[serde(default)]
    signals: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct BeaconJson {
    checkpoint: u32,
}

#[derive(Debug, Deserialize)]
struct BlockTxnsJson {
    mint: Value,
    #[serde(default)]
    value_transfer_txns: Vec<Value>,
    #[serde(default)]
    data_request_txns: Vec<Value>,
    #[serde(default)]
    commit_txns: Vec<Value>,
    #[serde(default)]
    reveal_txns: Vec<Value>,
    #[serde(default)]
    tally_txns: Vec<Value>,
}

/// Result of ingesting one block.
pub(crate) struct IngestOutcome {
    pub batch: EpochBatch,
    /// The node's own confirmation flag at fetch time.
    pub confirmed: bool,
}

/// Decode a block into an [`EpochBatch`] and commit it.
///
/// Transactions decode in chain order; input resolution may call out to a
/// node for outputs this store has not ingested yet. Any decode failure
/// aborts the whole block, nothing partial is written.
pub(crate) async fn ingest_block(
    storage: &Storage,
    pool: &NodePool,
    hrp: &str,
    wips: &dyn WipActivations,
    block_hash: Hash,
    block: &Value,
) -> Result<IngestOutcome> {
    let parsed: BlockJson = serde_json::from_value(block.clone())
        .with_context(|| format!("Malformed block {block_hash}"))?;
    let epoch = parsed.block_header.beacon.checkpoint;
    let miner = parsed
        .block_sig
        .address(hrp)
        .context("Invalid block signature key")?;
    let resolver = InputResolver::new(storage, pool);

    let mut batch = EpochBatch::new(BlockRecord {
        block_hash,
        epoch,
        confirmed: parsed.confirmed,
        signals: parsed.block_header.signals,
        ..Default::default()
    });

    let mint = decode_mint(&parsed.txns.mint, epoch, &miner)
        .with_context(|| format!("Block {epoch}: bad mint"))?;
    batch.hashes.push(HashRecord {
        hash: mint.txn_hash,
        kind: HashKind::Transaction(TransactionKind::Mint),
        epoch: Some(epoch),
    });
    batch.mints.push(mint);

    for txn in &parsed.txns.value_transfer_txns {
        let rec = decode_value_transfer(txn, epoch, hrp, &resolver)
            .await
            .with_context(|| format!("Block {epoch}: bad value transfer"))?;
        batch.block.vt_weight += rec.weight;
        batch.hashes.push(HashRecord {
            hash: rec.txn_hash,
            kind: HashKind::Transaction(TransactionKind::ValueTransfer),
            epoch: Some(epoch),
        });
        batch.value_transfers.push(rec);
    }

    for txn in &parsed.txns.data_request_txns {
        let rec = decode_data_request(txn, epoch, hrp, wips, &resolver)
            .await
            .with_context(|| format!("Block {epoch}: bad data request"))?;
        batch.block.dr_weight += rec.weight;
        batch.hashes.push(HashRecord {
            hash: rec.txn_hash,
            kind: HashKind::Transaction(TransactionKind::DataRequest),
            epoch: Some(epoch),
        });
        batch.hashes.push(HashRecord {
            hash: rec.rad_bytes_hash,
            kind: HashKind::RadBytecode,
            epoch: None,
        });
        batch.hashes.push(HashRecord {
            hash: rec.dro_bytes_hash,
            kind: HashKind::DroBytecode,
            epoch: None,
        });
        batch.data_requests.push(rec);
    }

    for txn in &parsed.txns.commit_txns {
        let rec = decode_commit(txn, epoch, hrp, &resolver)
            .await
            .with_context(|| format!("Block {epoch}: bad commit"))?;
        batch.hashes.push(HashRecord {
            hash: rec.txn_hash,
            kind: HashKind::Transaction(TransactionKind::Commit),
            epoch: Some(epoch),
        });
        batch.commits.push(rec);
    }

    for txn in &parsed.txns.reveal_txns {
        let rec = decode_reveal(txn, epoch, hrp)
            .with_context(|| format!("Block {epoch}: bad reveal"))?;
        batch.hashes.push(HashRecord {
            hash: rec.txn_hash,
            kind: HashKind::Transaction(TransactionKind::Reveal),
            epoch: Some(epoch),
        });
        batch.reveals.push(rec);
    }

    for txn in &parsed.txns.tally_txns {
        let rec = decode_tally(txn, epoch)
            .with_context(|| format!("Block {epoch}: bad tally"))?;
        batch.hashes.push(HashRecord {
            hash: rec.txn_hash,
            kind: HashKind::Transaction(TransactionKind::Tally),
            epoch: Some(epoch),
        });
        batch.tallies.push(rec);
    }

    batch.block.value_transfer_count = batch.value_transfers.len() as u32;
    batch.block.data_request_count = batch.data_requests.len() as u32;
    batch.block.commit_count = batch.commits.len() as u32;
    batch.block.reveal_count = batch.reveals.len() as u32;
    batch.block.tally_count = batch.tallies.len() as u32;
    batch.block.block_weight = batch.block.vt_weight + batch.block.dr_weight;

    derive_address_deltas(&mut batch, &miner);
    storage.commit_epoch(&batch).await?;

    Ok(IngestOutcome {
        batch,
        confirmed: parsed.confirmed,
    })
}

/// Fan a freshly ingested batch out to the address cache, one message per
/// activity kind.
pub(crate) async fn notify_batch(cache: &mut AddressCacheClient, batch: &EpochBatch) {
    if !cache.enabled() {
        return;
    }
    let epoch = batch.epoch();
    cache
        .update(epoch, CacheFunction::Blocks, &batch.touched_addresses())
        .await;

    let mut vt_parties = std::collections::BTreeSet::new();
    for rec in &batch.value_transfers {
        vt_parties.extend(rec.input_addresses.iter().cloned());
        vt_parties.extend(rec.output_addresses.iter().cloned());
    }
    let vt_parties: Vec<String> = vt_parties.into_iter().collect();
    cache
        .update(epoch, CacheFunction::ValueTransfers, &vt_parties)
        .await;

    let mut launchers = std::collections::BTreeSet::new();
    for rec in &batch.data_requests {
        launchers.extend(rec.input_addresses.iter().cloned());
    }
    let launchers: Vec<String> = launchers.into_iter().collect();
    cache
        .update(epoch, CacheFunction::DataRequestsLaunched, &launchers)
        .await;

    let mut solvers = std::collections::BTreeSet::new();
    for rec in &batch.tallies {
        solvers.extend(rec.output_addresses.iter().cloned());
        solvers.extend(rec.error_addresses.iter().cloned());
        solvers.extend(rec.liar_addresses.iter().cloned());
    }
    let solvers: Vec<String> = solvers.into_iter().collect();
    cache
        .update(epoch, CacheFunction::DataRequestsSolved, &solvers)
        .await;
}

/// Load consensus constants, preferring the store over the node.
///
/// A fresh database blocks here until a node answers; transient node
/// failures retry at the error's suggested pace. Once obtained the
/// constants are immutable for the process lifetime.
pub async fn fetch_consensus_constants(
    storage: &Storage,
    pool: &NodePool,
) -> Result<ConsensusConstants> {
    if let Some(constants) = storage.load_consensus_constants().await? {
        return Ok(constants);
    }

    loop {
        let fetched = {
            let mut node = pool.acquire().await;
            node.get_consensus_constants().await
        };
        match fetched {
            Ok(constants) => {
                storage.save_consensus_constants(&constants).await?;
                return Ok(constants);
            }
            Err(e) => match e.retry_after() {
                Some(delay) => {
                    warn!(error = %e, "Consensus constants unavailable, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(e).context("Failed to fetch consensus constants");
                }
            },
        }
    }
}

/// Protocol-upgrade table from the store, falling back to the mainnet
/// defaults when nothing has been synced yet.
pub(crate) async fn stored_activations(storage: &Storage) -> Result<TableActivations> {
    let stored = storage.load_wips().await?;
    if stored.is_empty() {
        let defaults = MAINNET_ACTIVATIONS
            .iter()
            .map(|(title, epoch)| (title.to_string(), *epoch))
            .collect();
        return Ok(TableActivations::new(defaults));
    }
    Ok(TableActivations::new(stored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use witscan_core::radon::MainnetActivations;

    async fn open() -> (Storage, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp.path()).await.unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp)
    }

    fn idle_pool() -> NodePool {
        // Never dialed by these tests.
        NodePool::new(&["127.0.0.1:1".to_string()], Duration::from_secs(1))
    }

    pub(super) fn mint_only_block(epoch: u32, seed: u8) -> Value {
        json!({
            "block_header": {
                "beacon": {"checkpoint": epoch},
                "signals": 1
            },
            "block_sig": {
                "public_key": {"bytes": vec![seed; 32], "compressed": 2}
            },
            "txns": {
                "mint": {
                    "hash": hex::encode([seed ^ 0x55; 32]),
                    "outputs": [{"pkh": "wit1miner", "value": 250_000_000_000u64}]
                }
            },
            "confirmed": false
        })
    }

    #[tokio::test]
    async fn mint_only_block_commits() {
        let (storage, _temp) = open().await;
        let pool = idle_pool();
        let hash = Hash::new([0x10; 32]);
        let outcome = ingest_block(
            &storage,
            &pool,
            "wit",
            &MainnetActivations,
            hash,
            &mint_only_block(42, 7),
        )
        .await
        .unwrap();

        assert!(!outcome.confirmed);
        assert_eq!(outcome.batch.epoch(), 42);
        assert_eq!(outcome.batch.mints.len(), 1);

        let block = storage.get_block(&hash).await.unwrap().unwrap();
        assert_eq!(block.epoch, 42);
        assert_eq!(block.signals, Some(1));
        assert!(!block.confirmed);
        assert_eq!(storage.get_sync_state().await.unwrap().last_epoch, 42);
        // The block's miner address got a delta.
        let miner = outcome.batch.mints[0].miner.clone();
        assert_eq!(storage.get_address(&miner).await.unwrap().unwrap().blocks, 1);
    }

    #[tokio::test]
    async fn block_with_local_inputs_resolves_without_node() {
        let (storage, _temp) = open().await;
        let pool = idle_pool();

        // Epoch 10 plants a mint output the epoch 11 transfer spends.
        let mint_hash = hex::encode([7u8 ^ 0x55; 32]);
        ingest_block(
            &storage,
            &pool,
            "wit",
            &MainnetActivations,
            Hash::new([0x10; 32]),
            &mint_only_block(10, 7),
        )
        .await
        .unwrap();

        let spend = json!({
            "block_header": {"beacon": {"checkpoint": 11}},
            "block_sig": {
                "public_key": {"bytes": vec![9u8; 32], "compressed": 3}
            },
            "txns": {
                "mint": {
                    "hash": hex::encode([0x21; 32]),
                    "outputs": [{"pkh": "wit1miner", "value": 250_000_000_000u64}]
                },
                "value_transfer_txns": [{
                    "hash": hex::encode([0x22; 32]),
                    "body": {
                        "inputs": [{"output_pointer": format!("{mint_hash}:0")}],
                        "outputs": [{"pkh": "wit1payee", "value": 249_999_999_000u64}]
                    },
                    "signatures": [
                        {"public_key": {"bytes": vec![5u8; 32], "compressed": 2}}
                    ]
                }]
            },
            "confirmed": true
        });
        let outcome = ingest_block(
            &storage,
            &pool,
            "wit",
            &MainnetActivations,
            Hash::new([0x11; 32]),
            &spend,
        )
        .await
        .unwrap();

        assert!(outcome.confirmed);
        let vt = &outcome.batch.value_transfers[0];
        assert_eq!(vt.input_values, vec![250_000_000_000]);
        assert_eq!(vt.fee, 1_000);
        assert_eq!(outcome.batch.block.value_transfer_count, 1);
        assert_eq!(
            outcome.batch.block.block_weight,
            outcome.batch.block.vt_weight
        );
    }

    #[tokio::test]
    async fn stored_activations_fall_back_to_mainnet() {
        let (storage, _temp) = open().await;
        let wips = stored_activations(&storage).await.unwrap();
        assert!(wips.is_active("WIP0017-0018-0019", 683_541));

        let mut custom = std::collections::HashMap::new();
        custom.insert("WIP0020-0021".to_string(), 50u32);
        storage.replace_wips(&custom).await.unwrap();
        let wips = stored_activations(&storage).await.unwrap();
        assert!(wips.is_active("WIP0020-0021", 50));
        assert!(!wips.is_active("WIP0017-0018-0019", 683_541));
    }

    #[tokio::test]
    async fn consensus_constants_come_from_store_when_present() {
        let (storage, _temp) = open().await;
        let constants = ConsensusConstants {
            checkpoint_zero_timestamp: 1_602_666_000,
            checkpoints_period: 45,
            superblock_period: 10,
            collateral_minimum: 1_000_000_000,
            halving_period: 3_500_000,
            initial_block_reward: 250_000_000_000,
        };
        storage.save_consensus_constants(&constants).await.unwrap();

        // The pool points nowhere; the store must answer.
        let loaded = fetch_consensus_constants(&storage, &idle_pool())
            .await
            .unwrap();
        assert_eq!(loaded, constants);
    }
}
