//! Per-epoch write batch.
//!
//! A block decodes into one [`EpochBatch`]: the block row, its transaction
//! rows, the hash index entries, and the per-address activity deltas. The
//! whole batch commits in a single transaction, so a crash mid-epoch never
//! leaves a half-ingested block, and `sync_state` only advances with the
//! rows it accounts for.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;

use super::{
    addresses, blocks, hashes, transactions, AddressDelta, BlockRecord, CommitRecord,
    DataRequestRecord, HashKind, HashRecord, MintRecord, RevealRecord, Storage, TallyRecord,
    ValueTransferRecord,
};

/// Everything ingested from one block, committed atomically.
#[derive(Debug, Clone)]
pub struct EpochBatch {
    pub block: BlockRecord,
    pub mints: Vec<MintRecord>,
    pub value_transfers: Vec<ValueTransferRecord>,
    pub data_requests: Vec<DataRequestRecord>,
    pub commits: Vec<CommitRecord>,
    pub reveals: Vec<RevealRecord>,
    pub tallies: Vec<TallyRecord>,
    pub hashes: Vec<HashRecord>,
    /// Deltas keyed by address; BTreeMap keeps the apply order stable.
    pub address_deltas: BTreeMap<String, AddressDelta>,
}

impl EpochBatch {
    /// Start a batch for the given block. The block-hash index entry is
    /// seeded immediately.
    pub fn new(block: BlockRecord) -> Self {
        let hashes = vec![HashRecord {
            hash: block.block_hash,
            kind: HashKind::Block,
            epoch: Some(block.epoch),
        }];
        EpochBatch {
            block,
            mints: Vec::new(),
            value_transfers: Vec::new(),
            data_requests: Vec::new(),
            commits: Vec::new(),
            reveals: Vec::new(),
            tallies: Vec::new(),
            hashes,
            address_deltas: BTreeMap::new(),
        }
    }

    /// The epoch this batch belongs to.
    pub fn epoch(&self) -> u32 {
        self.block.epoch
    }

    /// Addresses touched by this block, for cache notifications.
    pub fn touched_addresses(&self) -> Vec<String> {
        self.address_deltas.keys().cloned().collect()
    }

    /// Merge an activity delta for one address.
    pub fn add_delta(&mut self, address: &str, merge: impl FnOnce(&mut AddressDelta)) {
        let delta = self
            .address_deltas
            .entry(address.to_string())
            .or_insert_with(|| AddressDelta {
                active: self.block.epoch,
                ..Default::default()
            });
        merge(delta);
    }

    /// Total number of transaction rows in the batch.
    pub fn transaction_count(&self) -> usize {
        self.mints.len()
            + self.value_transfers.len()
            + self.data_requests.len()
            + self.commits.len()
            + self.reveals.len()
            + self.tallies.len()
    }
}

impl Storage {
    /// Commit one epoch batch in a single transaction.
    pub async fn commit_epoch(&self, batch: &EpochBatch) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        blocks::upsert_block(&mut tx, &batch.block).await?;
        for rec in &batch.mints {
            transactions::insert_mint(&mut tx, rec).await?;
        }
        for rec in &batch.value_transfers {
            transactions::insert_value_transfer(&mut tx, rec).await?;
        }
        for rec in &batch.data_requests {
            transactions::insert_data_request(&mut tx, rec).await?;
        }
        for rec in &batch.commits {
            transactions::insert_commit(&mut tx, rec).await?;
        }
        for rec in &batch.reveals {
            transactions::insert_reveal(&mut tx, rec).await?;
        }
        for rec in &batch.tallies {
            transactions::insert_tally(&mut tx, rec).await?;
        }
        for rec in &batch.hashes {
            hashes::upsert_hash(&mut tx, rec).await?;
        }
        for (address, delta) in &batch.address_deltas {
            addresses::apply_address_delta(&mut tx, address, delta).await?;
        }

        // Only ever advance; confirm-loop re-ingestion of old epochs must
        // not move the watermark backwards.
        sqlx::query(
            "UPDATE sync_state SET last_epoch = ?, updated_at = ? \
             WHERE id = 1 AND last_epoch < ?",
        )
        .bind(batch.block.epoch as i64)
        .bind(Utc::now().timestamp())
        .bind(batch.block.epoch as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit epoch {}", batch.block.epoch))?;
        Ok(())
    }
}
