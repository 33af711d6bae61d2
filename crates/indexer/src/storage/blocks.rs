//! Block table operations.

use anyhow::{Context, Result};
use sqlx::{Row, SqliteConnection};
use witscan_core::Hash;

use super::{BlockRecord, Storage};

/// Insert or refresh a block row. Re-ingesting the same hash overwrites the
/// aggregate columns; confirmation flags are managed separately.
pub(crate) async fn upsert_block(conn: &mut SqliteConnection, block: &BlockRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO blocks (
            block_hash, epoch,
            value_transfer_count, data_request_count, commit_count,
            reveal_count, tally_count,
            block_weight, vt_weight, dr_weight,
            confirmed, reverted, signals
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(block_hash) DO UPDATE SET
            epoch = excluded.epoch,
            value_transfer_count = excluded.value_transfer_count,
            data_request_count = excluded.data_request_count,
            commit_count = excluded.commit_count,
            reveal_count = excluded.reveal_count,
            tally_count = excluded.tally_count,
            block_weight = excluded.block_weight,
            vt_weight = excluded.vt_weight,
            dr_weight = excluded.dr_weight,
            signals = excluded.signals
        "#,
    )
    .bind(block.block_hash.as_bytes().as_slice())
    .bind(block.epoch as i64)
    .bind(block.value_transfer_count as i64)
    .bind(block.data_request_count as i64)
    .bind(block.commit_count as i64)
    .bind(block.reveal_count as i64)
    .bind(block.tally_count as i64)
    .bind(block.block_weight as i64)
    .bind(block.vt_weight as i64)
    .bind(block.dr_weight as i64)
    .bind(block.confirmed as i32)
    .bind(block.reverted as i32)
    .bind(block.signals.map(|v| v as i64))
    .execute(conn)
    .await
    .context("Failed to upsert block")?;

    Ok(())
}

impl Storage {
    /// Block hash recorded at the given epoch, if any.
    pub async fn get_block_hash_at_epoch(&self, epoch: u32) -> Result<Option<Hash>> {
        let row = sqlx::query("SELECT block_hash FROM blocks WHERE epoch = ?")
            .bind(epoch as i64)
            .fetch_optional(self.pool())
            .await
            .context("Failed to query block at epoch")?;

        match row {
            Some(row) => {
                let bytes: Vec<u8> = row.get("block_hash");
                Ok(Some(Hash::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    /// Mark a block superblock-confirmed.
    pub async fn mark_block_confirmed(&self, block_hash: &Hash) -> Result<()> {
        sqlx::query("UPDATE blocks SET confirmed = 1, reverted = 0 WHERE block_hash = ?")
            .bind(block_hash.as_bytes().as_slice())
            .execute(self.pool())
            .await
            .context("Failed to mark block confirmed")?;
        Ok(())
    }

    /// Mark a block reverted. The row and its transactions are retained for
    /// audit, flagged out of the canonical chain.
    pub async fn mark_block_reverted(&self, block_hash: &Hash) -> Result<()> {
        sqlx::query("UPDATE blocks SET confirmed = 0, reverted = 1 WHERE block_hash = ?")
            .bind(block_hash.as_bytes().as_slice())
            .execute(self.pool())
            .await
            .context("Failed to mark block reverted")?;
        Ok(())
    }

    /// Blocks at or below `epoch_cutoff` that are neither confirmed nor
    /// reverted, oldest first.
    pub async fn unconfirmed_blocks_before(
        &self,
        epoch_cutoff: u32,
    ) -> Result<Vec<(u32, Hash)>> {
        let rows = sqlx::query(
            r#"
            SELECT epoch, block_hash FROM blocks
            WHERE epoch <= ? AND confirmed = 0 AND reverted = 0
            ORDER BY epoch ASC
            "#,
        )
        .bind(epoch_cutoff as i64)
        .fetch_all(self.pool())
        .await
        .context("Failed to query unconfirmed blocks")?;

        rows.into_iter()
            .map(|row| {
                let epoch: i64 = row.get("epoch");
                let bytes: Vec<u8> = row.get("block_hash");
                Ok((epoch as u32, Hash::from_slice(&bytes)?))
            })
            .collect()
    }

    /// Delete a replaced block and every row ingested from it. Used when a
    /// fork put a different block at an already-ingested epoch.
    pub async fn remove_block_rows(&self, block_hash: &Hash, epoch: u32) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let hash_bytes = block_hash.as_bytes().as_slice();

        sqlx::query("DELETE FROM blocks WHERE block_hash = ?")
            .bind(hash_bytes)
            .execute(&mut *tx)
            .await?;
        for table in [
            "mint_txns",
            "value_transfer_txns",
            "data_request_txns",
            "commit_txns",
            "reveal_txns",
            "tally_txns",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE epoch = ?"))
                .bind(epoch as i64)
                .execute(&mut *tx)
                .await?;
        }
        // Bytecode hashes carry no epoch and survive; they may be shared.
        sqlx::query("DELETE FROM hashes WHERE epoch = ?")
            .bind(epoch as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await.context("Failed to remove block rows")?;
        Ok(())
    }

    /// Fetch one block row.
    pub async fn get_block(&self, block_hash: &Hash) -> Result<Option<BlockRecord>> {
        let row = sqlx::query("SELECT * FROM blocks WHERE block_hash = ?")
            .bind(block_hash.as_bytes().as_slice())
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch block")?;

        let Some(row) = row else { return Ok(None) };
        let bytes: Vec<u8> = row.get("block_hash");
        Ok(Some(BlockRecord {
            block_hash: Hash::from_slice(&bytes)?,
            epoch: row.get::<i64, _>("epoch") as u32,
            value_transfer_count: row.get::<i64, _>("value_transfer_count") as u32,
            data_request_count: row.get::<i64, _>("data_request_count") as u32,
            commit_count: row.get::<i64, _>("commit_count") as u32,
            reveal_count: row.get::<i64, _>("reveal_count") as u32,
            tally_count: row.get::<i64, _>("tally_count") as u32,
            block_weight: row.get::<i64, _>("block_weight") as u32,
            vt_weight: row.get::<i64, _>("vt_weight") as u32,
            dr_weight: row.get::<i64, _>("dr_weight") as u32,
            confirmed: row.get::<i64, _>("confirmed") != 0,
            reverted: row.get::<i64, _>("reverted") != 0,
            signals: row.get::<Option<i64>, _>("signals").map(|v| v as u32),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::Storage;
    use super::*;
    use tempfile::NamedTempFile;

    fn sample_block(epoch: u32, seed: u8) -> BlockRecord {
        BlockRecord {
            block_hash: Hash::from_slice(&[seed; 32]).unwrap(),
            epoch,
            value_transfer_count: 2,
            data_request_count: 1,
            commit_count: 10,
            reveal_count: 10,
            tally_count: 1,
            block_weight: 5000,
            vt_weight: 800,
            dr_weight: 4200,
            confirmed: false,
            reverted: false,
            signals: Some(1),
        }
    }

    async fn open() -> (Storage, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp.path()).await.unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp)
    }

    #[tokio::test]
    async fn upsert_then_fetch_roundtrips() {
        let (storage, _temp) = open().await;
        let block = sample_block(100, 0xaa);

        let mut conn = storage.pool().acquire().await.unwrap();
        upsert_block(&mut conn, &block).await.unwrap();
        drop(conn);

        let fetched = storage.get_block(&block.block_hash).await.unwrap().unwrap();
        assert_eq!(fetched.epoch, 100);
        assert_eq!(fetched.commit_count, 10);
        assert!(!fetched.confirmed);

        let at_epoch = storage.get_block_hash_at_epoch(100).await.unwrap();
        assert_eq!(at_epoch, Some(block.block_hash));
    }

    #[tokio::test]
    async fn confirm_and_revert_flags() {
        let (storage, _temp) = open().await;
        let block = sample_block(5, 0x01);

        let mut conn = storage.pool().acquire().await.unwrap();
        upsert_block(&mut conn, &block).await.unwrap();
        drop(conn);

        storage.mark_block_confirmed(&block.block_hash).await.unwrap();
        let fetched = storage.get_block(&block.block_hash).await.unwrap().unwrap();
        assert!(fetched.confirmed);
        assert!(!fetched.reverted);

        storage.mark_block_reverted(&block.block_hash).await.unwrap();
        let fetched = storage.get_block(&block.block_hash).await.unwrap().unwrap();
        assert!(!fetched.confirmed);
        assert!(fetched.reverted);
    }

    #[tokio::test]
    async fn unconfirmed_sweep_respects_cutoff_and_flags() {
        let (storage, _temp) = open().await;
        let mut conn = storage.pool().acquire().await.unwrap();
        for (epoch, seed) in [(10u32, 1u8), (20, 2), (30, 3)] {
            upsert_block(&mut conn, &sample_block(epoch, seed)).await.unwrap();
        }
        drop(conn);

        let confirmed = Hash::from_slice(&[1; 32]).unwrap();
        storage.mark_block_confirmed(&confirmed).await.unwrap();

        let pending = storage.unconfirmed_blocks_before(25).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, 20);
    }

    #[tokio::test]
    async fn remove_block_rows_clears_epoch() {
        let (storage, _temp) = open().await;
        let block = sample_block(7, 0x07);
        let mut conn = storage.pool().acquire().await.unwrap();
        upsert_block(&mut conn, &block).await.unwrap();
        drop(conn);

        storage.remove_block_rows(&block.block_hash, 7).await.unwrap();
        assert!(storage.get_block(&block.block_hash).await.unwrap().is_none());
        assert!(storage.get_block_hash_at_epoch(7).await.unwrap().is_none());
    }
}
