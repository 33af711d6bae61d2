//! Sync state, persisted consensus constants, and protocol upgrades.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Row;
use witscan_core::ConsensusConstants;

use super::{Storage, SyncState};

impl Storage {
    /// Read the indexer progress row.
    pub async fn get_sync_state(&self) -> Result<SyncState> {
        let row = sqlx::query("SELECT last_epoch, updated_at FROM sync_state WHERE id = 1")
            .fetch_one(self.pool())
            .await
            .context("Failed to read sync state")?;

        Ok(SyncState {
            last_epoch: row.get("last_epoch"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Advance the highest fully ingested epoch.
    pub async fn set_last_epoch(&self, epoch: u32) -> Result<()> {
        sqlx::query("UPDATE sync_state SET last_epoch = ?, updated_at = ? WHERE id = 1")
            .bind(epoch as i64)
            .bind(Utc::now().timestamp())
            .execute(self.pool())
            .await
            .context("Failed to update sync state")?;
        Ok(())
    }

    /// Persist the consensus constants fetched from the node, so restarts
    /// can proceed while no node is reachable.
    pub async fn save_consensus_constants(&self, constants: &ConsensusConstants) -> Result<()> {
        let entries: [(&str, i64); 6] = [
            ("checkpoint_zero_timestamp", constants.checkpoint_zero_timestamp),
            ("checkpoints_period", constants.checkpoints_period as i64),
            ("superblock_period", constants.superblock_period as i64),
            ("collateral_minimum", constants.collateral_minimum as i64),
            ("halving_period", constants.halving_period as i64),
            ("initial_block_reward", constants.initial_block_reward as i64),
        ];

        let mut tx = self.pool().begin().await?;
        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO consensus_constants (key, int_val)
                VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET int_val = excluded.int_val
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit()
            .await
            .context("Failed to persist consensus constants")?;
        Ok(())
    }

    /// Load previously persisted consensus constants, `None` if the table
    /// has never been populated.
    pub async fn load_consensus_constants(&self) -> Result<Option<ConsensusConstants>> {
        let rows = sqlx::query("SELECT key, int_val FROM consensus_constants")
            .fetch_all(self.pool())
            .await
            .context("Failed to load consensus constants")?;

        let map: HashMap<String, i64> = rows
            .into_iter()
            .filter_map(|row| {
                let key: String = row.get("key");
                let value: Option<i64> = row.get("int_val");
                value.map(|v| (key, v))
            })
            .collect();

        let get = |key: &str| map.get(key).copied();
        let (Some(zero), Some(period), Some(superblock), Some(collateral), Some(halving), Some(reward)) = (
            get("checkpoint_zero_timestamp"),
            get("checkpoints_period"),
            get("superblock_period"),
            get("collateral_minimum"),
            get("halving_period"),
            get("initial_block_reward"),
        ) else {
            return Ok(None);
        };

        Ok(Some(ConsensusConstants {
            checkpoint_zero_timestamp: zero,
            checkpoints_period: period as u32,
            superblock_period: superblock as u32,
            collateral_minimum: collateral as u64,
            halving_period: halving as u32,
            initial_block_reward: reward as u64,
        }))
    }

    /// Replace the stored protocol-upgrade table with the node's view.
    pub async fn replace_wips(&self, wips: &HashMap<String, u32>) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM wips").execute(&mut *tx).await?;
        for (title, epoch) in wips {
            sqlx::query("INSERT INTO wips (title, activation_epoch) VALUES (?, ?)")
                .bind(title)
                .bind(*epoch as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await.context("Failed to replace wips")?;
        Ok(())
    }

    /// Load the stored protocol-upgrade table.
    pub async fn load_wips(&self) -> Result<HashMap<String, u32>> {
        let rows = sqlx::query("SELECT title, activation_epoch FROM wips")
            .fetch_all(self.pool())
            .await
            .context("Failed to load wips")?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let title: String = row.get("title");
                let epoch: i64 = row.get("activation_epoch");
                (title, epoch as u32)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn open() -> (Storage, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp.path()).await.unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp)
    }

    #[tokio::test]
    async fn sync_state_starts_before_genesis() {
        let (storage, _temp) = open().await;
        let state = storage.get_sync_state().await.unwrap();
        assert_eq!(state.last_epoch, -1);

        storage.set_last_epoch(42).await.unwrap();
        let state = storage.get_sync_state().await.unwrap();
        assert_eq!(state.last_epoch, 42);
        assert!(state.updated_at > 0);
    }

    #[tokio::test]
    async fn consensus_constants_round_trip() {
        let (storage, _temp) = open().await;
        assert!(storage.load_consensus_constants().await.unwrap().is_none());

        let constants = ConsensusConstants {
            checkpoint_zero_timestamp: 1_602_666_000,
            checkpoints_period: 45,
            superblock_period: 10,
            collateral_minimum: 1_000_000_000,
            halving_period: 3_500_000,
            initial_block_reward: 250_000_000_000,
        };
        storage.save_consensus_constants(&constants).await.unwrap();

        let loaded = storage.load_consensus_constants().await.unwrap().unwrap();
        assert_eq!(loaded, constants);
    }

    #[tokio::test]
    async fn wips_replace_is_total() {
        let (storage, _temp) = open().await;
        let mut wips = HashMap::new();
        wips.insert("WIP0017-0018-0019".to_string(), 683_541u32);
        wips.insert("WIP0020-0021".to_string(), 1_059_861);
        storage.replace_wips(&wips).await.unwrap();

        let mut newer = HashMap::new();
        newer.insert("WIP0027".to_string(), 1_708_901u32);
        storage.replace_wips(&newer).await.unwrap();

        let loaded = storage.load_wips().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("WIP0027"), Some(&1_708_901));
    }
}
