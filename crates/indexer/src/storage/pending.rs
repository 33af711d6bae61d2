//! Mempool fee histogram samples.

use anyhow::{Context, Result};
use sqlx::Row;

use super::{from_json, to_json, PendingSample, Storage};

impl Storage {
    /// Store one mempool sample in the given table.
    async fn insert_pending(&self, table: &str, sample: &PendingSample) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (timestamp, fee_per_unit, num_txns)
            VALUES (?, ?, ?)
            ON CONFLICT(timestamp) DO UPDATE SET
                fee_per_unit = excluded.fee_per_unit,
                num_txns = excluded.num_txns
            "#
        ))
        .bind(sample.timestamp)
        .bind(to_json(&sample.fee_per_unit)?)
        .bind(to_json(&sample.num_txns)?)
        .execute(self.pool())
        .await
        .with_context(|| format!("Failed to insert sample into {table}"))?;
        Ok(())
    }

    /// Store a data-request mempool sample.
    pub async fn insert_pending_data_requests(&self, sample: &PendingSample) -> Result<()> {
        self.insert_pending("pending_data_request_txns", sample).await
    }

    /// Store a value-transfer mempool sample.
    pub async fn insert_pending_value_transfers(&self, sample: &PendingSample) -> Result<()> {
        self.insert_pending("pending_value_transfer_txns", sample).await
    }

    /// Fetch the most recent samples from one of the pending tables,
    /// newest first.
    pub async fn recent_pending_samples(
        &self,
        table: &str,
        limit: i64,
    ) -> Result<Vec<PendingSample>> {
        let rows = sqlx::query(&format!(
            "SELECT timestamp, fee_per_unit, num_txns FROM {table} \
             ORDER BY timestamp DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .with_context(|| format!("Failed to fetch samples from {table}"))?;

        rows.into_iter()
            .map(|row| {
                Ok(PendingSample {
                    timestamp: row.get("timestamp"),
                    fee_per_unit: from_json(&row.get::<String, _>("fee_per_unit"))?,
                    num_txns: from_json(&row.get::<String, _>("num_txns"))?,
                })
            })
            .collect()
    }

    /// Drop samples older than `cutoff` from both pending tables.
    pub async fn prune_pending_before(&self, cutoff: i64) -> Result<u64> {
        let mut removed = 0;
        for table in ["pending_data_request_txns", "pending_value_transfer_txns"] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE timestamp < ?"))
                .bind(cutoff)
                .execute(self.pool())
                .await
                .with_context(|| format!("Failed to prune {table}"))?;
            removed += result.rows_affected();
        }
        Ok(removed)
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
    async fn samples_round_trip_per_table() {
        let (storage, _temp) = open().await;
        let sample = PendingSample {
            timestamp: 1_700_000_000,
            fee_per_unit: vec![0, 1, 2, 5, 10],
            num_txns: vec![3, 7, 1, 0, 2],
        };
        storage.insert_pending_data_requests(&sample).await.unwrap();

        let loaded = storage
            .recent_pending_samples("pending_data_request_txns", 10)
            .await
            .unwrap();
        assert_eq!(loaded, vec![sample]);

        // The value-transfer table is independent.
        let empty = storage
            .recent_pending_samples("pending_value_transfer_txns", 10)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn prune_drops_old_samples_only() {
        let (storage, _temp) = open().await;
        for ts in [100i64, 200, 300] {
            storage
                .insert_pending_value_transfers(&PendingSample {
                    timestamp: ts,
                    fee_per_unit: vec![1],
                    num_txns: vec![1],
                })
                .await
                .unwrap();
        }

        let removed = storage.prune_pending_before(250).await.unwrap();
        assert_eq!(removed, 2);
        let left = storage
            .recent_pending_samples("pending_value_transfer_txns", 10)
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].timestamp, 300);
    }
}
