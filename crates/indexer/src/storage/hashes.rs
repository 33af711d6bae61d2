//! Shared hash index operations.
//!
//! Every block, transaction, and bytecode hash lands in one table so lookups
//! by bare hash can route to the right detail table. Re-ingesting a hash
//! keeps the latest epoch.

use anyhow::{Context, Result};
use sqlx::{Row, SqliteConnection};
use witscan_core::Hash;

use super::{HashRecord, Storage};

pub(crate) async fn upsert_hash(conn: &mut SqliteConnection, record: &HashRecord) -> Result<()> {
    let epoch = if record.kind.has_epoch() {
        record.epoch.map(|e| e as i64)
    } else {
        None
    };
    sqlx::query(
        r#"
        INSERT INTO hashes (hash, type, epoch)
        VALUES (?, ?, ?)
        ON CONFLICT(hash) DO UPDATE SET
            type = excluded.type,
            epoch = excluded.epoch
        "#,
    )
    .bind(record.hash.as_bytes().as_slice())
    .bind(record.kind.as_str())
    .bind(epoch)
    .execute(conn)
    .await
    .context("Failed to upsert hash")?;

    Ok(())
}

impl Storage {
    /// Look up what a hash points at: `(type label, epoch)`.
    pub async fn get_hash_type(&self, hash: &Hash) -> Result<Option<(String, Option<u32>)>> {
        let row = sqlx::query("SELECT type, epoch FROM hashes WHERE hash = ?")
            .bind(hash.as_bytes().as_slice())
            .fetch_optional(self.pool())
            .await
            .context("Failed to query hash index")?;

        Ok(row.map(|row| {
            let kind: String = row.get("type");
            let epoch: Option<i64> = row.get("epoch");
            (kind, epoch.map(|e| e as u32))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{HashKind, Storage};
    use super::*;
    use tempfile::NamedTempFile;
    use witscan_core::TransactionKind;

    #[tokio::test]
    async fn bytecode_hashes_drop_their_epoch() {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp.path()).await.unwrap();
        storage.run_migrations().await.unwrap();

        let hash = Hash::new([0x11; 32]);
        let mut conn = storage.pool().acquire().await.unwrap();
        upsert_hash(
            &mut conn,
            &HashRecord {
                hash,
                kind: HashKind::RadBytecode,
                epoch: Some(500),
            },
        )
        .await
        .unwrap();
        drop(conn);

        let (kind, epoch) = storage.get_hash_type(&hash).await.unwrap().unwrap();
        assert_eq!(kind, "rad_bytes");
        assert_eq!(epoch, None);
    }

    #[tokio::test]
    async fn reingest_keeps_latest_epoch() {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp.path()).await.unwrap();
        storage.run_migrations().await.unwrap();

        let hash = Hash::new([0x22; 32]);
        let mut conn = storage.pool().acquire().await.unwrap();
        for epoch in [100u32, 250] {
            upsert_hash(
                &mut conn,
                &HashRecord {
                    hash,
                    kind: HashKind::Transaction(TransactionKind::Commit),
                    epoch: Some(epoch),
                },
            )
            .await
            .unwrap();
        }
        drop(conn);

        let (kind, epoch) = storage.get_hash_type(&hash).await.unwrap().unwrap();
        assert_eq!(kind, "commit_txn");
        assert_eq!(epoch, Some(250));
    }
}
