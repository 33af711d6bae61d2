//! Transaction table operations.
//!
//! Conflict policies differ per kind. Mint and commit rows are immutable
//! once written (DO NOTHING); the other kinds refresh their row when the
//! same hash is ingested again, which happens when a fork re-delivers a
//! transaction in a different block.

use anyhow::{Context, Result};
use sqlx::{Row, SqliteConnection};
use witscan_core::{OutputPointer, TransactionKind};

use super::{
    from_json, to_json, CommitRecord, DataRequestRecord, MintRecord, RevealRecord, Storage,
    TallyRecord, ValueTransferRecord,
};

pub(crate) async fn insert_mint(conn: &mut SqliteConnection, rec: &MintRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO mint_txns (txn_hash, epoch, miner, output_addresses, output_values)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(txn_hash) DO NOTHING
        "#,
    )
    .bind(rec.txn_hash.as_bytes().as_slice())
    .bind(rec.epoch as i64)
    .bind(&rec.miner)
    .bind(to_json(&rec.output_addresses)?)
    .bind(to_json(&rec.output_values)?)
    .execute(conn)
    .await
    .context("Failed to insert mint")?;
    Ok(())
}

pub(crate) async fn insert_value_transfer(
    conn: &mut SqliteConnection,
    rec: &ValueTransferRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO value_transfer_txns (
            txn_hash, epoch,
            input_addresses, input_values, input_pointers,
            output_addresses, output_values,
            true_value, change_value,
            fee, weight, priority
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(txn_hash) DO UPDATE SET
            epoch = excluded.epoch,
            input_addresses = excluded.input_addresses,
            input_values = excluded.input_values,
            input_pointers = excluded.input_pointers,
            output_addresses = excluded.output_addresses,
            output_values = excluded.output_values,
            true_value = excluded.true_value,
            change_value = excluded.change_value,
            fee = excluded.fee,
            weight = excluded.weight,
            priority = excluded.priority
        "#,
    )
    .bind(rec.txn_hash.as_bytes().as_slice())
    .bind(rec.epoch as i64)
    .bind(to_json(&rec.input_addresses)?)
    .bind(to_json(&rec.input_values)?)
    .bind(to_json(&rec.input_pointers)?)
    .bind(to_json(&rec.output_addresses)?)
    .bind(to_json(&rec.output_values)?)
    .bind(rec.true_value as i64)
    .bind(rec.change_value as i64)
    .bind(rec.fee as i64)
    .bind(rec.weight as i64)
    .bind(rec.priority as i64)
    .execute(conn)
    .await
    .context("Failed to insert value transfer")?;
    Ok(())
}

pub(crate) async fn insert_data_request(
    conn: &mut SqliteConnection,
    rec: &DataRequestRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO data_request_txns (
            txn_hash, epoch,
            input_addresses, input_values, input_pointers,
            output_address, output_value,
            witnesses, witness_reward, collateral,
            commit_and_reveal_fee, min_consensus_percentage,
            dro_fee, miner_fee, weight, priority,
            retrieve_kinds, retrieve_urls, retrieve_scripts,
            aggregate_script, tally_script,
            rad_bytes_hash, dro_bytes_hash
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(txn_hash) DO UPDATE SET
            epoch = excluded.epoch,
            input_addresses = excluded.input_addresses,
            input_values = excluded.input_values,
            input_pointers = excluded.input_pointers,
            output_address = excluded.output_address,
            output_value = excluded.output_value,
            dro_fee = excluded.dro_fee,
            miner_fee = excluded.miner_fee,
            weight = excluded.weight,
            priority = excluded.priority
        "#,
    )
    .bind(rec.txn_hash.as_bytes().as_slice())
    .bind(rec.epoch as i64)
    .bind(to_json(&rec.input_addresses)?)
    .bind(to_json(&rec.input_values)?)
    .bind(to_json(&rec.input_pointers)?)
    .bind(rec.output_address.as_deref())
    .bind(rec.output_value.map(|v| v as i64))
    .bind(rec.witnesses as i64)
    .bind(rec.witness_reward as i64)
    .bind(rec.collateral as i64)
    .bind(rec.commit_and_reveal_fee as i64)
    .bind(rec.min_consensus_percentage as i64)
    .bind(rec.dro_fee as i64)
    .bind(rec.miner_fee as i64)
    .bind(rec.weight as i64)
    .bind(rec.priority as i64)
    .bind(to_json(&rec.retrieve_kinds)?)
    .bind(to_json(&rec.retrieve_urls)?)
    .bind(to_json(&rec.retrieve_scripts)?)
    .bind(&rec.aggregate_script)
    .bind(&rec.tally_script)
    .bind(rec.rad_bytes_hash.as_bytes().as_slice())
    .bind(rec.dro_bytes_hash.as_bytes().as_slice())
    .execute(conn)
    .await
    .context("Failed to insert data request")?;
    Ok(())
}

pub(crate) async fn insert_commit(conn: &mut SqliteConnection, rec: &CommitRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO commit_txns (
            txn_hash, epoch, txn_address,
            input_values, input_pointers, output_value,
            data_request, collateral
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(txn_hash) DO NOTHING
        "#,
    )
    .bind(rec.txn_hash.as_bytes().as_slice())
    .bind(rec.epoch as i64)
    .bind(&rec.txn_address)
    .bind(to_json(&rec.input_values)?)
    .bind(to_json(&rec.input_pointers)?)
    .bind(rec.output_value.map(|v| v as i64))
    .bind(rec.data_request.as_bytes().as_slice())
    .bind(rec.collateral as i64)
    .execute(conn)
    .await
    .context("Failed to insert commit")?;
    Ok(())
}

pub(crate) async fn insert_reveal(conn: &mut SqliteConnection, rec: &RevealRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reveal_txns (
            txn_hash, epoch, txn_address, data_request, result, success
        )
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(txn_hash) DO UPDATE SET
            epoch = excluded.epoch,
            result = excluded.result,
            success = excluded.success
        "#,
    )
    .bind(rec.txn_hash.as_bytes().as_slice())
    .bind(rec.epoch as i64)
    .bind(&rec.txn_address)
    .bind(rec.data_request.as_bytes().as_slice())
    .bind(rec.result.as_slice())
    .bind(rec.success as i32)
    .execute(conn)
    .await
    .context("Failed to insert reveal")?;
    Ok(())
}

pub(crate) async fn insert_tally(conn: &mut SqliteConnection, rec: &TallyRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tally_txns (
            txn_hash, epoch, data_request,
            output_addresses, output_values,
            error_addresses, liar_addresses,
            result, success
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(txn_hash) DO UPDATE SET
            epoch = excluded.epoch,
            output_addresses = excluded.output_addresses,
            output_values = excluded.output_values,
            error_addresses = excluded.error_addresses,
            liar_addresses = excluded.liar_addresses,
            result = excluded.result,
            success = excluded.success
        "#,
    )
    .bind(rec.txn_hash.as_bytes().as_slice())
    .bind(rec.epoch as i64)
    .bind(rec.data_request.as_bytes().as_slice())
    .bind(to_json(&rec.output_addresses)?)
    .bind(to_json(&rec.output_values)?)
    .bind(to_json(&rec.error_addresses)?)
    .bind(to_json(&rec.liar_addresses)?)
    .bind(rec.result.as_slice())
    .bind(rec.success as i32)
    .execute(conn)
    .await
    .context("Failed to insert tally")?;
    Ok(())
}

impl Storage {
    /// Resolve the value and owner of a spent output, if the originating
    /// transaction is already indexed. Returns `(address, value)`; the
    /// address is empty for kinds whose outputs carry only a value.
    pub async fn get_output(
        &self,
        pointer: &OutputPointer,
    ) -> Result<Option<(String, u64)>> {
        let Some((kind, _)) = self.get_hash_type(&pointer.transaction).await? else {
            return Ok(None);
        };
        let Ok(kind) = kind.parse::<TransactionKind>() else {
            return Ok(None);
        };

        let hash_bytes = pointer.transaction.as_bytes().as_slice();
        let index = pointer.index as usize;

        match kind {
            TransactionKind::Mint | TransactionKind::ValueTransfer | TransactionKind::Tally => {
                let table = match kind {
                    TransactionKind::Mint => "mint_txns",
                    TransactionKind::ValueTransfer => "value_transfer_txns",
                    _ => "tally_txns",
                };
                let row = sqlx::query(&format!(
                    "SELECT output_addresses, output_values FROM {table} WHERE txn_hash = ?"
                ))
                .bind(hash_bytes)
                .fetch_optional(self.pool())
                .await
                .context("Failed to fetch outputs")?;

                let Some(row) = row else { return Ok(None) };
                let addresses: Vec<String> = from_json(&row.get::<String, _>("output_addresses"))?;
                let values: Vec<u64> = from_json(&row.get::<String, _>("output_values"))?;
                Ok(addresses
                    .get(index)
                    .cloned()
                    .zip(values.get(index).copied()))
            }
            TransactionKind::DataRequest => {
                let row = sqlx::query(
                    "SELECT output_address, output_value FROM data_request_txns WHERE txn_hash = ?",
                )
                .bind(hash_bytes)
                .fetch_optional(self.pool())
                .await
                .context("Failed to fetch data request output")?;

                let Some(row) = row else { return Ok(None) };
                if index != 0 {
                    return Ok(None);
                }
                let address: Option<String> = row.get("output_address");
                let value: Option<i64> = row.get("output_value");
                Ok(address.zip(value.map(|v| v as u64)))
            }
            TransactionKind::Commit => {
                let row = sqlx::query(
                    "SELECT txn_address, output_value FROM commit_txns WHERE txn_hash = ?",
                )
                .bind(hash_bytes)
                .fetch_optional(self.pool())
                .await
                .context("Failed to fetch commit output")?;

                let Some(row) = row else { return Ok(None) };
                if index != 0 {
                    return Ok(None);
                }
                let address: String = row.get("txn_address");
                let value: Option<i64> = row.get("output_value");
                Ok(value.map(|v| (address, v as u64)))
            }
            TransactionKind::Reveal => Ok(None),
        }
    }

    /// Count rows in one transaction table.
    pub async fn count_transactions(&self, kind: TransactionKind) -> Result<u64> {
        let table = match kind {
            TransactionKind::Mint => "mint_txns",
            TransactionKind::ValueTransfer => "value_transfer_txns",
            TransactionKind::DataRequest => "data_request_txns",
            TransactionKind::Commit => "commit_txns",
            TransactionKind::Reveal => "reveal_txns",
            TransactionKind::Tally => "tally_txns",
        };
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(self.pool())
            .await?;
        Ok(count as u64)
    }
}
