//! Mint (block reward) decoder.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use super::{split_outputs, txn_hash, OutputJson};
use crate::storage::MintRecord;

#[derive(Debug, Deserialize)]
struct MintJson {
    #[serde(default)]
    outputs: Vec<OutputJson>,
}

/// Decode the block's mint transaction. The miner address is derived from
/// the block signature, not from the mint payload.
pub fn decode_mint(txn: &Value, epoch: u32, miner: &str) -> Result<MintRecord> {
    let hash = txn_hash(txn)?;
    let body: MintJson =
        serde_json::from_value(txn.clone()).context("Malformed mint transaction")?;
    let (output_addresses, output_values) = split_outputs(&body.outputs);

    Ok(MintRecord {
        txn_hash: hash,
        epoch,
        miner: miner.to_string(),
        output_addresses,
        output_values,
    })
}
