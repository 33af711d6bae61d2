//! Transaction decoders.
//!
//! One decoder per transaction kind, all with the same shape: take the
//! node's raw transaction JSON and produce a flat storage record keyed by
//! `(txn_hash, epoch)`. Shared across kinds: bech32 address derivation
//! from keyed signatures, output/input parsing, UTXO input resolution
//! with a node fallback, and the fee-to-priority rule.
//!
//! Node JSON conventions: outputs are `{"pkh": "...", "value": n}`;
//! inputs are `{"output_pointer": "<hash>:<index>"}`; signatures carry
//! `{"public_key": {"bytes": [...], "compressed": n}}`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use witscan_core::{address, Hash, OutputPointer};

use crate::node::NodePool;
use crate::storage::Storage;

pub mod commit;
pub mod data_request;
pub mod mint;
pub mod reveal;
pub mod tally;
pub mod value_transfer;

pub use commit::decode_commit;
pub use data_request::decode_data_request;
pub use mint::decode_mint;
pub use reveal::decode_reveal;
pub use tally::decode_tally;
pub use value_transfer::decode_value_transfer;

/// One transaction output as the node renders it.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputJson {
    pub pkh: String,
    pub value: u64,
}

/// One transaction input as the node renders it.
#[derive(Debug, Clone, Deserialize)]
pub struct InputJson {
    pub output_pointer: OutputPointer,
}

/// The public-key half of a keyed signature.
#[derive(Debug, Clone, Deserialize)]
pub struct PublicKeyJson {
    pub bytes: Vec<u8>,
    pub compressed: u8,
}

/// A keyed signature; the signature bytes themselves are not needed here.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyedSignatureJson {
    pub public_key: PublicKeyJson,
}

impl KeyedSignatureJson {
    /// Bech32 address of the signing key.
    pub fn address(&self, hrp: &str) -> Result<String> {
        let pkh = address::pkh_from_public_key(self.public_key.compressed, &self.public_key.bytes)
            .context("Invalid public key in signature")?;
        address::address_from_pkh(hrp, &pkh).context("Failed to encode address")
    }
}

/// Split outputs into parallel address/value columns.
pub fn split_outputs(outputs: &[OutputJson]) -> (Vec<String>, Vec<u64>) {
    let addresses = outputs.iter().map(|o| o.pkh.clone()).collect();
    let values = outputs.iter().map(|o| o.value).collect();
    (addresses, values)
}

/// Input addresses, one per input. A single signature signs for every
/// input; otherwise signatures pair with inputs positionally.
pub fn input_addresses(
    hrp: &str,
    inputs: &[InputJson],
    signatures: &[KeyedSignatureJson],
) -> Result<Vec<String>> {
    if inputs.is_empty() {
        return Ok(Vec::new());
    }
    if signatures.len() == 1 {
        let address = signatures[0].address(hrp)?;
        return Ok(vec![address; inputs.len()]);
    }
    if signatures.len() != inputs.len() {
        bail!(
            "signature count {} does not match input count {}",
            signatures.len(),
            inputs.len()
        );
    }
    signatures.iter().map(|s| s.address(hrp)).collect()
}

/// Fee-to-priority rule shared by the data-request and value-transfer
/// codecs. An exact zero fee is priority 0; a positive fee never reports
/// as zero even when the division floors or rounds to it.
pub fn calculate_priority(fee: u64, weight: u64, round: bool) -> u64 {
    if fee == 0 {
        return 0;
    }
    if weight == 0 {
        return 1;
    }
    let priority = if round {
        ((fee as f64) / (weight as f64)).round() as u64
    } else {
        fee / weight
    };
    priority.max(1)
}

/// Resolves the values behind UTXO input pointers.
///
/// The local hash index answers for outputs already ingested; a miss falls
/// back to fetching the originating transaction from a node. The fallback
/// is mandatory, never skipped: inputs routinely reference outputs from a
/// block still crossing the same ingestion batch. A fallback failure
/// degrades that one value to zero rather than failing the block.
pub struct InputResolver<'a> {
    storage: &'a Storage,
    pool: &'a NodePool,
}

impl<'a> InputResolver<'a> {
    pub fn new(storage: &'a Storage, pool: &'a NodePool) -> Self {
        InputResolver { storage, pool }
    }

    /// Value of each referenced output, in input order.
    pub async fn resolve_values(&self, pointers: &[OutputPointer]) -> Result<Vec<u64>> {
        let mut values = Vec::with_capacity(pointers.len());
        for pointer in pointers {
            if let Some((_, value)) = self.storage.get_output(pointer).await? {
                values.push(value);
                continue;
            }
            match self.fetch_output_value(pointer).await {
                Ok(value) => values.push(value),
                Err(e) => {
                    warn!(error = %e, input = %pointer, "Input value unresolved");
                    values.push(0);
                }
            }
        }
        Ok(values)
    }

    async fn fetch_output_value(&self, pointer: &OutputPointer) -> Result<u64> {
        let mut node = self.pool.acquire().await;
        let txn = node
            .get_transaction(&pointer.transaction)
            .await
            .with_context(|| format!("Failed to fetch origin of input {pointer}"))?;
        extract_output_value(&txn, pointer.index)
            .with_context(|| format!("Origin of input {pointer} has no such output"))
    }
}

/// Pull `outputs[index].value` out of a `getTransaction` response,
/// whichever kind the transaction turns out to be.
fn extract_output_value(txn: &Value, index: u32) -> Result<u64> {
    let transaction = txn.get("transaction").unwrap_or(txn);
    let outputs = transaction
        .get("body")
        .and_then(|body| body.get("outputs"))
        .or_else(|| transaction.get("outputs"))
        .and_then(Value::as_array)
        .context("transaction without outputs")?;
    let output = outputs
        .get(index as usize)
        .with_context(|| format!("output index {index} out of range"))?;
    output
        .get("value")
        .and_then(Value::as_u64)
        .context("output without value")
}

/// Render pointers as their `hash:index` column form.
pub fn pointer_strings(inputs: &[InputJson]) -> Vec<String> {
    inputs
        .iter()
        .map(|i| i.output_pointer.to_string())
        .collect()
}

/// Pull the transaction hash out of an embedded transaction object.
pub fn txn_hash(txn: &Value) -> Result<Hash> {
    let hash = txn
        .get("hash")
        .and_then(Value::as_str)
        .context("transaction without hash")?;
    Hash::from_hex(hash).context("malformed transaction hash")
}
