//! Commit decoder.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use witscan_core::Hash;

use super::{pointer_strings, txn_hash, InputJson, InputResolver, KeyedSignatureJson, OutputJson};
use crate::storage::CommitRecord;

#[derive(Debug, Deserialize)]
struct CommitJson {
    body: CommitBody,
    #[serde(default)]
    signatures: Vec<KeyedSignatureJson>,
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    dr_pointer: Hash,
    /// The collateral-funding inputs.
    #[serde(default)]
    collateral: Vec<InputJson>,
    #[serde(default)]
    outputs: Vec<OutputJson>,
}

/// Decode a commit. Collateral is whatever of the inputs is not returned
/// as change.
pub async fn decode_commit(
    txn: &Value,
    epoch: u32,
    hrp: &str,
    resolver: &InputResolver<'_>,
) -> Result<CommitRecord> {
    let hash = txn_hash(txn)?;
    let parsed: CommitJson = serde_json::from_value(txn.clone()).context("Malformed commit")?;

    let signature = parsed
        .signatures
        .first()
        .context("commit without signature")?;
    let txn_address = signature.address(hrp)?;

    let pointers: Vec<_> = parsed
        .body
        .collateral
        .iter()
        .map(|i| i.output_pointer)
        .collect();
    let input_values = resolver.resolve_values(&pointers).await?;

    let total_in: u64 = input_values.iter().sum();
    let total_out: u64 = parsed.body.outputs.iter().map(|o| o.value).sum();
    let collateral = total_in.saturating_sub(total_out);
    let output_value = parsed.body.outputs.first().map(|o| o.value);

    Ok(CommitRecord {
        txn_hash: hash,
        epoch,
        txn_address,
        input_values,
        input_pointers: pointer_strings(&parsed.body.collateral),
        output_value,
        data_request: parsed.body.dr_pointer,
        collateral,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commit_json_shape_parses() {
        let txn = json!({
            "hash": "11".repeat(32),
            "body": {
                "dr_pointer": "22".repeat(32),
                "collateral": [{"output_pointer": format!("{}:0", "33".repeat(32))}],
                "outputs": [{"pkh": "wit1w", "value": 500}]
            },
            "signatures": [
                {"public_key": {"bytes": vec![1u8; 32], "compressed": 2}}
            ]
        });
        let parsed: CommitJson = serde_json::from_value(txn).unwrap();
        assert_eq!(parsed.body.collateral.len(), 1);
        assert_eq!(parsed.body.outputs[0].value, 500);
        assert_eq!(parsed.body.dr_pointer, Hash::new([0x22; 32]));
    }
}
