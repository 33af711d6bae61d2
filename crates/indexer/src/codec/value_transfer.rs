//! Value-transfer decoder.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use witscan_core::constants::vt_weight;

use super::{
    calculate_priority, input_addresses, pointer_strings, split_outputs, txn_hash, InputJson,
    InputResolver, KeyedSignatureJson, OutputJson,
};
use crate::storage::ValueTransferRecord;

#[derive(Debug, Deserialize)]
struct ValueTransferJson {
    body: ValueTransferBody,
    #[serde(default)]
    signatures: Vec<KeyedSignatureJson>,
}

#[derive(Debug, Deserialize)]
struct ValueTransferBody {
    #[serde(default)]
    inputs: Vec<InputJson>,
    #[serde(default)]
    outputs: Vec<OutputJson>,
}

/// Split output value by whether the receiving address also appears among
/// the inputs. A genuine self-payment is indistinguishable from change
/// here; the split is a display heuristic only.
pub fn split_true_change(
    input_addresses: &[String],
    outputs: &[OutputJson],
) -> (u64, u64) {
    let input_set: HashSet<&str> = input_addresses.iter().map(String::as_str).collect();
    let mut true_value = 0u64;
    let mut change_value = 0u64;
    for output in outputs {
        if input_set.contains(output.pkh.as_str()) {
            change_value += output.value;
        } else {
            true_value += output.value;
        }
    }
    (true_value, change_value)
}

/// Decode a value transfer, resolving input values locally with a node
/// fallback.
pub async fn decode_value_transfer(
    txn: &Value,
    epoch: u32,
    hrp: &str,
    resolver: &InputResolver<'_>,
) -> Result<ValueTransferRecord> {
    let hash = txn_hash(txn)?;
    let parsed: ValueTransferJson =
        serde_json::from_value(txn.clone()).context("Malformed value transfer")?;

    let pointers: Vec<_> = parsed
        .body
        .inputs
        .iter()
        .map(|i| i.output_pointer)
        .collect();
    let input_values = resolver.resolve_values(&pointers).await?;
    let input_addrs = input_addresses(hrp, &parsed.body.inputs, &parsed.signatures)?;
    let (output_addresses, output_values) = split_outputs(&parsed.body.outputs);
    let (true_value, change_value) = split_true_change(&input_addrs, &parsed.body.outputs);

    let total_in: u64 = input_values.iter().sum();
    let total_out: u64 = output_values.iter().sum();
    // Inputless transfers are coinbase-style and carry no fee.
    let fee = if parsed.body.inputs.is_empty() {
        0
    } else {
        total_in.saturating_sub(total_out)
    };
    let weight = vt_weight(
        parsed.body.inputs.len() as u64,
        parsed.body.outputs.len() as u64,
    );
    let priority = calculate_priority(fee, weight, false);

    Ok(ValueTransferRecord {
        txn_hash: hash,
        epoch,
        input_addresses: input_addrs,
        input_values,
        input_pointers: pointer_strings(&parsed.body.inputs),
        output_addresses,
        output_values,
        true_value,
        change_value,
        fee,
        weight: weight as u32,
        priority,
    })
}

/// Fee and weight only, for mempool sampling.
pub async fn pending_fee_weight(
    txn: &Value,
    resolver: &InputResolver<'_>,
) -> Result<(u64, u64)> {
    let parsed: ValueTransferJson =
        serde_json::from_value(txn.clone()).context("Malformed value transfer")?;
    let pointers: Vec<_> = parsed
        .body
        .inputs
        .iter()
        .map(|i| i.output_pointer)
        .collect();
    let input_values = resolver.resolve_values(&pointers).await?;
    let total_in: u64 = input_values.iter().sum();
    let total_out: u64 = parsed.body.outputs.iter().map(|o| o.value).sum();
    let fee = if parsed.body.inputs.is_empty() {
        0
    } else {
        total_in.saturating_sub(total_out)
    };
    let weight = vt_weight(
        parsed.body.inputs.len() as u64,
        parsed.body.outputs.len() as u64,
    );
    Ok((fee, weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_split_counts_self_payment_as_change() {
        let inputs = vec!["wit1alice".to_string()];
        let outputs = vec![
            OutputJson {
                pkh: "wit1bob".into(),
                value: 700,
            },
            OutputJson {
                pkh: "wit1alice".into(),
                value: 250,
            },
        ];
        let (true_value, change_value) = split_true_change(&inputs, &outputs);
        assert_eq!(true_value, 700);
        assert_eq!(change_value, 250);
    }

    #[test]
    fn split_with_no_inputs_is_all_true() {
        let outputs = vec![OutputJson {
            pkh: "wit1bob".into(),
            value: 10,
        }];
        let (true_value, change_value) = split_true_change(&[], &outputs);
        assert_eq!(true_value, 10);
        assert_eq!(change_value, 0);
    }
}
