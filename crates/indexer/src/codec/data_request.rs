//! Data-request decoder.
//!
//! The heaviest codec: besides the usual normalization it re-encodes the
//! request's bytecode to recompute the RAD and DRO hashes, and decompiles
//! every RADON script for display.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use witscan_core::constants::dr_weight;
use witscan_core::radon::{
    dro_bytes_hash, rad_bytes_hash, translate_script, translate_stage, DataRequestOutput,
    WipActivations,
};

use super::{
    calculate_priority, input_addresses, pointer_strings, txn_hash, InputJson, InputResolver,
    KeyedSignatureJson, OutputJson,
};
use crate::storage::DataRequestRecord;

#[derive(Debug, Deserialize)]
struct DataRequestJson {
    body: DataRequestBody,
    #[serde(default)]
    signatures: Vec<KeyedSignatureJson>,
}

#[derive(Debug, Deserialize)]
struct DataRequestBody {
    dr_output: DataRequestOutput,
    #[serde(default)]
    inputs: Vec<InputJson>,
    #[serde(default)]
    outputs: Vec<OutputJson>,
}

/// Decode a data request.
///
/// Invariant carried over from the chain: a data request has at most one
/// output (the change left after funding the request). More than one is
/// rejected, not generalized to "first output".
pub async fn decode_data_request(
    txn: &Value,
    epoch: u32,
    hrp: &str,
    wips: &dyn WipActivations,
    resolver: &InputResolver<'_>,
) -> Result<DataRequestRecord> {
    let hash = txn_hash(txn)?;
    let parsed: DataRequestJson =
        serde_json::from_value(txn.clone()).context("Malformed data request")?;

    if parsed.body.outputs.len() > 1 {
        bail!(
            "data request {} carries {} outputs, expected at most one",
            hash,
            parsed.body.outputs.len()
        );
    }
    let output_address = parsed.body.outputs.first().map(|o| o.pkh.clone());
    let output_value = parsed.body.outputs.first().map(|o| o.value);

    let pointers: Vec<_> = parsed
        .body
        .inputs
        .iter()
        .map(|i| i.output_pointer)
        .collect();
    let input_values = resolver.resolve_values(&pointers).await?;
    let input_addrs = input_addresses(hrp, &parsed.body.inputs, &parsed.signatures)?;

    let dro = &parsed.body.dr_output;
    let rad_hash = rad_bytes_hash(&dro.data_request, epoch, wips)
        .context("Failed to encode RAD payload")?;
    let dro_bytes = dro
        .encode(epoch, wips)
        .context("Failed to encode data-request output")?;
    let dro_hash = dro_bytes_hash(dro, epoch, wips)?;

    let retrieve_kinds = dro
        .data_request
        .retrieve
        .iter()
        .map(|r| r.kind.as_str().to_string())
        .collect();
    let retrieve_urls = dro
        .data_request
        .retrieve
        .iter()
        .map(|r| r.url.clone())
        .collect();
    let retrieve_scripts = dro
        .data_request
        .retrieve
        .iter()
        .map(|r| translate_script(&r.script))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to translate retrieval script")?;
    let aggregate_script = translate_stage(
        &dro.data_request.aggregate.filters,
        dro.data_request.aggregate.reducer,
    );
    let tally_script =
        translate_stage(&dro.data_request.tally.filters, dro.data_request.tally.reducer);

    let witnesses = u64::from(dro.witnesses);
    let dro_fee = witnesses * (dro.witness_reward + 2 * dro.commit_and_reveal_fee) + 1;
    let total_in: u64 = input_values.iter().sum();
    let miner_fee = total_in
        .saturating_sub(output_value.unwrap_or(0))
        .saturating_sub(dro_fee);
    let weight = dr_weight(dro_bytes.len() as u64, witnesses);
    let priority = calculate_priority(miner_fee, weight, true);

    Ok(DataRequestRecord {
        txn_hash: hash,
        epoch,
        input_addresses: input_addrs,
        input_values,
        input_pointers: pointer_strings(&parsed.body.inputs),
        output_address,
        output_value,
        witnesses: dro.witnesses,
        witness_reward: dro.witness_reward,
        collateral: dro.collateral,
        commit_and_reveal_fee: dro.commit_and_reveal_fee,
        min_consensus_percentage: dro.min_consensus_percentage,
        dro_fee,
        miner_fee,
        weight: weight as u32,
        priority,
        retrieve_kinds,
        retrieve_urls,
        retrieve_scripts,
        aggregate_script,
        tally_script,
        rad_bytes_hash: rad_hash,
        dro_bytes_hash: dro_hash,
    })
}

/// Fee and weight only, for mempool sampling.
pub async fn pending_fee_weight(
    txn: &Value,
    epoch: u32,
    wips: &dyn WipActivations,
    resolver: &InputResolver<'_>,
) -> Result<(u64, u64)> {
    let parsed: DataRequestJson =
        serde_json::from_value(txn.clone()).context("Malformed data request")?;
    let pointers: Vec<_> = parsed
        .body
        .inputs
        .iter()
        .map(|i| i.output_pointer)
        .collect();
    let input_values = resolver.resolve_values(&pointers).await?;

    let dro = &parsed.body.dr_output;
    let witnesses = u64::from(dro.witnesses);
    let dro_fee = witnesses * (dro.witness_reward + 2 * dro.commit_and_reveal_fee) + 1;
    let output_value: u64 = parsed.body.outputs.first().map(|o| o.value).unwrap_or(0);
    let total_in: u64 = input_values.iter().sum();
    let fee = total_in.saturating_sub(output_value).saturating_sub(dro_fee);

    let dro_bytes = dro
        .encode(epoch, wips)
        .context("Failed to encode data-request output")?;
    let weight = dr_weight(dro_bytes.len() as u64, witnesses);
    Ok((fee, weight))
}
