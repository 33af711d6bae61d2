//! Tally decoder.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use witscan_core::radon::decode_result;
use witscan_core::Hash;

use super::{split_outputs, txn_hash, OutputJson};
use crate::storage::TallyRecord;

#[derive(Debug, Deserialize)]
struct TallyJson {
    dr_pointer: Hash,
    #[serde(default)]
    tally: Vec<u8>,
    #[serde(default)]
    outputs: Vec<OutputJson>,
    #[serde(default)]
    error_committers: Vec<String>,
    /// Everyone outside consensus, error committers included.
    #[serde(default)]
    out_of_consensus: Vec<String>,
}

/// Decode a tally. Liars are the out-of-consensus witnesses that did not
/// merely reveal an error.
pub fn decode_tally(txn: &Value, epoch: u32) -> Result<TallyRecord> {
    let hash = txn_hash(txn)?;
    let parsed: TallyJson = serde_json::from_value(txn.clone()).context("Malformed tally")?;

    let (output_addresses, output_values) = split_outputs(&parsed.outputs);
    let liar_addresses: Vec<String> = parsed
        .out_of_consensus
        .iter()
        .filter(|addr| !parsed.error_committers.contains(addr))
        .cloned()
        .collect();
    let success = decode_result(&parsed.tally).success;

    Ok(TallyRecord {
        txn_hash: hash,
        epoch,
        data_request: parsed.dr_pointer,
        output_addresses,
        output_values,
        error_addresses: parsed.error_committers,
        liar_addresses,
        result: parsed.tally,
        success,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value as Cbor;
    use serde_json::json;

    fn cbor_bytes(value: &Cbor) -> Vec<u8> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(value, &mut out).unwrap();
        out
    }

    #[test]
    fn liars_exclude_error_committers() {
        let txn = json!({
            "hash": "66".repeat(32),
            "dr_pointer": "77".repeat(32),
            "tally": cbor_bytes(&Cbor::Integer(42.into())),
            "outputs": [{"pkh": "wit1honest", "value": 1000}],
            "error_committers": ["wit1err"],
            "out_of_consensus": ["wit1err", "wit1liar"]
        });
        let rec = decode_tally(&txn, 300).unwrap();
        assert!(rec.success);
        assert_eq!(rec.error_addresses, vec!["wit1err"]);
        assert_eq!(rec.liar_addresses, vec!["wit1liar"]);
        assert_eq!(rec.output_addresses, vec!["wit1honest"]);
    }

    #[test]
    fn tagged_error_tally_is_unsuccessful() {
        let payload = cbor_bytes(&Cbor::Tag(
            39,
            Box::new(Cbor::Array(vec![
                Cbor::Integer(0x50.into()),
                Cbor::Integer(2.into()),
                Cbor::Integer(10.into()),
            ])),
        ));
        let txn = json!({
            "hash": "88".repeat(32),
            "dr_pointer": "99".repeat(32),
            "tally": payload,
            "outputs": [],
            "error_committers": [],
            "out_of_consensus": []
        });
        let rec = decode_tally(&txn, 301).unwrap();
        assert!(!rec.success);
    }
}
