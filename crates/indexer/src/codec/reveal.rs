//! Reveal decoder.
//!
//! The revealed payload stays in storage as raw CBOR; only the success
//! flag is derived eagerly, so the translator runs once per reveal here
//! and on demand at read time.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use witscan_core::radon::decode_result;
use witscan_core::Hash;

use super::{txn_hash, KeyedSignatureJson};
use crate::storage::RevealRecord;

#[derive(Debug, Deserialize)]
struct RevealJson {
    body: RevealBody,
    #[serde(default)]
    signatures: Vec<KeyedSignatureJson>,
}

#[derive(Debug, Deserialize)]
struct RevealBody {
    dr_pointer: Hash,
    #[serde(default)]
    reveal: Vec<u8>,
}

/// Decode a reveal.
pub fn decode_reveal(txn: &Value, epoch: u32, hrp: &str) -> Result<RevealRecord> {
    let hash = txn_hash(txn)?;
    let parsed: RevealJson = serde_json::from_value(txn.clone()).context("Malformed reveal")?;

    let signature = parsed
        .signatures
        .first()
        .context("reveal without signature")?;
    let txn_address = signature.address(hrp)?;
    let success = decode_result(&parsed.body.reveal).success;

    Ok(RevealRecord {
        txn_hash: hash,
        epoch,
        txn_address,
        data_request: parsed.body.dr_pointer,
        result: parsed.body.reveal,
        success,
    })
}
