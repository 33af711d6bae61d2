//! Deterministic bytecode encoder for data requests.
//!
//! Re-serializes a data request's retrieval/aggregation/tally stages into
//! the exact length-delimited tag/value layout the network uses, and hashes
//! the result. The two hashes produced here (RAD bytes hash over the
//! request stages, DRO bytes hash over the full output) are recomputed
//! locally and are authoritative: they are never copied from node output.
//!
//! Encoding contract: a field is written only when it differs from its
//! default. Tags are `(field_number << 3) | wire_type`, wire type 0 for
//! varints and 2 for length-delimited payloads.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::radon::wips::{
    WipActivations, WIP_HTTP_POST, WIP_REJECT_UNKNOWN, WIP_RETRIEVAL_KINDS,
};
use crate::types::Hash;

const WIRE_VARINT: u32 = 0;
const WIRE_LEN: u32 = 2;

/// How a retrieval stage fetches its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetrievalKind {
    /// Unrecognized kind reported by the node.
    #[default]
    Unknown,
    /// Plain HTTP GET.
    #[serde(rename = "HTTP-GET")]
    HttpGet,
    /// On-chain randomness.
    #[serde(rename = "RNG")]
    Rng,
    /// HTTP POST with body and headers.
    #[serde(rename = "HTTP-POST")]
    HttpPost,
}

impl RetrievalKind {
    /// Display label, matching the node's JSON enumeration.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RetrievalKind::Unknown => "Unknown",
            RetrievalKind::HttpGet => "HTTP-GET",
            RetrievalKind::Rng => "RNG",
            RetrievalKind::HttpPost => "HTTP-POST",
        }
    }

    /// Wire value for this kind at the given epoch, or an error when the
    /// kind is not yet (or no longer) encodable there.
    fn wire_value(&self, epoch: u32, wips: &dyn WipActivations) -> Result<u64> {
        let not_active = || CoreError::KindNotActive {
            kind: self.as_str(),
            epoch,
        };

        if !wips.is_active(WIP_RETRIEVAL_KINDS, epoch) {
            // Genesis era: HTTP-GET is the only kind and carries value 0.
            return match self {
                RetrievalKind::HttpGet => Ok(0),
                _ => Err(not_active()),
            };
        }
        match self {
            RetrievalKind::Unknown => {
                if wips.is_active(WIP_REJECT_UNKNOWN, epoch) {
                    Err(not_active())
                } else {
                    Ok(0)
                }
            }
            RetrievalKind::HttpGet => Ok(1),
            RetrievalKind::Rng => Ok(2),
            RetrievalKind::HttpPost => {
                if wips.is_active(WIP_HTTP_POST, epoch) {
                    Ok(3)
                } else {
                    Err(not_active())
                }
            }
        }
    }
}

impl fmt::Display for RetrievalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrieval stage of a data request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RadRetrieve {
    /// Retrieval mechanism.
    #[serde(default)]
    pub kind: RetrievalKind,
    /// Source URL (empty for RNG).
    #[serde(default)]
    pub url: String,
    /// CBOR-encoded RADON script applied to the response.
    #[serde(default)]
    pub script: Vec<u8>,
    /// HTTP request body (HTTP-POST only).
    #[serde(default)]
    pub body: Vec<u8>,
    /// HTTP request headers (HTTP-POST only).
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// A single filter application inside an aggregation or tally stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RadFilter {
    /// Filter opcode.
    #[serde(default)]
    pub op: u32,
    /// CBOR-encoded filter argument.
    #[serde(default)]
    pub args: Vec<u8>,
}

/// Aggregation stage: filters applied per source, then a reducer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RadAggregate {
    /// Filters applied before reducing.
    #[serde(default)]
    pub filters: Vec<RadFilter>,
    /// Reducer opcode.
    #[serde(default)]
    pub reducer: u32,
}

/// Tally stage: filters applied across witnesses, then a reducer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RadTally {
    /// Filters applied before reducing.
    #[serde(default)]
    pub filters: Vec<RadFilter>,
    /// Reducer opcode.
    #[serde(default)]
    pub reducer: u32,
}

/// The retrieval/aggregate/tally payload of a data request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RadRequest {
    /// Unix timestamp before which the request may not be resolved.
    #[serde(default)]
    pub time_lock: u64,
    /// Retrieval stages, one per source.
    #[serde(default)]
    pub retrieve: Vec<RadRetrieve>,
    /// Aggregation stage.
    #[serde(default)]
    pub aggregate: RadAggregate,
    /// Tally stage.
    #[serde(default)]
    pub tally: RadTally,
}

/// The full data-request output: RAD payload plus economic parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct DataRequestOutput {
    /// The RAD payload.
    #[serde(default)]
    pub data_request: RadRequest,
    /// Reward per witness.
    #[serde(default)]
    pub witness_reward: u64,
    /// Number of witnesses the request asks for.
    #[serde(default)]
    pub witnesses: u32,
    /// Fee paid per commit and per reveal the miner includes.
    #[serde(default)]
    pub commit_and_reveal_fee: u64,
    /// Minimum consensus percentage for the tally to succeed.
    #[serde(default)]
    pub min_consensus_percentage: u32,
    /// Collateral each witness must lock.
    #[serde(default)]
    pub collateral: u64,
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn put_tag(buf: &mut Vec<u8>, field: u32, wire: u32) {
    put_varint(buf, u64::from(field << 3 | wire));
}

fn put_uint(buf: &mut Vec<u8>, field: u32, value: u64) {
    if value != 0 {
        put_tag(buf, field, WIRE_VARINT);
        put_varint(buf, value);
    }
}

fn put_bytes(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    if !bytes.is_empty() {
        put_tag(buf, field, WIRE_LEN);
        put_varint(buf, bytes.len() as u64);
        buf.extend_from_slice(bytes);
    }
}

/// Nested messages are omitted when they encode to nothing, the same as
/// any other default-valued field.
fn put_message(buf: &mut Vec<u8>, field: u32, encoded: &[u8]) {
    put_bytes(buf, field, encoded);
}

impl RadRetrieve {
    fn encode(&self, epoch: u32, wips: &dyn WipActivations) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        put_uint(&mut buf, 1, self.kind.wire_value(epoch, wips)?);
        put_bytes(&mut buf, 2, self.url.as_bytes());
        put_bytes(&mut buf, 3, &self.script);
        // Bodies and headers only exist on the wire once HTTP-POST does.
        if wips.is_active(WIP_HTTP_POST, epoch) {
            put_bytes(&mut buf, 4, &self.body);
            for (name, value) in &self.headers {
                let mut pair = Vec::new();
                put_bytes(&mut pair, 1, name.as_bytes());
                put_bytes(&mut pair, 2, value.as_bytes());
                put_message(&mut buf, 5, &pair);
            }
        }
        Ok(buf)
    }
}

impl RadFilter {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_uint(&mut buf, 1, u64::from(self.op));
        put_bytes(&mut buf, 2, &self.args);
        buf
    }
}

fn encode_filter_stage(filters: &[RadFilter], reducer: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    for filter in filters {
        put_message(&mut buf, 1, &filter.encode());
    }
    put_uint(&mut buf, 2, u64::from(reducer));
    buf
}

impl RadRequest {
    /// Serialize to network bytes, using the kind enumeration in force at
    /// `epoch`.
    pub fn encode(&self, epoch: u32, wips: &dyn WipActivations) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        put_uint(&mut buf, 1, self.time_lock);
        for retrieve in &self.retrieve {
            put_message(&mut buf, 2, &retrieve.encode(epoch, wips)?);
        }
        put_message(
            &mut buf,
            3,
            &encode_filter_stage(&self.aggregate.filters, self.aggregate.reducer),
        );
        put_message(
            &mut buf,
            4,
            &encode_filter_stage(&self.tally.filters, self.tally.reducer),
        );
        Ok(buf)
    }
}

impl DataRequestOutput {
    /// Serialize to network bytes.
    pub fn encode(&self, epoch: u32, wips: &dyn WipActivations) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        put_message(&mut buf, 1, &self.data_request.encode(epoch, wips)?);
        put_uint(&mut buf, 2, self.witness_reward);
        put_uint(&mut buf, 3, u64::from(self.witnesses));
        put_uint(&mut buf, 4, self.commit_and_reveal_fee);
        put_uint(&mut buf, 5, u64::from(self.min_consensus_percentage));
        put_uint(&mut buf, 6, self.collateral);
        Ok(buf)
    }
}

fn sha256(bytes: &[u8]) -> Hash {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash::new(out)
}

/// SHA-256 over the serialized RAD payload.
pub fn rad_bytes_hash(
    request: &RadRequest,
    epoch: u32,
    wips: &dyn WipActivations,
) -> Result<Hash> {
    Ok(sha256(&request.encode(epoch, wips)?))
}

/// SHA-256 over the serialized data-request output.
pub fn dro_bytes_hash(
    output: &DataRequestOutput,
    epoch: u32,
    wips: &dyn WipActivations,
) -> Result<Hash> {
    Ok(sha256(&output.encode(epoch, wips)?))
}
