//! Record types flowing between the codecs and the database.

use serde::{Deserialize, Serialize};
use witscan_core::{Hash, TransactionKind};

/// What a row in the `hashes` table points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// A block hash.
    Block,
    /// A transaction hash of the given kind.
    Transaction(TransactionKind),
    /// SHA-256 of encoded retrieval/aggregation/tally bytecode.
    RadBytecode,
    /// SHA-256 of the full encoded data-request output.
    DroBytecode,
}

impl HashKind {
    /// Stable label stored in the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::Block => "block",
            HashKind::Transaction(kind) => kind.as_str(),
            HashKind::RadBytecode => "rad_bytes",
            HashKind::DroBytecode => "dro_bytes",
        }
    }

    /// Bytecode hashes recur across data requests, so they carry no epoch.
    pub fn has_epoch(&self) -> bool {
        !matches!(self, HashKind::RadBytecode | HashKind::DroBytecode)
    }
}

/// One `hashes` row.
#[derive(Debug, Clone)]
pub struct HashRecord {
    /// The 32-byte hash.
    pub hash: Hash,
    /// What the hash points at.
    pub kind: HashKind,
    /// Epoch of the containing block, `None` for bytecode hashes.
    pub epoch: Option<u32>,
}

/// One `blocks` row.
#[derive(Debug, Clone, Default)]
pub struct BlockRecord {
    pub block_hash: Hash,
    pub epoch: u32,
    pub value_transfer_count: u32,
    pub data_request_count: u32,
    pub commit_count: u32,
    pub reveal_count: u32,
    pub tally_count: u32,
    pub block_weight: u32,
    pub vt_weight: u32,
    pub dr_weight: u32,
    pub confirmed: bool,
    pub reverted: bool,
    pub signals: Option<u32>,
}

/// One `mint_txns` row. The miner reward split across its outputs.
#[derive(Debug, Clone)]
pub struct MintRecord {
    pub txn_hash: Hash,
    pub epoch: u32,
    pub miner: String,
    pub output_addresses: Vec<String>,
    pub output_values: Vec<u64>,
}

/// One `value_transfer_txns` row.
#[derive(Debug, Clone)]
pub struct ValueTransferRecord {
    pub txn_hash: Hash,
    pub epoch: u32,
    pub input_addresses: Vec<String>,
    pub input_values: Vec<u64>,
    pub input_pointers: Vec<String>,
    pub output_addresses: Vec<String>,
    pub output_values: Vec<u64>,
    /// Value sent to addresses outside the input set. A self-payment to an
    /// input address is indistinguishable from change and lands in
    /// `change_value`; the split is a display heuristic, not sender intent.
    pub true_value: u64,
    pub change_value: u64,
    pub fee: u64,
    pub weight: u32,
    pub priority: u64,
}

/// One `data_request_txns` row.
#[derive(Debug, Clone)]
pub struct DataRequestRecord {
    pub txn_hash: Hash,
    pub epoch: u32,
    pub input_addresses: Vec<String>,
    pub input_values: Vec<u64>,
    pub input_pointers: Vec<String>,
    /// Change output, at most one.
    pub output_address: Option<String>,
    pub output_value: Option<u64>,
    pub witnesses: u32,
    pub witness_reward: u64,
    pub collateral: u64,
    pub commit_and_reveal_fee: u64,
    pub min_consensus_percentage: u32,
    pub dro_fee: u64,
    pub miner_fee: u64,
    pub weight: u32,
    pub priority: u64,
    pub retrieve_kinds: Vec<String>,
    pub retrieve_urls: Vec<String>,
    /// Translated retrieval scripts, one per source.
    pub retrieve_scripts: Vec<String>,
    pub aggregate_script: String,
    pub tally_script: String,
    pub rad_bytes_hash: Hash,
    pub dro_bytes_hash: Hash,
}

/// One `commit_txns` row.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub txn_hash: Hash,
    pub epoch: u32,
    /// The committing witness.
    pub txn_address: String,
    pub input_values: Vec<u64>,
    pub input_pointers: Vec<String>,
    /// Change output, at most one.
    pub output_value: Option<u64>,
    pub data_request: Hash,
    pub collateral: u64,
}

/// One `reveal_txns` row.
#[derive(Debug, Clone)]
pub struct RevealRecord {
    pub txn_hash: Hash,
    pub epoch: u32,
    pub txn_address: String,
    pub data_request: Hash,
    /// Raw CBOR reveal payload.
    pub result: Vec<u8>,
    pub success: bool,
}

/// One `tally_txns` row.
#[derive(Debug, Clone)]
pub struct TallyRecord {
    pub txn_hash: Hash,
    pub epoch: u32,
    pub data_request: Hash,
    pub output_addresses: Vec<String>,
    pub output_values: Vec<u64>,
    pub error_addresses: Vec<String>,
    pub liar_addresses: Vec<String>,
    /// Raw CBOR tally payload.
    pub result: Vec<u8>,
    pub success: bool,
}

/// Per-address activity increments for one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressDelta {
    /// Epoch of the block that produced this delta.
    pub active: u32,
    pub blocks: u32,
    pub mints: u32,
    pub value_transfers: u32,
    pub data_requests: u32,
    pub commits: u32,
    pub reveals: u32,
    pub tallies: u32,
}

/// One `addresses` row as read back from the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address: String,
    pub label: String,
    pub active: u32,
    pub blocks: u32,
    pub mints: u32,
    pub value_transfers: u32,
    pub data_requests: u32,
    pub commits: u32,
    pub reveals: u32,
    pub tallies: u32,
}

/// Indexer progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncState {
    /// Highest fully ingested epoch, `-1` before the first block.
    pub last_epoch: i64,
    /// Unix timestamp of the last update.
    pub updated_at: i64,
}

/// One mempool histogram sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSample {
    /// Unix timestamp of the sample.
    pub timestamp: i64,
    /// Histogram bucket edges, nanowits per weight unit.
    pub fee_per_unit: Vec<u64>,
    /// Transaction count per bucket.
    pub num_txns: Vec<u64>,
}
