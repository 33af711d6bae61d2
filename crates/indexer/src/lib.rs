//! Witnet chain ingestion for witscan.
//!
//! This crate provides:
//! - A JSON-RPC client pool over persistent node connections
//! - Transaction decoders that normalize node JSON into storage records
//! - SQLite storage with per-epoch atomic batches
//! - The insert / confirm / pending ingestion loops
//! - Best-effort address-cache notifications
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────┐
//! │  witscan-indexer (this)           │
//! │                                   │
//! │  ┌──────────────┐                 │
//! │  │ Insert loop  │ ← node JSON-RPC │
//! │  │ (tokio task) │   getBlockChain │
//! │  └──────┬───────┘   getBlock      │
//! │         │ EpochBatch              │
//! │    ┌────▼──────┐                  │
//! │    │  Storage  │ ← SQLite         │
//! │    └────┬──────┘                  │
//! │         │ unconfirmed (epoch, hash)
//! │  ┌──────▼───────┐ ┌─────────────┐ │
//! │  │ Confirm loop │ │ Pending loop│ │
//! │  │ (tokio task) │ │ (tokio task)│ │
//! │  └──────────────┘ └─────────────┘ │
//! └───────────────┬───────────────────┘
//!                 │ line JSON
//!         address cache (optional)
//! ```
//!
//! Pure chain rules (hashes, addresses, weights, RADON bytecode) live in
//! `witscan-core`; this crate owns everything that talks to a socket or a
//! database.

#![warn(clippy::all)]

pub mod address_index;
pub mod codec;
pub mod config;
pub mod node;
pub mod notify;
pub mod pipeline;
pub mod storage;

pub use witscan_core::{ConsensusConstants, Hash, OutputPointer, TransactionKind};
