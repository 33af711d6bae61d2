//! Domain primitives for the witscan ingestion pipeline.
//!
//! This crate is pure: hashes, addresses, consensus parameters, the
//! deterministic data-request bytecode encoder, and the RADON translator.
//! Everything with I/O (node RPC, storage, the ingestion loops) lives in
//! `witscan-indexer`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod constants;
pub mod error;
pub mod radon;
pub mod types;

pub use constants::ConsensusConstants;
pub use error::CoreError;
pub use types::{Hash, OutputPointer, TransactionKind};
