//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A hash literal that is not 64 hex characters.
    #[error("Invalid hash literal: {0}")]
    InvalidHash(String),

    /// An output pointer that is not `<hash>:<index>`.
    #[error("Invalid output pointer: {0}")]
    InvalidOutputPointer(String),

    /// Unknown transaction kind label.
    #[error("Unknown transaction kind: {0}")]
    UnknownKind(String),

    /// A retrieval kind that is not encodable at the given epoch.
    #[error("Retrieval kind {kind} is not valid at epoch {epoch}")]
    KindNotActive {
        /// Display label of the offending kind.
        kind: &'static str,
        /// Epoch the encoding was attempted at.
        epoch: u32,
    },

    /// A public key payload of the wrong length.
    #[error("Invalid public key length: {0} (expected 32)")]
    InvalidPublicKey(usize),

    /// Bech32 rendering failure.
    #[error("Bech32 encoding failed: {0}")]
    Bech32(#[from] bech32::Error),

    /// A RADON script that does not decode to a CBOR call array.
    #[error("Malformed RADON script: {0}")]
    MalformedScript(String),

    /// A CBOR payload that does not decode at all.
    #[error("Malformed CBOR payload: {0}")]
    MalformedCbor(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
