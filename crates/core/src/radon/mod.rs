//! Data-request bytecode: deterministic encoding, epoch-gated kind
//! enumeration, and script/result translation.

pub mod encode;
pub mod script;
pub mod wips;

pub use encode::{
    dro_bytes_hash, rad_bytes_hash, DataRequestOutput, RadAggregate, RadFilter, RadRequest,
    RadRetrieve, RadTally, RetrievalKind,
};
pub use script::{
    decode_result, translate_filter_stage, translate_script, translate_stage, RadonResult,
};
pub use wips::{MainnetActivations, TableActivations, WipActivations, MAINNET_ACTIVATIONS};
