//! Shared wire types, identifiers, and payload codec for shutterlink.

pub mod codec;
pub mod transfer;
pub mod types;

pub use transfer::{decode_message, encode_message, Fragment, TransferEnvelope, TransferMessage};
pub use types::{SourceId, TransferId};
