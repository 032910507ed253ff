//! Transfer wire types: envelope, fragment, and message framing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{SourceId, TransferId};

/// Metadata describing one transfer, sent as a distinct control message.
///
/// The envelope must be processable independently of fragment ordering:
/// the transport gives no ordering guarantee, so it may arrive before,
/// between, or after the fragments it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEnvelope {
    pub transfer_id: TransferId,
    pub source_id: SourceId,
    /// Sender-side capture timestamp, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Byte length of the encoded payload.
    pub total_size: u64,
    /// Total fragments the payload was split into; fixed once the transfer starts.
    pub fragment_count: u32,
    /// Nominal fragment size in encoded bytes (last fragment may be shorter).
    pub fragment_size: u32,
    /// SHA-256 of the raw blob, verified after reassembly.
    pub checksum: [u8; 32],
    /// Free-form metadata (resolution, firmware version, ...), passed through
    /// unvalidated.
    pub attributes: BTreeMap<String, String>,
}

/// One bounded-size piece of an encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub transfer_id: TransferId,
    /// Zero-based, unique within a transfer.
    pub sequence_index: u32,
    /// Contiguous slice of the encoded payload, at most `fragment_size` bytes.
    pub payload_chunk: String,
    pub is_last: bool,
}

/// The unit carried by the transports: either a transfer's envelope or one
/// of its fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMessage {
    Envelope(TransferEnvelope),
    Fragment(Fragment),
}

impl TransferMessage {
    /// The transfer this message belongs to.
    pub fn transfer_id(&self) -> &TransferId {
        match self {
            TransferMessage::Envelope(e) => &e.transfer_id,
            TransferMessage::Fragment(f) => &f.transfer_id,
        }
    }
}

/// Serialize a `TransferMessage` to compact binary via postcard.
pub fn encode_message(msg: &TransferMessage) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_allocvec(msg)
}

/// Deserialize a `TransferMessage` from postcard bytes.
pub fn decode_message(data: &[u8]) -> Result<TransferMessage, postcard::Error> {
    postcard::from_bytes(data)
}
