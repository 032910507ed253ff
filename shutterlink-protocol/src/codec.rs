//! Transport-safe text codec for blob payloads.
//!
//! Blobs are carried over the wire as base64 text so that size-limited,
//! text-oriented transports can handle them. The transform is stateless and
//! total-bijective: `decode(encode(b)) == b` for every byte sequence.

use data_encoding::BASE64;
use thiserror::Error;

/// Errors when decoding a text payload back into bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] data_encoding::DecodeError),
}

/// Encode raw bytes into transport-safe base64 text.
pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode base64 text back into the original bytes.
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(BASE64.decode(text.as_bytes())?)
}

/// Encoded length in bytes for a raw payload of `raw_len` bytes.
///
/// Base64 expands every 3 input bytes to 4 output characters, padded.
pub fn encoded_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}
