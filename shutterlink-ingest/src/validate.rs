//! Completion-edge checks on an assembled transfer.

use sha2::{Digest, Sha256};
use shutterlink_protocol::transfer::TransferEnvelope;
use thiserror::Error;

/// Why an assembled payload was rejected.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("envelope field `{0}` is empty")]
    MissingField(&'static str),
    #[error("assembled payload is {actual} bytes, envelope declared {declared}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("checksum mismatch on decoded payload")]
    ChecksumMismatch,
}

/// Check an assembled transfer against its envelope: required fields,
/// declared encoded size, and the checksum of the decoded blob.
pub fn validate(
    envelope: &TransferEnvelope,
    encoded_len: u64,
    blob: &[u8],
) -> Result<(), ValidationError> {
    if envelope.transfer_id.as_str().is_empty() {
        return Err(ValidationError::MissingField("transfer_id"));
    }
    if envelope.source_id.as_str().is_empty() {
        return Err(ValidationError::MissingField("source_id"));
    }
    if encoded_len != envelope.total_size {
        return Err(ValidationError::SizeMismatch {
            declared: envelope.total_size,
            actual: encoded_len,
        });
    }
    let digest = Sha256::digest(blob);
    if digest.as_slice() != envelope.checksum {
        return Err(ValidationError::ChecksumMismatch);
    }
    Ok(())
}
