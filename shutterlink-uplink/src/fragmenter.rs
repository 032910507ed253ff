//! Blob fragmentation: encode, checksum, and split into wire fragments.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use shutterlink_protocol::codec;
use shutterlink_protocol::transfer::{Fragment, TransferEnvelope};
use shutterlink_protocol::types::{SourceId, TransferId};
use thiserror::Error;

use crate::config::UplinkConfig;

/// Errors when preparing a blob for transfer.
#[derive(Debug, Error)]
pub enum FragmentError {
    /// Rejected before any send: the device could not complete this transfer.
    #[error("encoded payload of {encoded} bytes exceeds the {limit} byte transfer ceiling")]
    PayloadTooLarge { encoded: u64, limit: u64 },
}

/// Envelope plus fragments for one transfer, in ascending index order.
#[derive(Debug, Clone)]
pub struct FragmentedTransfer {
    pub envelope: TransferEnvelope,
    pub fragments: Vec<Fragment>,
}

/// Splits blobs into size-bounded fragments tagged with a fresh transfer id.
pub struct Fragmenter {
    source_id: SourceId,
    fragment_size: u32,
    max_transfer_size: u64,
}

impl Fragmenter {
    /// Create a fragmenter for this device.
    pub fn new(source_id: SourceId, config: &UplinkConfig) -> Self {
        Self {
            source_id,
            fragment_size: config.fragment_size,
            max_transfer_size: config.max_transfer_size,
        }
    }

    /// Encode `blob`, compute its checksum, and split the encoded payload
    /// into fragments of at most `fragment_size` bytes each.
    ///
    /// A zero-length blob yields `fragment_count = 0`: the envelope alone
    /// describes the whole transfer.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentError::PayloadTooLarge`] when the encoded payload
    /// would exceed the configured ceiling. The check runs before encoding,
    /// so an oversized blob never allocates its encoded form.
    pub fn fragment(
        &self,
        blob: &[u8],
        attributes: BTreeMap<String, String>,
    ) -> Result<FragmentedTransfer, FragmentError> {
        let encoded_size = codec::encoded_len(blob.len()) as u64;
        if encoded_size > self.max_transfer_size {
            return Err(FragmentError::PayloadTooLarge {
                encoded: encoded_size,
                limit: self.max_transfer_size,
            });
        }

        let encoded = codec::encode(blob);
        let fragment_count = encoded.len().div_ceil(self.fragment_size as usize) as u32;

        let checksum_digest = Sha256::digest(blob);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&checksum_digest);

        let transfer_id = TransferId::generate();
        let envelope = TransferEnvelope {
            transfer_id: transfer_id.clone(),
            source_id: self.source_id.clone(),
            created_at_ms: now_ms(),
            total_size: encoded.len() as u64,
            fragment_count,
            fragment_size: self.fragment_size,
            checksum,
            attributes,
        };

        let size = self.fragment_size as usize;
        let mut fragments = Vec::with_capacity(fragment_count as usize);
        for i in 0..fragment_count {
            let start = i as usize * size;
            let end = (start + size).min(encoded.len());
            fragments.push(Fragment {
                transfer_id: transfer_id.clone(),
                sequence_index: i,
                // base64 is ASCII, so byte-offset slicing is char-safe
                payload_chunk: encoded[start..end].to_string(),
                is_last: i + 1 == fragment_count,
            });
        }

        tracing::debug!(
            transfer_id = %transfer_id,
            source_id = %self.source_id,
            raw_bytes = blob.len(),
            encoded_bytes = encoded.len(),
            fragment_count,
            "fragmented blob"
        );

        Ok(FragmentedTransfer {
            envelope,
            fragments,
        })
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
