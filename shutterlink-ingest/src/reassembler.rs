//! Message-driven reassembly engine.
//!
//! [`Reassembler::handle_message`] is the single entry point: decode the wire
//! message, route it to the owning transfer's state, and on the completion
//! edge validate the assembled payload and hand the blob to the sink. The
//! sink runs outside every lock, so a slow store never blocks other
//! transfers or the sweeper.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shutterlink_protocol::codec::{self, CodecError};
use shutterlink_protocol::transfer::{decode_message, TransferEnvelope, TransferMessage};
use shutterlink_protocol::types::TransferId;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::IngestConfig;
use crate::registry::TransferRegistry;
use crate::sink::BlobSink;
use crate::state::{FailureReason, Ingestion};
use crate::validate::{validate, ValidationError};

/// Errors surfaced per message. The registry stays consistent across all of
/// these; a failed transfer is terminal, not retried.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed wire message")]
    Wire(#[from] postcard::Error),
    #[error("payload decode failed for transfer {transfer_id}")]
    Codec {
        transfer_id: TransferId,
        #[source]
        source: CodecError,
    },
    #[error("validation failed for transfer {transfer_id}")]
    Validation {
        transfer_id: TransferId,
        #[source]
        source: ValidationError,
    },
    /// The transfer is complete; only persistence failed. The caller may
    /// retry storage out of band.
    #[error("sink failed for transfer {transfer_id}")]
    Sink {
        transfer_id: TransferId,
        #[source]
        source: anyhow::Error,
    },
}

/// Counters across the reassembler's lifetime.
#[derive(Default)]
pub struct IngestMetrics {
    pub messages_received: AtomicU64,
    pub duplicates_ignored: AtomicU64,
    pub late_discards: AtomicU64,
    pub transfers_completed: AtomicU64,
    pub transfers_failed: AtomicU64,
}

/// A transfer that passed validation, as handed to the sink.
#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub envelope: TransferEnvelope,
    pub blob: Vec<u8>,
}

/// Receives transfer messages in any order and emits each completed blob
/// exactly once.
pub struct Reassembler<S> {
    registry: Arc<TransferRegistry>,
    sink: S,
    max_transfer_size: u64,
    metrics: IngestMetrics,
}

impl<S: BlobSink> Reassembler<S> {
    pub fn new(config: &IngestConfig, sink: S) -> Self {
        Self {
            registry: Arc::new(TransferRegistry::new(config)),
            sink,
            max_transfer_size: config.max_transfer_size,
            metrics: IngestMetrics::default(),
        }
    }

    /// The registry backing this reassembler, for sweeping and inspection.
    pub fn registry(&self) -> Arc<TransferRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn metrics(&self) -> &IngestMetrics {
        &self.metrics
    }

    /// Ingest one raw message from either transport.
    ///
    /// Returns `Ok(Some(_))` exactly once per transfer, on the message that
    /// completed it. Duplicates, in-progress fragments, and late arrivals
    /// for settled transfers all return `Ok(None)`.
    pub async fn handle_message(
        &self,
        payload: &[u8],
    ) -> Result<Option<CompletedTransfer>, IngestError> {
        self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        let message = decode_message(payload)?;
        let transfer_id = message.transfer_id().clone();
        let now = Instant::now();

        let entry = self.registry.entry(&transfer_id, now).await;
        let mut state = entry.lock().await;

        let outcome = match message {
            TransferMessage::Envelope(envelope) => {
                if state.status().is_terminal() {
                    Ingestion::TerminalDiscard
                } else if envelope.total_size > self.max_transfer_size {
                    let reason = FailureReason::Validation(format!(
                        "declared size {} exceeds the {} byte ceiling",
                        envelope.total_size, self.max_transfer_size
                    ));
                    state.mark_failed(reason.clone(), now);
                    Ingestion::Rejected(reason)
                } else {
                    state.apply_envelope(envelope, now)
                }
            }
            TransferMessage::Fragment(fragment) => state.apply_fragment(fragment, now),
        };

        match outcome {
            Ingestion::Accepted => Ok(None),
            Ingestion::Duplicate => {
                self.metrics.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%transfer_id, "duplicate message ignored");
                Ok(None)
            }
            Ingestion::TerminalDiscard => {
                self.metrics.late_discards.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%transfer_id, "late arrival for settled transfer discarded");
                Ok(None)
            }
            Ingestion::Rejected(reason) => {
                self.metrics.transfers_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%transfer_id, %reason, "transfer failed");
                Ok(None)
            }
            Ingestion::Assembled { envelope, encoded } => {
                // Validate on the completion edge, still under this
                // transfer's lock, so the settled status and the emission
                // decision are atomic.
                let blob = match codec::decode(&encoded) {
                    Ok(blob) => blob,
                    Err(source) => {
                        state.mark_failed(FailureReason::Validation(source.to_string()), now);
                        self.metrics.transfers_failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(%transfer_id, %source, "assembled payload failed to decode");
                        return Err(IngestError::Codec {
                            transfer_id,
                            source,
                        });
                    }
                };
                if let Err(source) = validate(&envelope, encoded.len() as u64, &blob) {
                    state.mark_failed(FailureReason::Validation(source.to_string()), now);
                    self.metrics.transfers_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%transfer_id, %source, "assembled transfer failed validation");
                    return Err(IngestError::Validation {
                        transfer_id,
                        source,
                    });
                }
                state.mark_complete(now);
                drop(state);

                self.metrics.transfers_completed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    %transfer_id,
                    source_id = %envelope.source_id,
                    bytes = blob.len(),
                    "transfer complete"
                );

                self.sink
                    .store(&envelope, &blob)
                    .await
                    .map_err(|source| IngestError::Sink {
                        transfer_id,
                        source,
                    })?;
                Ok(Some(CompletedTransfer { envelope, blob }))
            }
        }
    }
}
