//! The uplink transfer session.
//!
//! One session per device. `send_blob` takes `&mut self`, so a new transfer
//! cannot start until the previous one reaches a terminal sender-side
//! outcome — outbound memory is bounded to one in-flight blob.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use shutterlink_net::dispatch::{DispatchError, Dispatcher};
use shutterlink_net::transport::{DeliveryResult, PubSubTransport, RequestTransport};
use shutterlink_protocol::transfer::TransferMessage;
use shutterlink_protocol::types::{SourceId, TransferId};
use thiserror::Error;

use crate::capture::{CaptureError, CaptureSource};
use crate::config::UplinkConfig;
use crate::fragmenter::{FragmentError, Fragmenter};

/// Cooperative abort flag, checked between fragment sends.
///
/// Abort is not preemptive: a publish already in flight completes (or times
/// out) before the session observes the flag.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// Create a fresh, unset handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the in-flight transfer stop at the next send boundary.
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether an abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters for the device's transfer history.
#[derive(Debug, Default)]
pub struct UplinkMetrics {
    pub transfers_started: AtomicU64,
    pub transfers_completed: AtomicU64,
    pub transfers_abandoned: AtomicU64,
    pub fragments_sent: AtomicU64,
}

/// Sender-side outcome of one transfer.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub transfer_id: TransferId,
    pub fragment_count: u32,
    /// Per-message delivery results: envelope first, then fragments in
    /// ascending index order.
    pub results: Vec<DeliveryResult>,
    pub fallback_used: bool,
}

impl TransferReport {
    /// Whether every message reached at least `SentUnconfirmed`.
    pub fn sender_complete(&self) -> bool {
        self.results.len() as u32 == self.fragment_count + 1
            && self
                .results
                .iter()
                .all(|r| !matches!(r, DeliveryResult::Failed))
    }
}

/// Errors terminating a transfer on the sender side.
#[derive(Debug, Error)]
pub enum UplinkError {
    #[error(transparent)]
    Fragment(#[from] FragmentError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Dispatch(DispatchError),
    /// Both transports exhausted. Not retried here; the caller decides
    /// whether to persist-and-retry-later or drop. The partial report shows
    /// how far the transfer got.
    #[error("transfer {transfer_id} abandoned: both transports exhausted")]
    TransferAbandoned {
        transfer_id: TransferId,
        report: TransferReport,
    },
    #[error("transfer {transfer_id} aborted by caller after {sent} of {total} messages")]
    Aborted {
        transfer_id: TransferId,
        sent: usize,
        total: usize,
    },
}

/// Fragments and dispatches blobs, one transfer at a time.
pub struct UplinkSession<P, R> {
    fragmenter: Fragmenter,
    dispatcher: Dispatcher<P, R>,
    abort: AbortHandle,
    metrics: Arc<UplinkMetrics>,
}

impl<P: PubSubTransport, R: RequestTransport> UplinkSession<P, R> {
    /// Create a session over the given transports.
    pub fn new(config: &UplinkConfig, primary: P, secondary: R) -> Self {
        let source_id = SourceId(config.source_id.clone());
        Self {
            fragmenter: Fragmenter::new(source_id, config),
            dispatcher: Dispatcher::new(primary, secondary, config.dispatch_config()),
            abort: AbortHandle::new(),
            metrics: Arc::default(),
        }
    }

    /// Handle for aborting the in-flight transfer from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Get session metrics.
    pub fn metrics(&self) -> Arc<UplinkMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Capture a blob and transfer it.
    ///
    /// Capture failure aborts before fragmentation and is propagated
    /// unchanged.
    pub async fn transfer_from_capture(
        &mut self,
        source: &impl CaptureSource,
        attributes: BTreeMap<String, String>,
    ) -> Result<TransferReport, UplinkError> {
        let blob = source.capture().await?;
        self.send_blob(&blob, attributes).await
    }

    /// Transfer one blob.
    ///
    /// 1. Encodes and fragments the blob, assigning a fresh transfer id.
    /// 2. Sends the envelope, then every fragment in ascending index order.
    /// 3. Each send retries on the primary and fails over to the secondary
    ///    for the remainder of the transfer when the primary is exhausted.
    pub async fn send_blob(
        &mut self,
        blob: &[u8],
        attributes: BTreeMap<String, String>,
    ) -> Result<TransferReport, UplinkError> {
        self.dispatcher.reset();
        let transfer = self.fragmenter.fragment(blob, attributes)?;
        let transfer_id = transfer.envelope.transfer_id.clone();
        let fragment_count = transfer.envelope.fragment_count;
        let total = transfer.fragments.len() + 1;

        self.metrics.transfers_started.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            transfer_id = %transfer_id,
            raw_bytes = blob.len(),
            fragment_count,
            "starting transfer"
        );

        let messages = std::iter::once(TransferMessage::Envelope(transfer.envelope))
            .chain(transfer.fragments.into_iter().map(TransferMessage::Fragment));

        let mut results = Vec::with_capacity(total);
        for (sent, msg) in messages.enumerate() {
            if self.abort.is_aborted() {
                tracing::warn!(
                    transfer_id = %transfer_id,
                    sent,
                    total,
                    "transfer aborted by caller"
                );
                return Err(UplinkError::Aborted {
                    transfer_id,
                    sent,
                    total,
                });
            }

            match self.dispatcher.send(&msg).await {
                Ok(result) => {
                    if matches!(msg, TransferMessage::Fragment(_)) {
                        self.metrics.fragments_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    results.push(result);
                }
                Err(DispatchError::TransferAbandoned { .. }) => {
                    results.push(DeliveryResult::Failed);
                    self.metrics
                        .transfers_abandoned
                        .fetch_add(1, Ordering::Relaxed);
                    let report = TransferReport {
                        transfer_id: transfer_id.clone(),
                        fragment_count,
                        results,
                        fallback_used: self.dispatcher.fallback_active(),
                    };
                    return Err(UplinkError::TransferAbandoned {
                        transfer_id,
                        report,
                    });
                }
                Err(e) => return Err(UplinkError::Dispatch(e)),
            }
        }

        self.metrics
            .transfers_completed
            .fetch_add(1, Ordering::Relaxed);
        let report = TransferReport {
            transfer_id: transfer_id.clone(),
            fragment_count,
            results,
            fallback_used: self.dispatcher.fallback_active(),
        };
        tracing::info!(
            transfer_id = %transfer_id,
            fragment_count,
            fallback_used = report.fallback_used,
            "transfer sender-complete"
        );
        Ok(report)
    }
}
