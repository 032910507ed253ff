//! Message dispatcher: retry, backoff, and transport failover.
//!
//! The dispatcher owns both transports and an explicit retry loop — delivery
//! outcomes are returned as values, never hidden in transport callbacks. Once
//! the primary transport exhausts its retry budget the dispatcher goes sticky:
//! every remaining message of the transfer uses the secondary transport, so a
//! single transfer never splits across two reassembly paths.

use std::time::Duration;

use bytes::Bytes;
use shutterlink_protocol::transfer::{encode_message, TransferMessage};
use thiserror::Error;

use crate::transport::{
    DeliveryResult, PubSubTransport, PublishAck, RequestTransport, TransportMetrics,
};

/// First retry delay; doubles per attempt up to [`BACKOFF_CAP`].
const BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Upper bound on a single backoff sleep.
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Topic for primary publishes.
    pub topic: String,
    /// Endpoint for fallback requests.
    pub endpoint: String,
    /// Deadline for one publish attempt to complete (including broker ack).
    pub ack_deadline: Duration,
    /// Retry budget per message, per transport.
    pub max_retries: u32,
}

/// Errors surfaced by the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Both transports exhausted their retry budgets for one message.
    /// Not retried automatically; the caller decides whether to schedule a
    /// whole new transfer later.
    #[error("transfer abandoned: primary and fallback transports exhausted after {attempts} attempts")]
    TransferAbandoned { attempts: u32 },
    #[error("failed to encode wire message: {0}")]
    Encode(#[from] postcard::Error),
}

/// Sends transfer messages over the primary transport, falling back to the
/// secondary for the remainder of the transfer on publish failure.
pub struct Dispatcher<P, R> {
    primary: P,
    secondary: R,
    config: DispatchConfig,
    fallback_active: bool,
    metrics: TransportMetrics,
}

impl<P: PubSubTransport, R: RequestTransport> Dispatcher<P, R> {
    /// Create a dispatcher over the given transports.
    pub fn new(primary: P, secondary: R, config: DispatchConfig) -> Self {
        Self {
            primary,
            secondary,
            config,
            fallback_active: false,
            metrics: TransportMetrics::new(),
        }
    }

    /// Whether the dispatcher has failed over to the secondary transport.
    pub fn fallback_active(&self) -> bool {
        self.fallback_active
    }

    /// Get dispatcher metrics.
    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    /// Reset failover state for a new transfer.
    pub fn reset(&mut self) {
        self.fallback_active = false;
    }

    /// Deliver one message, retrying with bounded backoff and failing over
    /// to the secondary transport when the primary's budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::TransferAbandoned`] when both transports are
    /// exhausted for this message.
    pub async fn send(&mut self, msg: &TransferMessage) -> Result<DeliveryResult, DispatchError> {
        let payload = Bytes::from(encode_message(msg)?);

        if !self.fallback_active {
            match self.send_primary(msg, payload.clone()).await {
                Some(result) => return Ok(result),
                None => {
                    self.fallback_active = true;
                    tracing::warn!(
                        transfer_id = %msg.transfer_id(),
                        "primary transport exhausted, switching to fallback for remaining transfer"
                    );
                }
            }
        }

        self.send_secondary(msg, payload).await
    }

    /// Try the primary transport up to the retry budget.
    ///
    /// Returns `None` when the budget is exhausted.
    async fn send_primary(
        &mut self,
        msg: &TransferMessage,
        payload: Bytes,
    ) -> Option<DeliveryResult> {
        let attempts = self.config.max_retries + 1;
        for attempt in 0..attempts {
            let publish = self.primary.publish(&self.config.topic, payload.clone());
            match tokio::time::timeout(self.config.ack_deadline, publish).await {
                Ok(Ok(PublishAck::Acked)) => {
                    self.metrics.record_publish_sent(payload.len());
                    tracing::trace!(transfer_id = %msg.transfer_id(), attempt, "publish acked");
                    return Some(DeliveryResult::Acked);
                }
                Ok(Ok(PublishAck::Unconfirmed)) => {
                    self.metrics.record_publish_sent(payload.len());
                    tracing::trace!(
                        transfer_id = %msg.transfer_id(),
                        attempt,
                        "publish sent unconfirmed"
                    );
                    return Some(DeliveryResult::SentUnconfirmed);
                }
                Ok(Err(e)) => {
                    self.metrics.record_publish_failed();
                    tracing::warn!(
                        transfer_id = %msg.transfer_id(),
                        attempt,
                        error = %e,
                        "publish failed"
                    );
                }
                Err(_) => {
                    self.metrics.record_publish_failed();
                    tracing::warn!(
                        transfer_id = %msg.transfer_id(),
                        attempt,
                        deadline_ms = self.config.ack_deadline.as_millis() as u64,
                        "publish ack deadline exceeded"
                    );
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }
        None
    }

    /// Try the secondary transport up to the retry budget.
    async fn send_secondary(
        &mut self,
        msg: &TransferMessage,
        payload: Bytes,
    ) -> Result<DeliveryResult, DispatchError> {
        let attempts = self.config.max_retries + 1;
        for attempt in 0..attempts {
            match self
                .secondary
                .request(&self.config.endpoint, payload.clone())
                .await
            {
                Ok(status) if (200..300).contains(&status) => {
                    self.metrics.record_fallback_request(payload.len());
                    tracing::debug!(
                        transfer_id = %msg.transfer_id(),
                        status,
                        "message delivered over fallback transport"
                    );
                    return Ok(DeliveryResult::Acked);
                }
                Ok(status) => {
                    tracing::warn!(
                        transfer_id = %msg.transfer_id(),
                        attempt,
                        status,
                        "fallback request rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        transfer_id = %msg.transfer_id(),
                        attempt,
                        error = %e,
                        "fallback request failed"
                    );
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        tracing::error!(
            transfer_id = %msg.transfer_id(),
            "both transports exhausted, abandoning transfer"
        );
        Err(DispatchError::TransferAbandoned {
            attempts: 2 * attempts,
        })
    }
}

/// Bounded exponential backoff for the given zero-based attempt.
fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(16));
    exp.min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use shutterlink_protocol::transfer::Fragment;
    use shutterlink_protocol::types::TransferId;

    use super::*;
    use crate::sim::{FlakyPublisher, RecordingRequestTransport};
    use crate::testing::init_test_tracing;

    fn test_message(index: u32) -> TransferMessage {
        TransferMessage::Fragment(Fragment {
            transfer_id: TransferId::from("0123456789abcdef"),
            sequence_index: index,
            payload_chunk: "QUFBQQ==".to_string(),
            is_last: false,
        })
    }

    fn test_config() -> DispatchConfig {
        DispatchConfig {
            topic: "shutterlink/transfers".to_string(),
            endpoint: "/api/v1/fragments".to_string(),
            ack_deadline: Duration::from_secs(1),
            max_retries: 2,
        }
    }

    #[test]
    fn backoff_is_bounded() {
        assert_eq!(backoff(0), Duration::from_millis(100));
        assert_eq!(backoff(1), Duration::from_millis(200));
        assert_eq!(backoff(4), Duration::from_millis(1600));
        assert_eq!(backoff(5), BACKOFF_CAP);
        assert_eq!(backoff(30), BACKOFF_CAP);
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_ack() {
        init_test_tracing();
        let mut dispatcher = Dispatcher::new(
            FlakyPublisher::reliable(),
            RecordingRequestTransport::with_status(200),
            test_config(),
        );

        let result = dispatcher.send(&test_message(0)).await.unwrap();
        assert_eq!(result, DeliveryResult::Acked);
        assert!(!dispatcher.fallback_active());
        assert_eq!(dispatcher.metrics().publishes_sent.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        init_test_tracing();
        let mut dispatcher = Dispatcher::new(
            FlakyPublisher::failing_first(2),
            RecordingRequestTransport::with_status(200),
            test_config(),
        );

        let result = dispatcher.send(&test_message(0)).await.unwrap();
        assert_eq!(result, DeliveryResult::Acked);
        assert!(!dispatcher.fallback_active());
        assert_eq!(
            dispatcher.metrics().publishes_failed.load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_primary_fails_over_and_sticks() {
        init_test_tracing();
        let secondary = RecordingRequestTransport::with_status(200);
        let mut dispatcher =
            Dispatcher::new(FlakyPublisher::failing_after(0), secondary, test_config());

        let result = dispatcher.send(&test_message(0)).await.unwrap();
        assert_eq!(result, DeliveryResult::Acked);
        assert!(dispatcher.fallback_active());

        // Subsequent messages go straight to the fallback: no further
        // publish attempts are recorded.
        let failed_before = dispatcher.metrics().publishes_failed.load(Ordering::Relaxed);
        dispatcher.send(&test_message(1)).await.unwrap();
        assert_eq!(
            dispatcher.metrics().publishes_failed.load(Ordering::Relaxed),
            failed_before
        );
        assert_eq!(
            dispatcher.metrics().fallback_requests.load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn both_paths_exhausted_is_abandoned() {
        init_test_tracing();
        let mut dispatcher = Dispatcher::new(
            FlakyPublisher::failing_after(0),
            RecordingRequestTransport::with_status(503),
            test_config(),
        );

        let err = dispatcher.send(&test_message(0)).await.unwrap_err();
        assert!(matches!(err, DispatchError::TransferAbandoned { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn ack_deadline_counts_as_failure() {
        init_test_tracing();
        let mut dispatcher = Dispatcher::new(
            FlakyPublisher::hanging(),
            RecordingRequestTransport::with_status(204),
            test_config(),
        );

        // Every publish hangs past the deadline; the message is still
        // delivered via the fallback.
        let result = dispatcher.send(&test_message(0)).await.unwrap();
        assert_eq!(result, DeliveryResult::Acked);
        assert!(dispatcher.fallback_active());
        assert_eq!(
            dispatcher.metrics().publishes_failed.load(Ordering::Relaxed),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_failover() {
        init_test_tracing();
        let mut dispatcher = Dispatcher::new(
            FlakyPublisher::failing_after(0),
            RecordingRequestTransport::with_status(200),
            test_config(),
        );

        dispatcher.send(&test_message(0)).await.unwrap();
        assert!(dispatcher.fallback_active());

        dispatcher.reset();
        assert!(!dispatcher.fallback_active());
    }
}
