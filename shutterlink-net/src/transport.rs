//! Abstract transports for moving transfer messages off the device.
//!
//! Defines the [`PubSubTransport`] (primary, lossy publish/subscribe) and
//! [`RequestTransport`] (secondary, request/response fallback) traits. Real
//! broker clients and the in-process simulated broker
//! ([`SimBroker`](crate::sim::SimBroker)) both implement these, so the
//! dispatcher and tests never depend on a concrete client.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use bytes::Bytes;

/// Broker-side outcome of a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAck {
    /// The broker confirmed receipt.
    Acked,
    /// The publish was handed to the transport but not confirmed
    /// (fire-and-forget QoS).
    Unconfirmed,
}

/// Per-message delivery status as seen by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Confirmed by the transport.
    Acked,
    /// Sent on a transport without acknowledgment support.
    SentUnconfirmed,
    /// Every delivery path was exhausted.
    Failed,
}

/// Primary transport: at-most-once, unordered, size-bounded publish/subscribe.
#[allow(async_fn_in_trait)]
pub trait PubSubTransport: Send + Sync {
    /// Publish one message to `topic`. An `Err` means the publish failed
    /// locally or was rejected by the broker.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<PublishAck>;
}

/// Secondary transport: request/response, used wholesale for a transfer's
/// remaining messages once the primary is exhausted.
#[allow(async_fn_in_trait)]
pub trait RequestTransport: Send + Sync {
    /// Deliver one message to `endpoint`, returning the response status code.
    /// Any 2xx status counts as delivered.
    async fn request(&self, endpoint: &str, payload: Bytes) -> Result<u16>;
}

impl<T: PubSubTransport> PubSubTransport for &T {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<PublishAck> {
        (**self).publish(topic, payload).await
    }
}

impl<T: RequestTransport> RequestTransport for &T {
    async fn request(&self, endpoint: &str, payload: Bytes) -> Result<u16> {
        (**self).request(endpoint, payload).await
    }
}

impl<T: PubSubTransport> PubSubTransport for std::sync::Arc<T> {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<PublishAck> {
        (**self).publish(topic, payload).await
    }
}

impl<T: RequestTransport> RequestTransport for std::sync::Arc<T> {
    async fn request(&self, endpoint: &str, payload: Bytes) -> Result<u16> {
        (**self).request(endpoint, payload).await
    }
}

/// Metrics tracked by the dispatcher across both transports.
pub struct TransportMetrics {
    pub publishes_sent: AtomicU64,
    pub publishes_failed: AtomicU64,
    pub fallback_requests: AtomicU64,
    pub bytes_sent: AtomicU64,
}

impl TransportMetrics {
    /// Create new zeroed metrics.
    pub fn new() -> Self {
        Self {
            publishes_sent: AtomicU64::new(0),
            publishes_failed: AtomicU64::new(0),
            fallback_requests: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Record a successful primary publish.
    pub fn record_publish_sent(&self, bytes: usize) {
        self.publishes_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a failed or timed-out primary publish attempt.
    pub fn record_publish_failed(&self) {
        self.publishes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message delivered over the fallback transport.
    pub fn record_fallback_request(&self, bytes: usize) {
        self.fallback_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_default_is_zeroed() {
        let m = TransportMetrics::new();
        assert_eq!(m.publishes_sent.load(Ordering::Relaxed), 0);
        assert_eq!(m.publishes_failed.load(Ordering::Relaxed), 0);
        assert_eq!(m.fallback_requests.load(Ordering::Relaxed), 0);
        assert_eq!(m.bytes_sent.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn metrics_record_helpers() {
        let m = TransportMetrics::new();

        m.record_publish_sent(100);
        m.record_publish_sent(250);
        assert_eq!(m.publishes_sent.load(Ordering::Relaxed), 2);
        assert_eq!(m.bytes_sent.load(Ordering::Relaxed), 350);

        m.record_publish_failed();
        assert_eq!(m.publishes_failed.load(Ordering::Relaxed), 1);

        m.record_fallback_request(50);
        assert_eq!(m.fallback_requests.load(Ordering::Relaxed), 1);
        assert_eq!(m.bytes_sent.load(Ordering::Relaxed), 400);
    }
}
