//! Simulated publish/subscribe broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::transport::{PubSubTransport, PublishAck};

/// Shared interior of the simulated broker.
struct BrokerInner {
    /// Subscriber channels keyed by topic.
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Bytes>>>>,
    /// Probability that a delivered message is dropped (0.0–1.0).
    loss_rate: RwLock<f64>,
    /// Probability that a delivered message arrives twice (0.0–1.0).
    duplicate_rate: RwLock<f64>,
    /// Base one-way delivery delay.
    delay: RwLock<Duration>,
    /// Maximum additional random delay; staggers arrival order.
    jitter: RwLock<Duration>,
    /// Whether the broker is reachable at all.
    offline: RwLock<bool>,
    /// Seeded RNG for deterministic loss/duplication/jitter.
    rng: Mutex<StdRng>,
}

/// Simulated broker with configurable loss, duplication, delay, and outage.
///
/// Publishes are acknowledged when the broker is online; delivery to
/// subscribers is at-most-once per copy and unordered once jitter is set,
/// matching the contract the real transport gives.
pub struct SimBroker {
    inner: Arc<BrokerInner>,
}

impl SimBroker {
    /// Create a broker with the default seed (42).
    pub fn new() -> Self {
        Self::with_seed(42)
    }

    /// Create a broker with a specific RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        tracing::info!(seed, "created sim broker");
        Self {
            inner: Arc::new(BrokerInner {
                subscribers: RwLock::new(HashMap::new()),
                loss_rate: RwLock::new(0.0),
                duplicate_rate: RwLock::new(0.0),
                delay: RwLock::new(Duration::ZERO),
                jitter: RwLock::new(Duration::ZERO),
                offline: RwLock::new(false),
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
            }),
        }
    }

    /// Subscribe to a topic, receiving every delivered copy of each publish.
    pub async fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        tracing::debug!(topic, "sim subscriber registered");
        rx
    }

    /// Create a publisher handle implementing [`PubSubTransport`].
    pub fn publisher(&self) -> SimPublisher {
        SimPublisher {
            inner: self.inner.clone(),
        }
    }

    /// Set the probability that a subscriber delivery is dropped.
    pub async fn set_loss_rate(&self, rate: f64) {
        *self.inner.loss_rate.write().await = rate;
        tracing::debug!(rate, "set sim loss rate");
    }

    /// Set the probability that a subscriber delivery arrives twice.
    pub async fn set_duplicate_rate(&self, rate: f64) {
        *self.inner.duplicate_rate.write().await = rate;
        tracing::debug!(rate, "set sim duplicate rate");
    }

    /// Set the base delivery delay.
    pub async fn set_delay(&self, delay: Duration) {
        *self.inner.delay.write().await = delay;
        tracing::debug!(?delay, "set sim delay");
    }

    /// Set the maximum random extra delay; nonzero jitter reorders deliveries.
    pub async fn set_jitter(&self, jitter: Duration) {
        *self.inner.jitter.write().await = jitter;
        tracing::debug!(?jitter, "set sim jitter");
    }

    /// Take the broker offline: publishes fail until [`Self::set_online`].
    pub async fn set_offline(&self) {
        *self.inner.offline.write().await = true;
        tracing::info!("sim broker offline");
    }

    /// Bring the broker back online.
    pub async fn set_online(&self) {
        *self.inner.offline.write().await = false;
        tracing::info!("sim broker online");
    }
}

impl Default for SimBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Publisher half of the simulated broker.
pub struct SimPublisher {
    inner: Arc<BrokerInner>,
}

impl BrokerInner {
    /// Deliver `payload` to every subscriber of `topic`, applying loss,
    /// duplication, delay, and jitter per copy.
    async fn route(&self, topic: &str, payload: Bytes) {
        let loss_rate = *self.loss_rate.read().await;
        let duplicate_rate = *self.duplicate_rate.read().await;
        let delay = *self.delay.read().await;
        let jitter = *self.jitter.read().await;

        let senders: Vec<_> = {
            let subscribers = self.subscribers.read().await;
            subscribers.get(topic).cloned().unwrap_or_default()
        };

        for tx in senders {
            let (dropped, duplicated, extra) = {
                let mut rng = self.rng.lock().await;
                let dropped = loss_rate > 0.0 && rng.random_bool(loss_rate.clamp(0.0, 1.0));
                let duplicated =
                    duplicate_rate > 0.0 && rng.random_bool(duplicate_rate.clamp(0.0, 1.0));
                let extra = if jitter > Duration::ZERO {
                    Duration::from_nanos(rng.random_range(0..jitter.as_nanos() as u64))
                } else {
                    Duration::ZERO
                };
                (dropped, duplicated, extra)
            };

            if dropped {
                tracing::trace!(topic, "sim delivery dropped by loss simulation");
                continue;
            }

            let copies = if duplicated { 2 } else { 1 };
            for _ in 0..copies {
                let tx = tx.clone();
                let payload = payload.clone();
                let total = delay + extra;
                if total > Duration::ZERO {
                    tokio::spawn(async move {
                        tokio::time::sleep(total).await;
                        let _ = tx.send(payload);
                    });
                } else {
                    let _ = tx.send(payload);
                }
            }
            if duplicated {
                tracing::trace!(topic, "sim delivery duplicated");
            }
        }
    }
}

impl PubSubTransport for SimPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<PublishAck> {
        if *self.inner.offline.read().await {
            anyhow::bail!("sim broker unreachable");
        }
        self.inner.route(topic, payload).await;
        Ok(PublishAck::Acked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_test_tracing;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        init_test_tracing();
        let broker = SimBroker::new();
        let mut rx = broker.subscribe("photos").await;
        let publisher = broker.publisher();

        let ack = publisher
            .publish("photos", Bytes::from_static(b"frame"))
            .await
            .unwrap();
        assert_eq!(ack, PublishAck::Acked);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
    }

    #[tokio::test]
    async fn full_loss_drops_every_delivery() {
        init_test_tracing();
        let broker = SimBroker::new();
        let mut rx = broker.subscribe("photos").await;
        broker.set_loss_rate(1.0).await;
        let publisher = broker.publisher();

        publisher
            .publish("photos", Bytes::from_static(b"frame"))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_duplication_delivers_twice() {
        init_test_tracing();
        let broker = SimBroker::new();
        let mut rx = broker.subscribe("photos").await;
        broker.set_duplicate_rate(1.0).await;
        let publisher = broker.publisher();

        publisher
            .publish("photos", Bytes::from_static(b"frame"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_broker_rejects_publishes() {
        init_test_tracing();
        let broker = SimBroker::new();
        broker.set_offline().await;
        let publisher = broker.publisher();

        let result = publisher.publish("photos", Bytes::from_static(b"x")).await;
        assert!(result.is_err());

        broker.set_online().await;
        assert!(publisher
            .publish("photos", Bytes::from_static(b"x"))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_delivery_arrives_after_advance() {
        init_test_tracing();
        let broker = SimBroker::new();
        let mut rx = broker.subscribe("photos").await;
        broker.set_delay(Duration::from_millis(50)).await;
        let publisher = broker.publisher();

        publisher
            .publish("photos", Bytes::from_static(b"late"))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        init_test_tracing();
        let broker = SimBroker::new();
        let mut photos = broker.subscribe("photos").await;
        let mut other = broker.subscribe("telemetry").await;
        let publisher = broker.publisher();

        publisher
            .publish("photos", Bytes::from_static(b"frame"))
            .await
            .unwrap();
        assert_eq!(photos.recv().await.unwrap(), Bytes::from_static(b"frame"));
        assert!(other.try_recv().is_err());
    }
}
