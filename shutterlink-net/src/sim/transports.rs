//! Scripted transport doubles for dispatcher tests.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use bytes::Bytes;

use crate::transport::{PubSubTransport, PublishAck, RequestTransport};

/// How a [`FlakyPublisher`] responds to successive publishes.
#[derive(Debug, Clone, Copy)]
enum FailurePlan {
    /// Every publish succeeds.
    Reliable,
    /// The first `n` publishes fail, the rest succeed.
    FailFirst(u64),
    /// The first `n` publishes succeed, the rest fail.
    FailAfter(u64),
    /// Every publish hangs until cancelled (exercises the ack deadline).
    Hang,
}

/// Publisher double following a scripted failure plan.
///
/// Records every successfully published payload for later inspection.
pub struct FlakyPublisher {
    plan: FailurePlan,
    calls: AtomicU64,
    published: Mutex<Vec<Bytes>>,
}

impl FlakyPublisher {
    fn with_plan(plan: FailurePlan) -> Self {
        Self {
            plan,
            calls: AtomicU64::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Every publish succeeds with an ack.
    pub fn reliable() -> Self {
        Self::with_plan(FailurePlan::Reliable)
    }

    /// The first `n` publishes fail, then the transport recovers.
    pub fn failing_first(n: u64) -> Self {
        Self::with_plan(FailurePlan::FailFirst(n))
    }

    /// The first `n` publishes succeed, then the transport dies permanently.
    pub fn failing_after(n: u64) -> Self {
        Self::with_plan(FailurePlan::FailAfter(n))
    }

    /// Every publish hangs past any deadline.
    pub fn hanging() -> Self {
        Self::with_plan(FailurePlan::Hang)
    }

    /// Payloads that were accepted by this publisher, in publish order.
    pub fn published(&self) -> Vec<Bytes> {
        self.published.lock().unwrap().clone()
    }
}

impl PubSubTransport for FlakyPublisher {
    async fn publish(&self, _topic: &str, payload: Bytes) -> Result<PublishAck> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        match self.plan {
            FailurePlan::Reliable => {}
            FailurePlan::FailFirst(n) if call < n => anyhow::bail!("scripted publish failure"),
            FailurePlan::FailFirst(_) => {}
            FailurePlan::FailAfter(n) if call >= n => anyhow::bail!("scripted publish failure"),
            FailurePlan::FailAfter(_) => {}
            FailurePlan::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved");
            }
        }
        self.published.lock().unwrap().push(payload);
        Ok(PublishAck::Acked)
    }
}

/// Request transport double that records every request and answers with a
/// fixed status code.
pub struct RecordingRequestTransport {
    status: AtomicU16,
    requests: Mutex<Vec<(String, Bytes)>>,
}

impl RecordingRequestTransport {
    /// Answer every request with `status`.
    pub fn with_status(status: u16) -> Self {
        Self {
            status: AtomicU16::new(status),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Change the status returned for subsequent requests.
    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::Relaxed);
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<(String, Bytes)> {
        self.requests.lock().unwrap().clone()
    }
}

impl RequestTransport for RecordingRequestTransport {
    async fn request(&self, endpoint: &str, payload: Bytes) -> Result<u16> {
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), payload));
        Ok(self.status.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_first_recovers() {
        let publisher = FlakyPublisher::failing_first(1);
        assert!(publisher.publish("t", Bytes::from_static(b"a")).await.is_err());
        assert!(publisher.publish("t", Bytes::from_static(b"b")).await.is_ok());
        assert_eq!(publisher.published(), vec![Bytes::from_static(b"b")]);
    }

    #[tokio::test]
    async fn fail_after_dies_permanently() {
        let publisher = FlakyPublisher::failing_after(2);
        assert!(publisher.publish("t", Bytes::from_static(b"a")).await.is_ok());
        assert!(publisher.publish("t", Bytes::from_static(b"b")).await.is_ok());
        assert!(publisher.publish("t", Bytes::from_static(b"c")).await.is_err());
        assert!(publisher.publish("t", Bytes::from_static(b"d")).await.is_err());
    }

    #[tokio::test]
    async fn recording_transport_captures_requests() {
        let transport = RecordingRequestTransport::with_status(201);
        let status = transport
            .request("/api/v1/fragments", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(status, 201);

        transport.set_status(500);
        let status = transport
            .request("/api/v1/fragments", Bytes::from_static(b"y"))
            .await
            .unwrap();
        assert_eq!(status, 500);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].0, "/api/v1/fragments");
        assert_eq!(requests[1].1, Bytes::from_static(b"y"));
    }
}
