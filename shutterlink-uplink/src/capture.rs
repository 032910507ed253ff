//! Capture boundary: where image bytes enter the system.
//!
//! Hardware capture is an external collaborator; the session only sees this
//! trait. Real device code wraps its camera driver, tests use [`FixedCapture`].

use thiserror::Error;

/// Errors from the capture collaborator, propagated unchanged.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    Failed(String),
}

/// Source of blobs to transfer, invoked once per transfer initiation.
#[allow(async_fn_in_trait)]
pub trait CaptureSource: Send + Sync {
    /// Capture one blob. Failure aborts the transfer before fragmentation.
    async fn capture(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Capture double that always yields the same bytes.
pub struct FixedCapture {
    data: Vec<u8>,
}

impl FixedCapture {
    /// Create a capture source yielding `data` on every call.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl CaptureSource for FixedCapture {
    async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        Ok(self.data.clone())
    }
}

/// Capture double that always fails, for abort-path tests.
pub struct FailingCapture;

impl CaptureSource for FailingCapture {
    async fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        Err(CaptureError::Unavailable("sensor powered down".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_capture_yields_configured_bytes() {
        let source = FixedCapture::new(vec![1, 2, 3]);
        assert_eq!(source.capture().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(source.capture().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failing_capture_reports_unavailable() {
        let err = FailingCapture.capture().await.unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable(_)));
    }
}
