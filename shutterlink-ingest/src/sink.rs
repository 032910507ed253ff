//! Persistence boundary for validated blobs.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use shutterlink_protocol::transfer::TransferEnvelope;

/// Destination for a fully reassembled and validated blob. Called at most
/// once per transfer, after the transfer has already settled as complete.
#[allow(async_fn_in_trait)]
pub trait BlobSink: Send + Sync {
    async fn store(&self, envelope: &TransferEnvelope, blob: &[u8]) -> Result<()>;
}

/// Writes each blob to `<dir>/<transfer_id>.bin`.
pub struct DirBlobSink {
    dir: PathBuf,
}

impl DirBlobSink {
    /// Create the sink, making `dir` if it does not exist.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("create blob dir {dir:?}"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Path a given transfer's blob lands at.
    pub fn blob_path(&self, envelope: &TransferEnvelope) -> PathBuf {
        self.dir.join(format!("{}.bin", envelope.transfer_id))
    }
}

impl BlobSink for DirBlobSink {
    async fn store(&self, envelope: &TransferEnvelope, blob: &[u8]) -> Result<()> {
        let path = self.blob_path(envelope);
        tokio::fs::write(&path, blob)
            .await
            .with_context(|| format!("write blob for {} to {path:?}", envelope.transfer_id))?;
        tracing::info!(
            transfer_id = %envelope.transfer_id,
            source_id = %envelope.source_id,
            bytes = blob.len(),
            ?path,
            "stored blob"
        );
        Ok(())
    }
}

/// In-memory sink for tests and embedding.
#[derive(Default)]
pub struct MemorySink {
    stored: Mutex<Vec<(TransferEnvelope, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything stored so far, in arrival order.
    pub fn stored(&self) -> Vec<(TransferEnvelope, Vec<u8>)> {
        self.stored.lock().unwrap().clone()
    }
}

impl BlobSink for MemorySink {
    async fn store(&self, envelope: &TransferEnvelope, blob: &[u8]) -> Result<()> {
        self.stored
            .lock()
            .unwrap()
            .push((envelope.clone(), blob.to_vec()));
        Ok(())
    }
}

impl<T: BlobSink> BlobSink for &T {
    async fn store(&self, envelope: &TransferEnvelope, blob: &[u8]) -> Result<()> {
        (**self).store(envelope, blob).await
    }
}

impl<T: BlobSink> BlobSink for std::sync::Arc<T> {
    async fn store(&self, envelope: &TransferEnvelope, blob: &[u8]) -> Result<()> {
        (**self).store(envelope, blob).await
    }
}
