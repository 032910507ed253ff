//! Receiver side: fragment reassembly, transfer registry, validation, and
//! the persistence boundary.

pub mod config;
pub mod reassembler;
pub mod registry;
pub mod sink;
pub mod state;
pub mod validate;

pub use config::IngestConfig;
pub use reassembler::{CompletedTransfer, IngestError, Reassembler};
pub use registry::{SweepStats, TransferRegistry};
pub use sink::{BlobSink, DirBlobSink, MemorySink};
pub use state::{FailureReason, Ingestion, TransferState, TransferStatus};
pub use validate::ValidationError;
