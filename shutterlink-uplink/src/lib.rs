//! Sender side: capture boundary, fragmentation, and the transfer session.

pub mod capture;
pub mod config;
pub mod fragmenter;
pub mod session;

pub use capture::{CaptureError, CaptureSource, FixedCapture};
pub use config::UplinkConfig;
pub use fragmenter::{FragmentError, FragmentedTransfer, Fragmenter};
pub use session::{AbortHandle, TransferReport, UplinkError, UplinkSession};
