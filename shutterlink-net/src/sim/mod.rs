//! Deterministic in-process transport simulation for testing.
//!
//! [`SimBroker`] models the primary publish/subscribe transport with
//! configurable message loss, duplication, and delivery delay, driven by a
//! seeded RNG. [`FlakyPublisher`] and [`RecordingRequestTransport`] are
//! scripted doubles for dispatcher tests. Everything runs without sockets.

mod broker;
mod transports;

pub use broker::{SimBroker, SimPublisher};
pub use transports::{FlakyPublisher, RecordingRequestTransport};
