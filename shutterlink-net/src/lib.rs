//! Transport traits, the retrying dispatcher, and the simulated broker.

pub mod dispatch;
pub mod sim;
pub mod testing;
pub mod transport;

pub use dispatch::{DispatchConfig, DispatchError, Dispatcher};
pub use transport::{
    DeliveryResult, PubSubTransport, PublishAck, RequestTransport, TransportMetrics,
};
