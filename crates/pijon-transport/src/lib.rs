pub mod error;
pub mod loopback;
pub mod mqtt;
pub mod transport;

pub use error::TransportError;
pub use loopback::LoopbackTransport;
pub use mqtt::{BrokerEndpoint, MqttTransport};
pub use transport::{LinkStatus, MessageHandler, Transport};
