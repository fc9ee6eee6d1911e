//! MQTT transport and framework client.
//!
//! Provides:
//! - Wire protocol (JSON service news and status messages)
//! - `MqttTransport` - `Transport` over `rumqttc`
//! - `FrameworkClient` - REST lookup of already linked devices
//! - `ServiceClient` - Wires the above to a `DeviceManager`

pub mod client;
pub mod error;
pub mod framework;
pub mod protocol;
pub mod transport;
pub mod url;

pub use client::{ServiceClient, ServiceOptions};
pub use error::ServiceError;
pub use framework::FrameworkClient;
pub use protocol::{NewsAction, NewsMessage, ServiceTopics};
pub use transport::MqttTransport;
pub use url::BrokerUrl;
