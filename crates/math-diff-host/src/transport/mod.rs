//! Broker transport abstraction and implementations.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryBroker, Published};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("Unsubscribe from {topic} failed: {reason}")]
    Unsubscribe { topic: String, reason: String },
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("Transport error: {0}")]
    Internal(String),
}

/// Trait for pub/sub backends the host talks through.
///
/// Inbound messages are not pulled through this trait; the backend pushes
/// them into `DeviceManager::dispatch`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start receiving messages on a broker topic.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Stop receiving messages on a broker topic.
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publish a payload on a broker topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Report a device's service status.
    async fn set_device_status(&self, device_id: &str, message: &str) -> Result<(), TransportError>;
}
