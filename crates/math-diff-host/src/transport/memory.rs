//! In-memory broker.

use std::{
    collections::{HashMap, VecDeque},
    sync::RwLock,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use math_diff_core::DeviceId;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{Transport, TransportError};

/// Published messages kept in history; older ones are dropped.
pub const HISTORY_CAPACITY: usize = 1024;

/// A message published through the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Bytes,
}

impl Published {
    /// Payload as UTF-8 text.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[derive(Default)]
struct Inner {
    subscriptions: Vec<String>,
    published: VecDeque<Published>,
    device_status: HashMap<DeviceId, String>,
}

/// In-process transport implementation.
///
/// Useful for tests and local runs without a broker.
/// Nothing leaves the process.
pub struct MemoryBroker {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<Published>,
}

impl MemoryBroker {
    /// Create a new in-memory broker.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner::default()),
            sender,
        }
    }

    /// Topics currently subscribed, in subscription order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|inner| inner.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Whether a topic is currently subscribed.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions().iter().any(|t| t == topic)
    }

    /// The last [`HISTORY_CAPACITY`] published messages, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<Published> {
        self.inner
            .read()
            .map(|inner| inner.published.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Last status reported for a device.
    #[must_use]
    pub fn device_status(&self, device_id: &str) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.device_status.get(device_id).cloned())
    }

    /// Stream of messages published from now on.
    #[must_use]
    pub fn published_stream(&self) -> futures::stream::BoxStream<'static, Published> {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| TransportError::Internal(e.to_string()))?;

        if !inner.subscriptions.iter().any(|t| t == topic) {
            inner.subscriptions.push(topic.to_string());
        }

        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.inner
            .write()
            .map_err(|e| TransportError::Internal(e.to_string()))?
            .subscriptions
            .retain(|t| t != topic);

        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        let msg = Published {
            topic: topic.to_string(),
            payload,
        };

        {
            let mut inner = self
                .inner
                .write()
                .map_err(|e| TransportError::Internal(e.to_string()))?;
            if inner.published.len() == HISTORY_CAPACITY {
                inner.published.pop_front();
            }
            inner.published.push_back(msg.clone());
        }

        let _ = self.sender.send(msg); // live listeners

        Ok(())
    }

    async fn set_device_status(&self, device_id: &str, message: &str) -> Result<(), TransportError> {
        self.inner
            .write()
            .map_err(|e| TransportError::Internal(e.to_string()))?
            .device_status
            .insert(device_id.to_string(), message.to_string());

        Ok(())
    }
}
