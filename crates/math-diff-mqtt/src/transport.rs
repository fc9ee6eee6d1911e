//! `Transport` implementation over an MQTT client.

use async_trait::async_trait;
use bytes::Bytes;
use math_diff_host::{Transport, TransportError};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;

use crate::protocol::{ServiceTopics, StatusMessage, ThingStatus, ThingStatusMessage};

/// MQTT transport.
///
/// Wraps the `rumqttc` client handle. The event loop that drives it is owned
/// by `ServiceClient`.
pub struct MqttTransport {
    client: AsyncClient,
    topics: ServiceTopics,
}

impl MqttTransport {
    /// Create a transport over an existing client.
    #[must_use]
    pub const fn new(client: AsyncClient, topics: ServiceTopics) -> Self {
        Self { client, topics }
    }

    /// Service topics this transport reports on.
    #[must_use]
    pub const fn topics(&self) -> &ServiceTopics {
        &self.topics
    }

    /// Subscribe to the service news topic.
    ///
    /// # Errors
    /// Returns error if the request cannot be queued.
    pub async fn subscribe_news(&self) -> Result<(), TransportError> {
        let topic = self.topics.news.clone();
        self.subscribe(&topic).await
    }

    /// Publish the service status.
    ///
    /// # Errors
    /// Returns error if the request cannot be queued.
    pub async fn set_service_status(&self, message: &str) -> Result<(), TransportError> {
        let status = StatusMessage {
            message: message.to_string(),
        };
        self.publish_json(&self.topics.status, &status).await
    }

    /// Disconnect from the broker.
    ///
    /// # Errors
    /// Returns error if the request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Internal(e.to_string()))
    }

    async fn publish_json<M: Serialize + Sync>(
        &self,
        topic: &str,
        message: &M,
    ) -> Result<(), TransportError> {
        let payload =
            serde_json::to_vec(message).map_err(|e| TransportError::Internal(e.to_string()))?;
        self.publish(topic, Bytes::from(payload)).await
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        tracing::debug!("Subscribing to {topic}");
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        tracing::debug!("Unsubscribing from {topic}");
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Unsubscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn set_device_status(&self, device_id: &str, message: &str) -> Result<(), TransportError> {
        let status = ThingStatusMessage {
            thing: ThingStatus {
                id: device_id.to_string(),
                message: message.to_string(),
            },
        };
        self.publish_json(&self.topics.thing_status, &status).await
    }
}
