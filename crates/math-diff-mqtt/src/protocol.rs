//! Wire protocol shared with the framework.

use math_diff_host::{ServiceEvent, Thing};
use serde::{Deserialize, Serialize};

use crate::ServiceError;

/// Topic prefix under which devices publish.
pub const DEVICE_TOPIC_PREFIX: &str = "openchirp/device";

/// Topic prefix for service-level traffic.
pub const SERVICE_TOPIC_PREFIX: &str = "openchirp/service";

/// Default topic root for a device.
#[must_use]
pub fn device_topic_root(device_id: &str) -> String {
    format!("{DEVICE_TOPIC_PREFIX}/{device_id}")
}

/// Broker topics owned by one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTopics {
    /// Link, update and unlink notifications.
    pub news: String,
    /// Service status.
    pub status: String,
    /// Per-device status reports.
    pub thing_status: String,
}

impl ServiceTopics {
    /// Topics for a service.
    #[must_use]
    pub fn new(service_id: &str) -> Self {
        let root = format!("{SERVICE_TOPIC_PREFIX}/{service_id}");
        Self {
            news: format!("{root}/thing/events"),
            status: format!("{root}/status"),
            thing_status: format!("{root}/thing/status"),
        }
    }
}

/// Pub/sub endpoint of a thing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSub {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// One service configuration entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// A thing as described by the framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingRecord {
    pub id: String,
    #[serde(default)]
    pub pubsub: PubSub,
    #[serde(default, alias = "service_config")]
    pub config: Vec<KeyValue>,
}

impl ThingRecord {
    /// Convert to the host's view of a thing.
    #[must_use]
    pub fn into_thing(self) -> Thing {
        let topic_root = self
            .pubsub
            .endpoint
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| device_topic_root(&self.id));

        self.config
            .into_iter()
            .fold(Thing::new(self.id, topic_root), |thing, kv| {
                thing.with_config(kv.key, kv.value)
            })
    }
}

/// News action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsAction {
    /// Thing linked.
    New,
    /// Thing's service config changed.
    Update,
    /// Thing unlinked.
    Delete,
}

/// Message on the service news topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsMessage {
    pub action: NewsAction,
    pub thing: ThingRecord,
}

impl NewsMessage {
    /// Decode a news payload.
    ///
    /// # Errors
    /// Returns error if the payload is not a valid news message.
    pub fn decode(payload: &[u8]) -> Result<Self, ServiceError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Convert to a host event.
    #[must_use]
    pub fn into_event(self) -> ServiceEvent {
        match self.action {
            NewsAction::New => ServiceEvent::Link(self.thing.into_thing()),
            NewsAction::Update => ServiceEvent::Update(self.thing.into_thing()),
            NewsAction::Delete => ServiceEvent::Unlink { id: self.thing.id },
        }
    }
}

/// Service status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

/// Device status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingStatusMessage {
    pub thing: ThingStatus,
}

/// Status of one thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThingStatus {
    pub id: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use math_diff_core::topics::{INPUT_TOPICS_KEY, OUTPUT_TOPICS_KEY};

    use super::*;

    #[test]
    fn test_service_topics() {
        let topics = ServiceTopics::new("svc");
        assert_eq!(topics.news, "openchirp/service/svc/thing/events");
        assert_eq!(topics.status, "openchirp/service/svc/status");
        assert_eq!(topics.thing_status, "openchirp/service/svc/thing/status");
    }

    #[test]
    fn test_decode_new_thing() {
        let payload = br#"{
            "action": "new",
            "thing": {
                "id": "d1",
                "pubsub": {"protocol": "MQTT", "endpoint": "openchirp/device/d1"},
                "config": [
                    {"key": "InputTopics", "value": "temp, humidity"},
                    {"key": "OutputTopics", "value": "dtemp"}
                ]
            }
        }"#;

        let event = NewsMessage::decode(payload).unwrap().into_event();
        let ServiceEvent::Link(thing) = event else {
            panic!("Wrong event type");
        };
        assert_eq!(thing.id, "d1");
        assert_eq!(thing.topic_root, "openchirp/device/d1");
        assert_eq!(thing.config[INPUT_TOPICS_KEY], "temp, humidity");
        assert_eq!(thing.config[OUTPUT_TOPICS_KEY], "dtemp");
    }

    #[test]
    fn test_decode_delete_with_bare_thing() {
        let event = NewsMessage::decode(br#"{"action":"delete","thing":{"id":"d1"}}"#)
            .unwrap()
            .into_event();
        assert_eq!(event, ServiceEvent::Unlink { id: "d1".to_string() });
    }

    #[test]
    fn test_missing_endpoint_uses_default_root() {
        let record: ThingRecord =
            serde_json::from_str(r#"{"id":"d2","service_config":[{"key":"InputTopics","value":"a"}]}"#)
                .unwrap();
        let thing = record.into_thing();
        assert_eq!(thing.topic_root, "openchirp/device/d2");
        assert_eq!(thing.config[INPUT_TOPICS_KEY], "a");
    }

    #[test]
    fn test_decode_rejects_unknown_action() {
        assert!(NewsMessage::decode(br#"{"action":"explode","thing":{"id":"d1"}}"#).is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ThingStatusMessage {
            thing: ThingStatus {
                id: "d1".to_string(),
                message: "Success".to_string(),
            },
        })
        .unwrap();
        assert_eq!(json, r#"{"thing":{"id":"d1","message":"Success"}}"#);
    }
}
