//! Host side of the `DeviceControl` handle.

use math_diff_core::{DeviceConfig, DeviceControl, DeviceId};

use crate::Thing;

/// Request queued by a device during a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Subscribe to a device-relative topic under `tag`.
    Subscribe { topic: String, tag: usize },
    /// Publish on a device-relative topic.
    Publish { topic: String, payload: String },
}

/// Control handle given to a hosted device.
///
/// Collects the device's requests so the host can flush them to the
/// transport once the callback returns.
#[derive(Debug, Clone)]
pub struct HostControl {
    id: DeviceId,
    topic_root: String,
    config: DeviceConfig,
    actions: Vec<Action>,
}

impl HostControl {
    /// Create a handle for a thing.
    #[must_use]
    pub fn new(thing: &Thing) -> Self {
        Self {
            id: thing.id.clone(),
            topic_root: thing.topic_root.trim_end_matches('/').to_string(),
            config: thing.config.clone(),
            actions: Vec::new(),
        }
    }

    /// Device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.id
    }

    /// Resolve a device-relative topic to a broker topic.
    #[must_use]
    pub fn resolve(&self, topic: &str) -> String {
        if self.topic_root.is_empty() {
            topic.to_string()
        } else {
            format!("{}/{topic}", self.topic_root)
        }
    }

    /// Replace the configuration the device sees.
    pub fn set_config(&mut self, config: DeviceConfig) {
        self.config = config;
    }

    /// Drain queued requests, oldest first.
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }
}

impl DeviceControl for HostControl {
    fn id(&self) -> &str {
        &self.id
    }

    fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn subscribe(&mut self, topic: &str, tag: usize) {
        self.actions.push(Action::Subscribe {
            topic: topic.to_string(),
            tag,
        });
    }

    fn publish(&mut self, topic: &str, payload: String) {
        self.actions.push(Action::Publish {
            topic: topic.to_string(),
            payload,
        });
    }
}
