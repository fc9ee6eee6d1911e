//! Device lifecycle events delivered by the framework.

use math_diff_core::{DeviceConfig, DeviceId};

/// A device as seen by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thing {
    /// Device identifier.
    pub id: DeviceId,
    /// Broker topic prefix for the device's own pub/sub traffic.
    pub topic_root: String,
    /// Service configuration for this device.
    pub config: DeviceConfig,
}

impl Thing {
    /// Create a thing with an empty configuration.
    #[must_use]
    pub fn new(id: impl Into<DeviceId>, topic_root: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic_root: topic_root.into(),
            config: DeviceConfig::new(),
        }
    }

    /// Add a configuration entry.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// Service-level event about one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Device was linked to the service.
    Link(Thing),
    /// Device's service configuration changed.
    Update(Thing),
    /// Device was unlinked from the service.
    Unlink { id: DeviceId },
}

impl ServiceEvent {
    /// Identifier of the device the event is about.
    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::Link(thing) | Self::Update(thing) => &thing.id,
            Self::Unlink { id } => id,
        }
    }
}
