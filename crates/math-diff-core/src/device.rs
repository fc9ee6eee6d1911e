//! Device lifecycle traits.

use std::collections::HashMap;

use bytes::Bytes;

/// Sub-topic under a device's topic root that carries transducer values.
pub const TRANSDUCER_PREFIX: &str = "transducer";

/// Device identifier as assigned by the framework.
pub type DeviceId = String;

/// Service configuration attached to a linked device.
pub type DeviceConfig = HashMap<String, String>;

/// Inbound message destined for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Broker topic the message arrived on.
    pub topic: String,
    /// Tag given when the topic was subscribed.
    pub tag: usize,
    /// Raw payload.
    pub payload: Bytes,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(topic: impl Into<String>, tag: usize, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            tag,
            payload: payload.into(),
        }
    }
}

/// Handle a device uses to talk back to its host.
///
/// Topics passed here are relative to the device's topic root; the host
/// resolves them. Both calls are fire-and-forget: the host flushes them
/// after the current callback returns, in call order.
pub trait DeviceControl {
    /// Identifier of the device this handle belongs to.
    fn id(&self) -> &str;

    /// Service configuration the device was linked with.
    fn config(&self) -> &DeviceConfig;

    /// Subscribe to a topic. Messages arriving on it are delivered with `tag`.
    fn subscribe(&mut self, topic: &str, tag: usize);

    /// Publish a payload on a topic.
    fn publish(&mut self, topic: &str, payload: String);
}

/// Per-device lifecycle implemented by a service.
///
/// The host calls these one at a time for a given device, in event order,
/// so implementations need no internal locking.
pub trait Device: Send {
    /// Called once when the device is linked. The returned string is
    /// reported as the device's service status.
    fn process_link(&mut self, ctrl: &mut dyn DeviceControl) -> String;

    /// Called once when the device is unlinked.
    fn process_unlink(&mut self, ctrl: &mut dyn DeviceControl);

    /// Called when the device's service configuration changes.
    ///
    /// `changes` holds only the keys that are new or differ from `original`;
    /// a removed key maps to an empty value.
    ///
    /// Returning `false` tells the host the change was not applied; the host
    /// then relinks a fresh device with the new configuration.
    fn process_config_change(
        &mut self,
        ctrl: &mut dyn DeviceControl,
        changes: &DeviceConfig,
        original: &DeviceConfig,
    ) -> (String, bool);

    /// Called for every message on a subscribed topic.
    fn process_message(&mut self, ctrl: &mut dyn DeviceControl, msg: &Message);
}

/// Builds a fresh device for every link.
pub trait DeviceFactory: Send + Sync + 'static {
    /// Create a new, unlinked device.
    fn create(&self) -> Box<dyn Device>;
}

impl<F> DeviceFactory for F
where
    F: Fn() -> Box<dyn Device> + Send + Sync + 'static,
{
    fn create(&self) -> Box<dyn Device> {
        self()
    }
}
