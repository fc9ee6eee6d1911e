//! Running first-order difference over a device's input streams.

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    device::{Device, DeviceConfig, DeviceControl, Message, TRANSDUCER_PREFIX},
    topics::{INPUT_TOPICS_KEY, OUTPUT_TOPICS_KEY, map_output_topics, parse_topic_list},
};

/// Status reported after a successful link.
pub const LINK_SUCCESS: &str = "Success";

/// Behaviour switches for [`DiffDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Diff the first value on a stream against an implicit 0.0 baseline.
    ///
    /// When `false` the first value only seeds the baseline and nothing is
    /// published for it.
    pub first_diff_against_zero: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            first_diff_against_zero: true,
        }
    }
}

/// Diff error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    #[error("Failed to convert message (\"{payload}\") to f64")]
    InvalidNumber { payload: String },
    #[error("No stream bound to tag {0}")]
    UnknownTag(usize),
}

/// One input stream and where its diffs go.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBinding {
    /// Topic values arrive on, relative to the transducer prefix.
    pub input_topic: String,
    /// Topic diffs are published on, relative to the transducer prefix.
    pub output_topic: String,
    /// Most recent value seen on the input topic.
    pub last_value: f64,
    seen: bool,
}

impl StreamBinding {
    /// Create a binding with a zero baseline.
    #[must_use]
    pub fn new(input_topic: impl Into<String>, output_topic: impl Into<String>) -> Self {
        Self {
            input_topic: input_topic.into(),
            output_topic: output_topic.into(),
            last_value: 0.0,
            seen: false,
        }
    }

    /// Whether a value has been received on this stream.
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.seen
    }
}

/// Device that republishes the change between consecutive values.
///
/// Streams are built once at link time and indexed by subscription tag.
#[derive(Debug, Default)]
pub struct DiffDevice {
    options: DiffOptions,
    streams: Vec<StreamBinding>,
}

impl DiffDevice {
    /// Create an unlinked device.
    #[must_use]
    pub fn new(options: DiffOptions) -> Self {
        Self {
            options,
            streams: Vec::new(),
        }
    }

    /// Stream bindings, in subscription tag order.
    #[must_use]
    pub fn streams(&self) -> &[StreamBinding] {
        &self.streams
    }

    /// Build the stream table from a device configuration.
    #[must_use]
    pub fn bindings_from_config(config: &DeviceConfig) -> Vec<StreamBinding> {
        let inputs = parse_topic_list(config_field(config, INPUT_TOPICS_KEY));
        let outputs = parse_topic_list(config_field(config, OUTPUT_TOPICS_KEY));

        map_output_topics(&inputs, &outputs)
            .into_iter()
            .map(|(input, output)| StreamBinding::new(input, output))
            .collect()
    }

    /// Feed a raw payload into stream `tag`.
    ///
    /// Returns the diff to publish, or `None` when the value only seeded the
    /// baseline. A payload that fails to parse leaves the stream untouched.
    ///
    /// # Errors
    /// Returns error if the tag is unknown or the payload is not a number.
    pub fn apply(&mut self, tag: usize, payload: &[u8]) -> Result<Option<f64>, DiffError> {
        let stream = self.streams.get_mut(tag).ok_or(DiffError::UnknownTag(tag))?;
        let value = parse_value(payload)?;

        let publish = stream.seen || self.options.first_diff_against_zero;
        let diff = value - stream.last_value;
        stream.last_value = value;
        stream.seen = true;

        Ok(publish.then_some(diff))
    }
}

/// Parse a payload as a 64-bit float, ignoring surrounding whitespace.
///
/// Infinity is only accepted when spelled out; a finite literal that
/// overflows `f64` is rejected.
///
/// # Errors
/// Returns error if the payload is not UTF-8, not a number, or out of range.
pub fn parse_value(payload: &[u8]) -> Result<f64, DiffError> {
    let invalid = || DiffError::InvalidNumber {
        payload: String::from_utf8_lossy(payload).into_owned(),
    };
    let text = std::str::from_utf8(payload).map_err(|_| invalid())?.trim();
    let value = text.parse::<f64>().map_err(|_| invalid())?;
    if value.is_infinite() && !text.to_ascii_lowercase().contains("inf") {
        return Err(invalid());
    }
    Ok(value)
}

/// Fixed-point text with 10 fractional digits.
#[must_use]
pub fn format_diff(diff: f64) -> String {
    format!("{diff:.10}")
}

fn config_field<'a>(config: &'a DeviceConfig, key: &str) -> &'a str {
    config.get(key).map_or("", String::as_str)
}

fn transducer_topic(topic: &str) -> String {
    format!("{TRANSDUCER_PREFIX}/{topic}")
}

impl Device for DiffDevice {
    fn process_link(&mut self, ctrl: &mut dyn DeviceControl) -> String {
        debug!(device_id = ctrl.id(), config = ?ctrl.config(), "Linking");

        self.streams = Self::bindings_from_config(ctrl.config());
        for (tag, stream) in self.streams.iter().enumerate() {
            ctrl.subscribe(&transducer_topic(&stream.input_topic), tag);
        }

        debug!(device_id = ctrl.id(), streams = self.streams.len(), "Finished linking");
        LINK_SUCCESS.to_string()
    }

    fn process_unlink(&mut self, ctrl: &mut dyn DeviceControl) {
        debug!(device_id = ctrl.id(), "Unlinked");
    }

    fn process_config_change(
        &mut self,
        ctrl: &mut dyn DeviceControl,
        changes: &DeviceConfig,
        _original: &DeviceConfig,
    ) -> (String, bool) {
        debug!(device_id = ctrl.id(), ?changes, "Ignoring config change");
        (String::new(), false)
    }

    fn process_message(&mut self, ctrl: &mut dyn DeviceControl, msg: &Message) {
        debug!(device_id = ctrl.id(), topic = %msg.topic, "Processing diff");

        match self.apply(msg.tag, &msg.payload) {
            Ok(Some(diff)) => {
                let stream = &self.streams[msg.tag];
                debug!(
                    device_id = ctrl.id(),
                    "lastvalue={:.10} | diff={:.10}",
                    stream.last_value,
                    diff
                );
                ctrl.publish(&transducer_topic(&stream.output_topic), format_diff(diff));
            }
            Ok(None) => {
                debug!(device_id = ctrl.id(), tag = msg.tag, "Seeded baseline");
            }
            Err(e) => {
                warn!(device_id = ctrl.id(), topic = %msg.topic, "{e}");
            }
        }
    }
}
