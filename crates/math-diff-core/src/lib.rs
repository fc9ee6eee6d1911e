//! Core abstractions for the math diff service.
//!
//! This crate provides the fundamental building blocks:
//! - `Device` / `DeviceControl` - Device lifecycle seen from both sides
//! - `DiffDevice` - Running first-order difference over named streams
//! - Topic list parsing helpers

pub mod device;
pub mod diff;
pub mod topics;

pub use device::{Device, DeviceConfig, DeviceControl, DeviceFactory, DeviceId, Message};
pub use diff::{DiffDevice, DiffError, DiffOptions, StreamBinding};
