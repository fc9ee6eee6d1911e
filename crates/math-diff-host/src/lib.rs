//! Device hosting for the math diff service.
//!
//! Provides:
//! - `DeviceManager` - Link/unlink devices and route messages to them
//! - `Transport` - Broker abstraction the manager publishes through
//! - Transport implementations (memory)

pub mod control;
pub mod event;
pub mod manager;
pub mod routes;
pub mod transport;

pub use control::HostControl;
pub use event::{ServiceEvent, Thing};
pub use manager::{DeviceManager, HostError};
pub use transport::{Transport, TransportError};
