//! Service client errors.

use math_diff_host::{HostError, TransportError};
use thiserror::Error;

/// Service client error.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid broker URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Framework request failed: {0}")]
    Framework(#[from] reqwest::Error),
    #[error("Invalid framework message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Host error: {0}")]
    Host(#[from] HostError),
}
