//! Broker URI parsing.

use crate::ServiceError;

/// Default port for plain MQTT.
pub const DEFAULT_PORT: u16 = 1883;

/// Default port for MQTT over TLS.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Parsed broker address.
///
/// Accepts `scheme://host[:port]` where scheme is `tcp` or `mqtt` for plain
/// connections and `tls`, `ssl` or `mqtts` for TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl BrokerUrl {
    /// Parse a broker URI.
    ///
    /// # Errors
    /// Returns error if the scheme is unknown, the host is missing or the
    /// port is not a number.
    pub fn parse(url: &str) -> Result<Self, ServiceError> {
        let invalid = |reason: &str| ServiceError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;

        let secure = match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => false,
            "tls" | "ssl" | "mqtts" => true,
            _ => return Err(invalid("unsupported scheme")),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
                (host, port)
            }
            None if secure => (authority, DEFAULT_TLS_PORT),
            None => (authority, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            secure,
        })
    }
}
