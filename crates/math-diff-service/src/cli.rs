//! Command line and environment configuration.

use clap::{ArgAction, Parser};
use math_diff_core::DiffOptions;
use math_diff_mqtt::{BrokerUrl, ServiceError, ServiceOptions};
use tracing_subscriber::filter::LevelFilter;

/// Republish the running difference of device values.
#[derive(Debug, Parser)]
#[command(name = "math-diff-service", version)]
pub struct Cli {
    /// Framework server's URI
    #[arg(long, env = "FRAMEWORK_SERVER", default_value = "http://localhost:7000")]
    pub framework_server: String,

    /// MQTT server's URI (e.g. scheme://host:port where scheme is tcp or tls)
    #[arg(long, env = "MQTT_SERVER", default_value = "tls://localhost:1883")]
    pub mqtt_server: String,

    /// Service id
    #[arg(long, env = "SERVICE_ID")]
    pub service_id: String,

    /// Service token
    #[arg(long, env = "SERVICE_TOKEN", hide_env_values = true)]
    pub service_token: String,

    /// debug=5, info=4, warning=3, error=2, fatal=1, panic=0
    #[arg(long, env = "LOG_LEVEL", default_value_t = 4)]
    pub log_level: u8,

    /// Diff the first value on each stream against 0.0 instead of only
    /// recording it
    #[arg(
        long,
        env = "FIRST_DIFF_AGAINST_ZERO",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub first_diff_against_zero: bool,

    /// Publish a "Running" service status on every device event
    #[arg(long, env = "RUNNING_STATUS", default_value_t = true, action = ArgAction::Set)]
    pub running_status: bool,
}

impl Cli {
    /// Log filter for the configured level.
    #[must_use]
    pub const fn level_filter(&self) -> LevelFilter {
        match self.log_level {
            0..=2 => LevelFilter::ERROR,
            3 => LevelFilter::WARN,
            4 => LevelFilter::INFO,
            5 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Options for the diff devices.
    #[must_use]
    pub const fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            first_diff_against_zero: self.first_diff_against_zero,
        }
    }

    /// Options for the service client.
    ///
    /// # Errors
    /// Returns error if the MQTT server URI is invalid.
    pub fn service_options(&self) -> Result<ServiceOptions, ServiceError> {
        Ok(ServiceOptions {
            framework_server: self.framework_server.clone(),
            broker: BrokerUrl::parse(&self.mqtt_server)?,
            service_id: self.service_id.clone(),
            service_token: self.service_token.clone(),
            running_status: self.running_status,
        })
    }
}
