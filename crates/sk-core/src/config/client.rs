//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sk_protocol::{EndpointAddress, DEFAULT_MAX_PAYLOAD_SIZE};

use super::serde_utils::{duration_millis, duration_secs};
use crate::directory::DEFAULT_SERVICE_TYPE;
use crate::error::ConfigError;

/// Configuration for clients of the control protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for establishing the transport connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Timeout for a single request/reply exchange
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Interval between `who` heartbeats sent by a session monitor
    #[serde(with = "duration_secs")]
    pub heartbeat_period: Duration,

    /// Backoff applied by `connect_with_retry`
    pub backoff: BackoffConfig,

    /// Largest accepted frame payload in bytes
    pub max_payload_size: usize,

    /// Service type browsed during discovery
    pub service_type: String,

    /// Servers known without discovery
    pub servers: Vec<ConfiguredServer>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            heartbeat_period: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            servers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Reject values that cannot drive a session
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_period.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_period must be greater than zero".to_string(),
            ));
        }
        self.backoff.validate()
    }
}

/// A statically configured server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredServer {
    /// Display name
    pub name: String,
    /// Control endpoint
    pub endpoint: EndpointAddress,
}

impl BackoffConfig {
    /// Reject a multiplier or jitter that cannot produce sane delays
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "backoff.multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff.jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            max_attempts: Some(5),
        }
    }
}
