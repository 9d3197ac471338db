//! Control server configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sk_protocol::DEFAULT_MAX_PAYLOAD_SIZE;

use super::serde_utils::duration_secs;
use crate::directory::DEFAULT_SERVICE_TYPE;

/// Configuration for the control server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the control listener to; port 0 picks a free port
    pub bind_address: String,

    /// Host placed in the advertised control endpoint.
    ///
    /// Falls back to `127.0.0.1` when unset and the listener is bound to an
    /// unspecified address.
    pub advertise_host: Option<String>,

    /// Human-readable server name (defaults to `Kinect2 <uuid>`)
    pub name: Option<String>,

    /// Close control connections that stay silent this long
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,

    /// Largest accepted frame payload in bytes
    pub max_payload_size: usize,

    /// Maximum number of concurrent control connections
    pub max_connections: Option<u32>,

    /// Service type used when advertising the server
    pub service_type: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:0".to_string(),
            advertise_host: None,
            name: None,
            idle_timeout: Duration::from_secs(60),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_connections: None,
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
        }
    }
}

impl ServerConfig {
    /// Get the server name, generating a unique one when none is configured
    pub fn server_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Kinect2 {}", uuid::Uuid::new_v4()))
    }
}
