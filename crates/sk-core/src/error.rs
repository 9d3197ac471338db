//! Core error types for streamkinect

use std::path::PathBuf;

use sk_protocol::AddressError;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Directory-service errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// The directory backend cannot be reached
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    /// A service record does not resolve to a usable endpoint
    #[error("Invalid service record '{name}': {source}")]
    InvalidRecord {
        name: String,
        #[source]
        source: AddressError,
    },

    /// Unregistering a record that was never registered
    #[error("Service '{0}' is not registered")]
    NotRegistered(String),
}
