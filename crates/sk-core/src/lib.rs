//! sk-core: Shared configuration and discovery abstractions for streamkinect
//!
//! This crate provides configuration structures, error types and the
//! directory-service traits used by the server, the client and the
//! command-line tools.

pub mod config;
pub mod directory;
pub mod error;

pub use directory::{
    ConfiguredDirectory, DirectoryService, DiscoveredServer, DiscoveryEvent, LocalDirectory,
    ServiceAdvertiser, ServiceRecord, DEFAULT_SERVICE_TYPE,
};
pub use error::{ConfigError, DirectoryError};
