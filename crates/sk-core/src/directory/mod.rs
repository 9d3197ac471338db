//! Service directory abstractions
//!
//! Servers announce their control endpoint through a [`ServiceAdvertiser`]
//! and clients find them through a [`DirectoryService`]. The traits keep the
//! control protocol independent of how the directory is implemented; this
//! crate ships an in-process [`LocalDirectory`] and a static
//! [`ConfiguredDirectory`].

mod configured;
mod local;

pub use configured::ConfiguredDirectory;
pub use local::LocalDirectory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use sk_protocol::{AddressError, EndpointAddress};

use crate::error::DirectoryError;

/// Service type under which control servers are advertised
pub const DEFAULT_SERVICE_TYPE: &str = "_kinect2._tcp.local.";

/// A server found through a directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiscoveredServer {
    /// Advertised service name
    pub name: String,
    /// Control endpoint
    pub endpoint: EndpointAddress,
}

/// Change in the set of advertised servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A server appeared
    Added(DiscoveredServer),
    /// A server disappeared
    Removed(DiscoveredServer),
}

/// A raw directory record as published by a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service type, e.g. [`DEFAULT_SERVICE_TYPE`]
    pub service_type: String,
    /// Instance name, unique within the service type
    pub name: String,
    /// Host the record points at
    pub host: String,
    /// Port the record points at
    pub port: u16,
    /// JSON properties blob; carries the authoritative `endpoint`
    pub properties: Option<String>,
}

#[derive(Deserialize)]
struct RecordProperties {
    endpoint: EndpointAddress,
}

impl ServiceRecord {
    /// Build a record advertising a control endpoint
    pub fn for_endpoint(
        service_type: impl Into<String>,
        name: impl Into<String>,
        endpoint: &EndpointAddress,
    ) -> Self {
        let properties = serde_json::json!({ "endpoint": endpoint }).to_string();
        Self {
            service_type: service_type.into(),
            name: name.into(),
            host: endpoint.host().unwrap_or_default().to_string(),
            port: endpoint.port().unwrap_or_default(),
            properties: Some(properties),
        }
    }

    /// Resolve the control endpoint.
    ///
    /// The `endpoint` property wins; records without a usable one fall back
    /// to `tcp://host:port`.
    pub fn control_endpoint(&self) -> Result<EndpointAddress, AddressError> {
        let parsed = self
            .properties
            .as_deref()
            .map(serde_json::from_str::<RecordProperties>);

        match parsed {
            Some(Ok(props)) => Ok(props.endpoint),
            Some(Err(e)) => {
                tracing::warn!(
                    "Record '{}' has unusable properties ({}), using {}:{}",
                    self.name,
                    e,
                    self.host,
                    self.port
                );
                EndpointAddress::tcp(self.host.clone(), self.port)
            }
            None => EndpointAddress::tcp(self.host.clone(), self.port),
        }
    }

    /// Resolve into a discovered server
    pub fn resolve(&self) -> Result<DiscoveredServer, DirectoryError> {
        let endpoint = self
            .control_endpoint()
            .map_err(|source| DirectoryError::InvalidRecord {
                name: self.name.clone(),
                source,
            })?;
        Ok(DiscoveredServer {
            name: self.name.clone(),
            endpoint,
        })
    }
}

/// Source of advertised servers
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Servers currently advertised under `service_type`
    async fn lookup(&self, service_type: &str) -> Result<Vec<DiscoveredServer>, DirectoryError>;

    /// Live feed of changes.
    ///
    /// Starts with an `Added` event for every server already advertised and
    /// ends only when the directory goes away.
    fn browse(&self, service_type: &str) -> BoxStream<'static, DiscoveryEvent>;
}

/// Sink for a server's own advertisement
#[async_trait]
pub trait ServiceAdvertiser: Send + Sync {
    /// Publish a record, replacing any record with the same type and name
    async fn register(&self, record: ServiceRecord) -> Result<(), DirectoryError>;

    /// Withdraw a record
    async fn unregister(&self, service_type: &str, name: &str) -> Result<(), DirectoryError>;
}
