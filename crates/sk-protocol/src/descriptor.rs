//! Server and device descriptors carried by `me` replies
//!
//! # Versioning
//!
//! Only version `1` is defined. Parsing reads the `version` field from the
//! loose JSON value first and hands the payload to the strict schema only
//! when the version is recognized. Any other version is reported as
//! [`DescriptorError::UnsupportedVersion`] without looking at the rest of the
//! payload.
//!
//! Inside a version 1 payload, well-known endpoint names (`control`,
//! `depth`) must hold valid addresses. Other names are kept when their value
//! parses as an address and dropped otherwise.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::endpoint::{EndpointAddress, EndpointKind, Endpoints};

/// The only descriptor version this implementation understands
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors produced when interpreting a `me` payload
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// Version missing or not understood; the payload was not read further
    #[error("Unsupported descriptor version: {0}")]
    UnsupportedVersion(String),

    /// Recognized version but the payload does not match its schema
    #[error("Invalid descriptor: {0}")]
    Invalid(#[from] serde_json::Error),

    /// Top-level endpoints lack the mandatory `control` entry
    #[error("Descriptor has no control endpoint")]
    MissingControlEndpoint,

    /// A well-known endpoint name holds something that is not an address
    #[error("Invalid '{name}' endpoint: {reason}")]
    InvalidEndpoint { name: String, reason: String },

    /// Two devices share an id
    #[error("Duplicate device id in descriptor: {0}")]
    DuplicateDevice(DeviceId),
}

/// Identifier of an attached device, unique among currently attached devices
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Description of one attached device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Device identifier
    pub id: DeviceId,
    /// Endpoints exposed by the device
    pub endpoints: Endpoints,
}

impl DeviceDescriptor {
    /// Create a descriptor with no endpoints
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            endpoints: Endpoints::new(),
        }
    }

    /// Add a well-known endpoint
    pub fn with_endpoint(mut self, kind: EndpointKind, address: EndpointAddress) -> Self {
        self.endpoints.insert(kind.name().to_string(), address);
        self
    }

    /// Look up a well-known endpoint
    pub fn endpoint(&self, kind: EndpointKind) -> Option<&EndpointAddress> {
        self.endpoints.get(kind.name())
    }
}

/// A server's description of itself, as returned in a `me` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerDescriptor {
    /// Descriptor schema version
    pub version: u32,
    /// Human-readable server name
    pub name: String,
    /// Server-level endpoints; always contains `control`
    pub endpoints: Endpoints,
    /// Attached devices in attachment order
    pub devices: Vec<DeviceDescriptor>,
}

/// Version 1 schema. Endpoint values stay loose until names are known.
#[derive(Deserialize)]
struct DescriptorV1 {
    name: String,
    endpoints: BTreeMap<String, Value>,
    devices: Vec<DeviceV1>,
}

#[derive(Deserialize)]
struct DeviceV1 {
    id: DeviceId,
    endpoints: BTreeMap<String, Value>,
}

/// Validate well-known names strictly; keep other names only if they parse
fn read_endpoints(raw: BTreeMap<String, Value>) -> Result<Endpoints, DescriptorError> {
    let mut endpoints = Endpoints::new();
    for (name, value) in raw {
        let parsed = match &value {
            Value::String(s) => s.parse::<EndpointAddress>().map_err(|e| e.to_string()),
            other => Err(format!("expected a string, got {}", other)),
        };
        match (parsed, EndpointKind::from_name(&name)) {
            (Ok(address), _) => {
                endpoints.insert(name, address);
            }
            (Err(reason), Some(_)) => {
                return Err(DescriptorError::InvalidEndpoint { name, reason });
            }
            (Err(reason), None) => {
                tracing::debug!("Ignoring unrecognized endpoint '{}': {}", name, reason);
            }
        }
    }
    Ok(endpoints)
}

impl ServerDescriptor {
    /// Create a current-version descriptor with a control endpoint and no devices
    pub fn new(name: impl Into<String>, control: EndpointAddress) -> Self {
        let mut endpoints = Endpoints::new();
        endpoints.insert(EndpointKind::Control.name().to_string(), control);
        Self {
            version: PROTOCOL_VERSION,
            name: name.into(),
            endpoints,
            devices: Vec::new(),
        }
    }

    /// Interpret a `me` payload
    pub fn from_payload(payload: Value) -> Result<Self, DescriptorError> {
        match payload.get("version") {
            Some(v) if v.as_u64() == Some(PROTOCOL_VERSION as u64) => {}
            Some(v) => return Err(DescriptorError::UnsupportedVersion(v.to_string())),
            None => return Err(DescriptorError::UnsupportedVersion("missing".to_string())),
        }

        let wire: DescriptorV1 = serde_json::from_value(payload)?;

        let endpoints = read_endpoints(wire.endpoints)?;
        if !endpoints.contains_key(EndpointKind::Control.name()) {
            return Err(DescriptorError::MissingControlEndpoint);
        }

        let mut seen = BTreeSet::new();
        let mut devices = Vec::with_capacity(wire.devices.len());
        for device in wire.devices {
            if !seen.insert(device.id.clone()) {
                return Err(DescriptorError::DuplicateDevice(device.id));
            }
            devices.push(DeviceDescriptor {
                id: device.id,
                endpoints: read_endpoints(device.endpoints)?,
            });
        }

        Ok(Self {
            version: PROTOCOL_VERSION,
            name: wire.name,
            endpoints,
            devices,
        })
    }

    /// Look up a well-known server endpoint
    pub fn endpoint(&self, kind: EndpointKind) -> Option<&EndpointAddress> {
        self.endpoints.get(kind.name())
    }

    /// The control endpoint
    pub fn control_endpoint(&self) -> Option<&EndpointAddress> {
        self.endpoint(EndpointKind::Control)
    }

    /// Find an attached device by id
    pub fn device(&self, id: &DeviceId) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| &d.id == id)
    }
}
