//! Endpoint addresses and endpoint names

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named endpoints advertised by a server or a device.
///
/// Names are free-form; two names may map to the same address.
pub type Endpoints = BTreeMap<String, EndpointAddress>;

/// Errors produced when parsing an endpoint address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// No `scheme://` prefix
    #[error("Missing scheme in endpoint address '{0}'")]
    MissingScheme(String),

    /// Scheme contains characters outside `[A-Za-z0-9+.-]`
    #[error("Invalid scheme in endpoint address '{0}'")]
    InvalidScheme(String),

    /// Empty or malformed host part
    #[error("Invalid host in endpoint address '{0}'")]
    InvalidHost(String),

    /// Missing or out-of-range port
    #[error("Invalid port in endpoint address '{0}'")]
    InvalidPort(String),

    /// Nothing after `scheme://`, or whitespace in it
    #[error("Invalid target in endpoint address '{0}'")]
    InvalidTarget(String),
}

/// A transport-qualified address such as `tcp://10.0.0.1:1234` or
/// `ipc:///tmp/depth`.
///
/// Only syntax is validated. `tcp` addresses must be `host:port`; for any
/// other scheme the part after `://` is kept verbatim and `host`/`port` are
/// filled in only when it happens to have that shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointAddress {
    scheme: String,
    target: String,
    socket: Option<(String, u16)>,
}

impl EndpointAddress {
    /// Build a `tcp://host:port` address
    pub fn tcp(host: impl Into<String>, port: u16) -> Result<Self, AddressError> {
        format!("tcp://{}:{}", host.into(), port).parse()
    }

    /// Transport scheme as written (e.g. `tcp`)
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything after `scheme://`
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Host part, with brackets for IPv6 literals
    pub fn host(&self) -> Option<&str> {
        self.socket.as_ref().map(|(host, _)| host.as_str())
    }

    /// Port number
    pub fn port(&self) -> Option<u16> {
        self.socket.as_ref().map(|(_, port)| *port)
    }

    /// `host:port` form suitable for socket APIs
    pub fn socket_address(&self) -> Option<String> {
        self.socket
            .as_ref()
            .map(|(host, port)| format!("{}:{}", host, port))
    }
}

fn split_host_port(original: &str, target: &str) -> Result<(String, u16), AddressError> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| AddressError::InvalidPort(original.to_string()))?;

    let bracketed = host.starts_with('[') || host.ends_with(']');
    let host_ok = !host.is_empty()
        && !host.contains('/')
        && (!bracketed || (host.starts_with('[') && host.ends_with(']') && host.len() > 2))
        && (bracketed || !host.contains(':'));
    if !host_ok {
        return Err(AddressError::InvalidHost(original.to_string()));
    }

    let port: u16 = port
        .parse()
        .map_err(|_| AddressError::InvalidPort(original.to_string()))?;
    Ok((host.to_string(), port))
}

impl FromStr for EndpointAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, target) = s
            .split_once("://")
            .ok_or_else(|| AddressError::MissingScheme(s.to_string()))?;

        let scheme_ok = scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_ok {
            return Err(AddressError::InvalidScheme(s.to_string()));
        }

        if target.is_empty() || target.chars().any(char::is_whitespace) {
            return Err(AddressError::InvalidTarget(s.to_string()));
        }

        let socket = if scheme.eq_ignore_ascii_case("tcp") {
            Some(split_host_port(s, target)?)
        } else {
            split_host_port(s, target).ok()
        };

        Ok(Self {
            scheme: scheme.to_string(),
            target: target.to_string(),
            socket,
        })
    }
}

impl TryFrom<String> for EndpointAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EndpointAddress> for String {
    fn from(address: EndpointAddress) -> Self {
        address.to_string()
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.target)
    }
}

/// Endpoint names this implementation understands.
///
/// Anything else found in an `endpoints` map is carried along untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Request/reply control channel
    Control,
    /// Depth frame stream
    Depth,
}

impl EndpointKind {
    /// Name used as the key in `endpoints` maps
    pub fn name(&self) -> &'static str {
        match self {
            EndpointKind::Control => "control",
            EndpointKind::Depth => "depth",
        }
    }

    /// Resolve a map key to a known kind
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "control" => Some(EndpointKind::Control),
            "depth" => Some(EndpointKind::Depth),
            _ => None,
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_address() {
        let addr: EndpointAddress = "tcp://10.0.0.1:1234".parse().unwrap();
        assert_eq!(addr.scheme(), "tcp");
        assert_eq!(addr.host(), Some("10.0.0.1"));
        assert_eq!(addr.port(), Some(1234));
        assert_eq!(addr.socket_address().as_deref(), Some("10.0.0.1:1234"));
        assert_eq!(addr.to_string(), "tcp://10.0.0.1:1234");
    }

    #[test]
    fn test_parse_ipv6_and_hostnames() {
        let addr: EndpointAddress = "tcp://[::1]:5555".parse().unwrap();
        assert_eq!(addr.host(), Some("[::1]"));
        assert_eq!(addr.socket_address().as_deref(), Some("[::1]:5555"));

        let addr: EndpointAddress = "ipc://sensor-host.local:9".parse().unwrap();
        assert_eq!(addr.scheme(), "ipc");
        assert_eq!(addr.port(), Some(9));
    }

    #[test]
    fn test_opaque_targets_for_other_schemes() {
        let addr: EndpointAddress = "ipc:///tmp/ir".parse().unwrap();
        assert_eq!(addr.scheme(), "ipc");
        assert_eq!(addr.target(), "/tmp/ir");
        assert_eq!(addr.host(), None);
        assert_eq!(addr.socket_address(), None);
        assert_eq!(addr.to_string(), "ipc:///tmp/ir");

        let addr: EndpointAddress = "inproc://x".parse().unwrap();
        assert_eq!(addr.port(), None);

        assert!(matches!(
            "ipc://".parse::<EndpointAddress>(),
            Err(AddressError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_scheme_case_preserved() {
        let addr: EndpointAddress = "TCP://host:1".parse().unwrap();
        assert_eq!(addr.scheme(), "TCP");
        assert_eq!(addr.to_string(), "TCP://host:1");
    }

    #[test]
    fn test_reject_invalid_addresses() {
        assert!(matches!(
            "10.0.0.1:1234".parse::<EndpointAddress>(),
            Err(AddressError::MissingScheme(_))
        ));
        assert!(matches!(
            "1tcp://host:1".parse::<EndpointAddress>(),
            Err(AddressError::InvalidScheme(_))
        ));
        assert!(matches!(
            "tcp://:1234".parse::<EndpointAddress>(),
            Err(AddressError::InvalidHost(_))
        ));
        assert!(matches!(
            "tcp://::1:1234".parse::<EndpointAddress>(),
            Err(AddressError::InvalidHost(_))
        ));
        assert!(matches!(
            "tcp://host".parse::<EndpointAddress>(),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            "tcp://host:70000".parse::<EndpointAddress>(),
            Err(AddressError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let addr = EndpointAddress::tcp("127.0.0.1", 80).unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, r#""tcp://127.0.0.1:80""#);

        let parsed: EndpointAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, addr);

        assert!(serde_json::from_str::<EndpointAddress>(r#""nonsense""#).is_err());
    }

    #[test]
    fn test_endpoint_kind_names() {
        assert_eq!(EndpointKind::from_name("control"), Some(EndpointKind::Control));
        assert_eq!(EndpointKind::from_name("depth"), Some(EndpointKind::Depth));
        assert_eq!(EndpointKind::from_name("infrared"), None);
    }
}
