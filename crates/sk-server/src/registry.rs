//! Server registry
//!
//! Holds the server's name, its advertised endpoints and the attached
//! devices. The current state is an immutable [`ServerDescriptor`] behind an
//! `Arc`; mutators build a modified copy and swap it in, so a reader only
//! ever sees a complete descriptor.

use std::convert::Infallible;
use std::sync::{Arc, PoisonError, RwLock};

use sk_protocol::{DeviceDescriptor, DeviceId, EndpointAddress, EndpointKind, ServerDescriptor};
use thiserror::Error;

/// Registry mutation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The control endpoint must always be present
    #[error("The '{0}' endpoint cannot be withdrawn")]
    ProtectedEndpoint(String),

    /// No endpoint with this name is advertised
    #[error("Endpoint not advertised: {0}")]
    UnknownEndpoint(String),

    /// A device with this id is already attached
    #[error("Device already attached: {0}")]
    DeviceAlreadyAttached(DeviceId),

    /// No device with this id is attached
    #[error("Device not attached: {0}")]
    UnknownDevice(DeviceId),
}

/// Server-side registry of endpoints and devices
pub struct ServerRegistry {
    current: RwLock<Arc<ServerDescriptor>>,
}

impl ServerRegistry {
    /// Create a registry advertising only the control endpoint
    pub fn new(name: impl Into<String>, control: EndpointAddress) -> Self {
        Self {
            current: RwLock::new(Arc::new(ServerDescriptor::new(name, control))),
        }
    }

    /// The current point-in-time state, shared without copying
    pub fn snapshot(&self) -> Arc<ServerDescriptor> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// A fresh descriptor of the current state
    pub fn describe(&self) -> ServerDescriptor {
        self.snapshot().as_ref().clone()
    }

    /// Server name
    pub fn name(&self) -> String {
        self.snapshot().name.clone()
    }

    /// Number of attached devices
    pub fn device_count(&self) -> usize {
        self.snapshot().devices.len()
    }

    /// Advertise or replace a named server endpoint, returning the address
    /// it replaced
    pub fn advertise_endpoint(
        &self,
        name: impl Into<String>,
        address: EndpointAddress,
    ) -> Option<EndpointAddress> {
        let name = name.into();
        tracing::debug!("Advertising endpoint {} at {}", name, address);
        let inserted = self.update(|descriptor| {
            Ok::<_, Infallible>(descriptor.endpoints.insert(name, address))
        });
        match inserted {
            Ok(previous) => previous,
            Err(never) => match never {},
        }
    }

    /// Stop advertising a named server endpoint
    pub fn withdraw_endpoint(&self, name: &str) -> Result<EndpointAddress, RegistryError> {
        if name == EndpointKind::Control.name() {
            return Err(RegistryError::ProtectedEndpoint(name.to_string()));
        }
        self.update(|descriptor| {
            descriptor
                .endpoints
                .remove(name)
                .ok_or_else(|| RegistryError::UnknownEndpoint(name.to_string()))
        })
    }

    /// Attach a device; its id must not already be attached
    pub fn attach_device(&self, device: DeviceDescriptor) -> Result<(), RegistryError> {
        let id = device.id.clone();
        self.update(|descriptor| {
            if descriptor.device(&device.id).is_some() {
                return Err(RegistryError::DeviceAlreadyAttached(device.id.clone()));
            }
            descriptor.devices.push(device);
            Ok(())
        })?;
        tracing::info!("Device attached: {}", id);
        Ok(())
    }

    /// Detach a device, returning its last descriptor
    pub fn detach_device(&self, id: &DeviceId) -> Result<DeviceDescriptor, RegistryError> {
        let device = self.update(|descriptor| {
            let index = descriptor
                .devices
                .iter()
                .position(|d| &d.id == id)
                .ok_or_else(|| RegistryError::UnknownDevice(id.clone()))?;
            Ok(descriptor.devices.remove(index))
        })?;
        tracing::info!("Device detached: {}", id);
        Ok(device)
    }

    // Copy, modify, swap. The write lock serializes mutators; readers keep
    // whatever Arc they already cloned.
    fn update<R, E>(
        &self,
        mutate: impl FnOnce(&mut ServerDescriptor) -> Result<R, E>,
    ) -> Result<R, E> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = current.as_ref().clone();
        let result = mutate(&mut next)?;
        *current = Arc::new(next);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn control() -> EndpointAddress {
        "tcp://10.0.0.1:1234".parse().unwrap()
    }

    fn device(id: &str, port: u16) -> DeviceDescriptor {
        DeviceDescriptor::new(id)
            .with_endpoint(EndpointKind::Depth, EndpointAddress::tcp("10.0.0.1", port).unwrap())
    }

    #[test]
    fn test_new_registry_describes_control_only() {
        let registry = ServerRegistry::new("Lab", control());
        let descriptor = registry.describe();

        assert_eq!(descriptor.version, 1);
        assert_eq!(descriptor.name, "Lab");
        assert_eq!(descriptor.control_endpoint(), Some(&control()));
        assert!(descriptor.devices.is_empty());
    }

    #[test]
    fn test_attach_and_detach() {
        let registry = ServerRegistry::new("Lab", control());
        registry.attach_device(device("a", 1236)).unwrap();
        registry.attach_device(device("b", 1237)).unwrap();

        let ids: Vec<_> = registry
            .describe()
            .devices
            .iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        let detached = registry.detach_device(&DeviceId::new("a")).unwrap();
        assert_eq!(detached.id.as_str(), "a");
        assert_eq!(registry.device_count(), 1);

        assert_eq!(
            registry.detach_device(&DeviceId::new("a")),
            Err(RegistryError::UnknownDevice(DeviceId::new("a")))
        );
    }

    #[test]
    fn test_duplicate_attach_rejected() {
        let registry = ServerRegistry::new("Lab", control());
        registry.attach_device(device("a", 1236)).unwrap();

        assert_eq!(
            registry.attach_device(device("a", 1300)),
            Err(RegistryError::DeviceAlreadyAttached(DeviceId::new("a")))
        );
        // The failed attach left the original in place
        let descriptor = registry.describe();
        assert_eq!(descriptor.devices.len(), 1);
        assert_eq!(
            descriptor.devices[0].endpoint(EndpointKind::Depth).unwrap().port(),
            Some(1236)
        );
    }

    #[test]
    fn test_endpoints() {
        let registry = ServerRegistry::new("Lab", control());
        let status = EndpointAddress::tcp("10.0.0.1", 1250).unwrap();
        assert_eq!(registry.advertise_endpoint("status", status.clone()), None);
        assert_eq!(registry.describe().endpoints.get("status"), Some(&status));

        // Replacing hands back the old address and publishes the new one
        let moved = EndpointAddress::tcp("10.0.0.1", 1251).unwrap();
        assert_eq!(
            registry.advertise_endpoint("status", moved.clone()),
            Some(status)
        );
        let status = moved;
        assert_eq!(registry.describe().endpoints.get("status"), Some(&status));
        assert_eq!(registry.withdraw_endpoint("status"), Ok(status));
        assert_eq!(
            registry.withdraw_endpoint("status"),
            Err(RegistryError::UnknownEndpoint("status".to_string()))
        );
        assert_eq!(
            registry.withdraw_endpoint("control"),
            Err(RegistryError::ProtectedEndpoint("control".to_string()))
        );
    }

    #[test]
    fn test_snapshot_unaffected_by_later_mutation() {
        let registry = ServerRegistry::new("Lab", control());
        let before = registry.snapshot();
        registry.attach_device(device("a", 1236)).unwrap();

        assert!(before.devices.is_empty());
        assert_eq!(registry.snapshot().devices.len(), 1);
    }

    #[test]
    fn test_concurrent_describe_sees_whole_states() {
        let registry = Arc::new(ServerRegistry::new("Lab", control()));
        registry.attach_device(device("base", 1000)).unwrap();

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..500 {
                    let id = DeviceId::new(format!("dev-{}", i));
                    registry.attach_device(device(id.as_str(), 2000)).unwrap();
                    registry.detach_device(&id).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let descriptor = registry.describe();
                        let count = descriptor.devices.len();
                        assert!((1..=2).contains(&count), "saw {} devices", count);
                        assert_eq!(descriptor.devices[0].id.as_str(), "base");
                        assert!(descriptor.control_endpoint().is_some());
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.device_count(), 1);
    }
}
