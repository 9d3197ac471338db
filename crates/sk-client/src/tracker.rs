//! Device attachment tracking across successive descriptors

use std::collections::BTreeMap;

use sk_protocol::{DeviceDescriptor, DeviceId, ServerDescriptor};

/// Change to a server's set of attached devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device not seen in the previous descriptor
    Added(DeviceDescriptor),
    /// A device present before and gone now
    Removed(DeviceId),
    /// Same id, different endpoints
    EndpointsChanged(DeviceDescriptor),
}

/// Remembers the devices of the last descriptor and reports differences
#[derive(Debug, Default)]
pub struct DeviceTracker {
    devices: BTreeMap<DeviceId, DeviceDescriptor>,
}

impl DeviceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a new descriptor and return what changed since the last one.
    ///
    /// Removals come first, then additions and endpoint changes in
    /// descriptor order.
    pub fn update(&mut self, descriptor: &ServerDescriptor) -> Vec<DeviceEvent> {
        let next: BTreeMap<DeviceId, DeviceDescriptor> = descriptor
            .devices
            .iter()
            .map(|d| (d.id.clone(), d.clone()))
            .collect();

        let mut events: Vec<DeviceEvent> = self
            .devices
            .keys()
            .filter(|id| !next.contains_key(*id))
            .map(|id| DeviceEvent::Removed(id.clone()))
            .collect();

        for device in &descriptor.devices {
            match self.devices.get(&device.id) {
                None => events.push(DeviceEvent::Added(device.clone())),
                Some(previous) if previous.endpoints != device.endpoints => {
                    events.push(DeviceEvent::EndpointsChanged(device.clone()))
                }
                Some(_) => {}
            }
        }

        self.devices = next;
        events
    }

    /// Forget every device, reporting each as removed
    pub fn clear(&mut self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.devices)
            .into_keys()
            .map(DeviceEvent::Removed)
            .collect()
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceDescriptor> {
        self.devices.get(id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
