//! In-process directory
//!
//! Records live in memory and every change is fanned out to browsers over a
//! broadcast channel. Useful for tests and for running a server and its
//! clients inside one process.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{DirectoryService, DiscoveredServer, DiscoveryEvent, ServiceAdvertiser, ServiceRecord};
use crate::error::DirectoryError;

const EVENT_CAPACITY: usize = 64;

type RecordKey = (String, String);

/// Directory held entirely in memory
pub struct LocalDirectory {
    records: RwLock<BTreeMap<RecordKey, DiscoveredServer>>,
    events: broadcast::Sender<(String, DiscoveryEvent)>,
}

impl LocalDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Number of registered records across all service types
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no records are registered
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<RecordKey, DiscoveredServer>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<RecordKey, DiscoveredServer>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    // Called with the write lock held so browsers never see an event twice.
    fn publish(&self, service_type: &str, event: DiscoveryEvent) {
        // No subscribers is fine
        let _ = self.events.send((service_type.to_string(), event));
    }
}

impl Default for LocalDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryService for LocalDirectory {
    async fn lookup(&self, service_type: &str) -> Result<Vec<DiscoveredServer>, DirectoryError> {
        Ok(self
            .read()
            .iter()
            .filter(|((ty, _), _)| ty == service_type)
            .map(|(_, server)| server.clone())
            .collect())
    }

    fn browse(&self, service_type: &str) -> BoxStream<'static, DiscoveryEvent> {
        // Subscribe and snapshot under one lock so nothing is missed or repeated
        let (initial, receiver) = {
            let records = self.read();
            let receiver = self.events.subscribe();
            let initial: Vec<DiscoveryEvent> = records
                .iter()
                .filter(|((ty, _), _)| ty == service_type)
                .map(|(_, server)| DiscoveryEvent::Added(server.clone()))
                .collect();
            (initial, receiver)
        };

        let service_type = service_type.to_string();
        let live = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(item) => return Some((item, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Directory browser lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .filter_map(move |(ty, event)| {
            let keep = ty == service_type;
            async move { keep.then_some(event) }
        });

        stream::iter(initial).chain(live).boxed()
    }
}

#[async_trait]
impl ServiceAdvertiser for LocalDirectory {
    async fn register(&self, record: ServiceRecord) -> Result<(), DirectoryError> {
        let server = record.resolve()?;
        let key = (record.service_type.clone(), record.name.clone());

        let mut records = self.write();
        if let Some(previous) = records.insert(key, server.clone()) {
            if previous == server {
                return Ok(());
            }
            self.publish(&record.service_type, DiscoveryEvent::Removed(previous));
        }
        tracing::debug!("Registered '{}' at {}", server.name, server.endpoint);
        self.publish(&record.service_type, DiscoveryEvent::Added(server));
        Ok(())
    }

    async fn unregister(&self, service_type: &str, name: &str) -> Result<(), DirectoryError> {
        let mut records = self.write();
        let server = records
            .remove(&(service_type.to_string(), name.to_string()))
            .ok_or_else(|| DirectoryError::NotRegistered(name.to_string()))?;

        tracing::debug!("Unregistered '{}'", name);
        self.publish(service_type, DiscoveryEvent::Removed(server));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DEFAULT_SERVICE_TYPE;
    use sk_protocol::EndpointAddress;

    fn record(name: &str, port: u16) -> ServiceRecord {
        let endpoint = EndpointAddress::tcp("127.0.0.1", port).unwrap();
        ServiceRecord::for_endpoint(DEFAULT_SERVICE_TYPE, name, &endpoint)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let directory = LocalDirectory::new();
        directory.register(record("a", 1000)).await.unwrap();
        directory.register(record("b", 1001)).await.unwrap();

        let mut other = record("c", 1002);
        other.service_type = "_other._tcp.local.".to_string();
        directory.register(other).await.unwrap();

        let servers = directory.lookup(DEFAULT_SERVICE_TYPE).await.unwrap();
        let names: Vec<_> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(directory.len(), 3);
    }

    #[tokio::test]
    async fn test_unregister_unknown() {
        let directory = LocalDirectory::new();
        assert!(matches!(
            directory.unregister(DEFAULT_SERVICE_TYPE, "ghost").await,
            Err(DirectoryError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_browse_replays_then_follows() {
        let directory = LocalDirectory::new();
        directory.register(record("a", 1000)).await.unwrap();

        let mut events = directory.browse(DEFAULT_SERVICE_TYPE);
        let first = events.next().await.unwrap();
        assert!(matches!(first, DiscoveryEvent::Added(ref s) if s.name == "a"));

        let mut other = record("x", 1005);
        other.service_type = "_other._tcp.local.".to_string();
        directory.register(other).await.unwrap();
        directory.register(record("b", 1001)).await.unwrap();
        directory.unregister(DEFAULT_SERVICE_TYPE, "a").await.unwrap();

        let next = events.next().await.unwrap();
        assert!(matches!(next, DiscoveryEvent::Added(ref s) if s.name == "b"));
        let next = events.next().await.unwrap();
        assert!(matches!(next, DiscoveryEvent::Removed(ref s) if s.name == "a"));
    }

    #[tokio::test]
    async fn test_reregister_moves_endpoint() {
        let directory = LocalDirectory::new();
        directory.register(record("a", 1000)).await.unwrap();
        let mut events = directory.browse(DEFAULT_SERVICE_TYPE);
        events.next().await.unwrap();

        // Same record again is not an event
        directory.register(record("a", 1000)).await.unwrap();
        directory.register(record("a", 2000)).await.unwrap();

        let removed = events.next().await.unwrap();
        assert!(matches!(removed, DiscoveryEvent::Removed(ref s) if s.endpoint.port() == Some(1000)));
        let added = events.next().await.unwrap();
        assert!(matches!(added, DiscoveryEvent::Added(ref s) if s.endpoint.port() == Some(2000)));
    }

    #[tokio::test]
    async fn test_browse_ends_with_directory() {
        let directory = LocalDirectory::new();
        let events = directory.browse(DEFAULT_SERVICE_TYPE);
        drop(directory);

        let collected: Vec<_> = events.collect().await;
        assert!(collected.is_empty());
    }
}
