//! Directory backed by a fixed list of servers from configuration

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use super::{DirectoryService, DiscoveredServer, DiscoveryEvent};
use crate::config::ConfiguredServer;
use crate::error::DirectoryError;

/// Serves the same servers for its service type, forever
pub struct ConfiguredDirectory {
    service_type: String,
    servers: Vec<DiscoveredServer>,
}

impl ConfiguredDirectory {
    pub fn new(service_type: impl Into<String>, servers: &[ConfiguredServer]) -> Self {
        Self {
            service_type: service_type.into(),
            servers: servers
                .iter()
                .map(|s| DiscoveredServer {
                    name: s.name.clone(),
                    endpoint: s.endpoint.clone(),
                })
                .collect(),
        }
    }

    fn matching(&self, service_type: &str) -> Vec<DiscoveredServer> {
        if service_type == self.service_type {
            self.servers.clone()
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl DirectoryService for ConfiguredDirectory {
    async fn lookup(&self, service_type: &str) -> Result<Vec<DiscoveredServer>, DirectoryError> {
        Ok(self.matching(service_type))
    }

    fn browse(&self, service_type: &str) -> BoxStream<'static, DiscoveryEvent> {
        let added = self
            .matching(service_type)
            .into_iter()
            .map(DiscoveryEvent::Added);
        // Nothing ever changes, but the feed stays open like a live one
        stream::iter(added).chain(stream::pending()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DEFAULT_SERVICE_TYPE;
    use std::time::Duration;

    fn servers() -> Vec<ConfiguredServer> {
        vec![ConfiguredServer {
            name: "Lab".to_string(),
            endpoint: "tcp://10.0.0.1:1234".parse().unwrap(),
        }]
    }

    #[tokio::test]
    async fn test_lookup_by_service_type() {
        let directory = ConfiguredDirectory::new(DEFAULT_SERVICE_TYPE, &servers());
        assert_eq!(directory.lookup(DEFAULT_SERVICE_TYPE).await.unwrap().len(), 1);
        assert!(directory.lookup("_other._tcp.local.").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_browse_stays_open() {
        let directory = ConfiguredDirectory::new(DEFAULT_SERVICE_TYPE, &servers());
        let mut events = directory.browse(DEFAULT_SERVICE_TYPE);

        let first = events.next().await.unwrap();
        assert!(matches!(first, DiscoveryEvent::Added(ref s) if s.name == "Lab"));

        let more = tokio::time::timeout(Duration::from_secs(60), events.next()).await;
        assert!(more.is_err());
    }
}
