//! Server discovery feed

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use sk_core::config::ClientConfig;
use sk_core::{DirectoryError, DirectoryService, DiscoveredServer, DiscoveryEvent, DEFAULT_SERVICE_TYPE};

/// Finds control servers through a directory service
#[derive(Clone)]
pub struct Discovery {
    directory: Arc<dyn DirectoryService>,
    service_type: String,
}

impl Discovery {
    pub fn new(directory: Arc<dyn DirectoryService>) -> Self {
        Self {
            directory,
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
        }
    }

    /// Use the service type from client configuration
    pub fn from_config(config: &ClientConfig, directory: Arc<dyn DirectoryService>) -> Self {
        Self::new(directory).with_service_type(config.service_type.clone())
    }

    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    /// One discovery pass.
    ///
    /// Nothing is looked up until the stream is first polled. Each call
    /// starts a new pass; the stream ends once the current servers have been
    /// yielded.
    pub fn discover(&self) -> BoxStream<'static, Result<DiscoveredServer, DirectoryError>> {
        let directory = Arc::clone(&self.directory);
        let service_type = self.service_type.clone();

        stream::once(async move {
            tracing::debug!("Looking up {}", service_type);
            directory.lookup(&service_type).await
        })
        .flat_map(|result| {
            let items: Vec<_> = match result {
                Ok(servers) => servers.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(items)
        })
        .boxed()
    }

    /// Live feed of servers appearing and disappearing; drop it to unsubscribe
    pub fn watch(&self) -> BoxStream<'static, DiscoveryEvent> {
        self.directory.browse(&self.service_type)
    }
}
