//! Shared server state

use std::sync::Arc;

use sk_core::config::ServerConfig;

use crate::connection::ConnectionPool;
use crate::registry::ServerRegistry;

/// State shared by the listener and every connection task
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Endpoints and attached devices
    pub registry: Arc<ServerRegistry>,
    /// Open control connections
    pub connections: Arc<ConnectionPool>,
}

impl ServerState {
    pub fn new(config: ServerConfig, registry: ServerRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            connections: Arc::new(ConnectionPool::new()),
        }
    }

    /// Whether another connection may be accepted
    pub fn has_capacity(&self) -> bool {
        match self.config.max_connections {
            Some(max) => self.connections.len() < max as usize,
            None => true,
        }
    }
}
