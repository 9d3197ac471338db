//! Table of open control connections

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

/// Identifier of an accepted connection, unique per server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An open control connection
#[derive(Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub opened_at: Instant,
}

/// Pool of open control connections
pub struct ConnectionPool {
    connections: DashMap<ConnectionId, Arc<ConnectionInfo>>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    /// Create a new empty connection pool
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a newly accepted connection
    pub fn open(&self, peer: SocketAddr) -> Arc<ConnectionInfo> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = Arc::new(ConnectionInfo {
            id,
            peer,
            opened_at: Instant::now(),
        });
        self.connections.insert(id, Arc::clone(&info));
        info
    }

    /// Forget a connection once its channel has ended
    pub fn close(&self, id: ConnectionId) -> Option<Arc<ConnectionInfo>> {
        self.connections.remove(&id).map(|(_, info)| info)
    }

    /// Get a connection by ID
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionInfo>> {
        self.connections.get(&id).map(|r| Arc::clone(&r))
    }

    /// List all connections
    pub fn list(&self) -> Vec<Arc<ConnectionInfo>> {
        let mut list: Vec<_> = self.connections.iter().map(|r| Arc::clone(&r)).collect();
        list.sort_by_key(|info| info.id);
        list
    }

    /// Number of active connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if pool is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_close() {
        let pool = ConnectionPool::new();
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let a = pool.open(peer);
        let b = pool.open(peer);
        assert_ne!(a.id, b.id);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.list()[0].id, a.id);

        assert!(pool.close(a.id).is_some());
        assert!(pool.close(a.id).is_none());
        assert!(pool.get(a.id).is_none());
        assert_eq!(pool.get(b.id).unwrap().peer, peer);

        pool.close(b.id);
        assert!(pool.is_empty());
    }
}
