//! Active control connection tracking

mod pool;

pub use pool::{ConnectionId, ConnectionInfo, ConnectionPool};
