//! Control server
//!
//! Accepts TCP connections and serves one control channel per connection.

mod handler;
mod listener;

pub use handler::ControlHandler;
pub use listener::ControlServer;
