//! sk-server: streamkinect control server
//!
//! The server owns a registry of advertised endpoints and attached devices
//! and answers `who` and `ping` requests from any number of concurrent
//! control channels. Each accepted connection runs its own channel state
//! machine; the registry is the only state they share.

pub mod connection;
pub mod registry;
pub mod server;
pub mod state;

pub use registry::{RegistryError, ServerRegistry};
pub use server::{ControlHandler, ControlServer};
pub use state::ServerState;
