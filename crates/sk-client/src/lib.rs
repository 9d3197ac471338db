//! sk-client: Client side of the streamkinect control protocol
//!
//! A client finds servers through a directory service, opens a control
//! session to one of them and asks it to describe itself. Long-running
//! consumers can keep a session under a heartbeat monitor that reports
//! devices coming and going.

pub mod discovery;
pub mod error;
pub mod monitor;
pub mod reconnect;
pub mod session;
pub mod tracker;

pub use discovery::Discovery;
pub use error::ClientError;
pub use monitor::{SessionEvent, SessionMonitor};
pub use reconnect::ExponentialBackoff;
pub use session::ClientSession;
pub use tracker::{DeviceEvent, DeviceTracker};
