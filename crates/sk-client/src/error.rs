//! Client error types

use std::io;

use sk_protocol::{ChannelError, EndpointAddress};
use thiserror::Error;

/// Every way a client operation can fail.
///
/// Callers can tell an unreachable server, a server that refused the
/// request, a server speaking an unknown descriptor version and a broken
/// channel apart.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Nothing accepted the connection
    #[error("Server unreachable at {address}: {source}")]
    Unreachable {
        address: EndpointAddress,
        #[source]
        source: io::Error,
    },

    /// Only `tcp://` control endpoints can be dialled
    #[error("Unsupported transport scheme '{0}'")]
    UnsupportedScheme(String),

    /// The server answered with an `error` reply; the session is still usable
    #[error("Server rejected request: {reason}")]
    Rejected { reason: String },

    /// The descriptor version is not understood; the descriptor was discarded
    #[error("Unsupported descriptor version: {0}")]
    UnsupportedVersion(String),

    /// The reply does not fit the request
    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    /// Channel failure (closed, broken or timed out)
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl ClientError {
    /// Whether the session can no longer be used
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ClientError::Rejected { .. } | ClientError::UnsupportedVersion(_)
        )
    }
}
