//! Protocol error types

use thiserror::Error;

use crate::message::MessageType;

/// Framing-level decode failures.
///
/// Any of these is fatal to the channel that produced it: once a frame
/// cannot be trusted, neither can the bytes that follow it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Unknown discriminant, oversize payload or payload that is not JSON
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The message type mandates a payload but none was present
    #[error("Payload required for '{0}' message")]
    PayloadRequired(MessageType),

    /// The message type forbids a payload but one was present
    #[error("Unexpected payload on '{0}' message")]
    UnexpectedPayload(MessageType),
}

impl DecodeError {
    pub(crate) fn unknown_message_type(value: u8) -> Self {
        Self::MalformedFrame(format!("unknown message type 0x{:02x}", value))
    }
}

/// Errors that can occur while encoding or decoding frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Outgoing payload exceeds the codec limit
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
