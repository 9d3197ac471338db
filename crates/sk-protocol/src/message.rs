//! Message types for the control channel
//!
//! A message is a type discriminant plus at most one structured (JSON)
//! payload. Whether the payload is present is decided entirely by the type:
//!
//! | Type    | Sender | Payload            |
//! |---------|--------|--------------------|
//! | `ping`  | client | none               |
//! | `pong`  | server | none               |
//! | `who`   | client | none               |
//! | `me`    | server | `ServerDescriptor` |
//! | `error` | server | `{reason: string}` |
//!
//! # Message Flow
//!
//! 1. Client connects to the server's control endpoint
//! 2. Client sends `who`, server replies `me` describing itself and its devices
//! 3. Client may send `ping` at any time, server replies `pong`
//! 4. Any request the server cannot service is answered with `error`

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::ServerDescriptor;
use crate::error::DecodeError;

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Request could not be serviced
    Error = 0x00,
    /// Liveness probe
    Ping = 0x01,
    /// Reply to `Ping`
    Pong = 0x02,
    /// Ask the server to describe itself
    Who = 0x03,
    /// Reply to `Who` carrying a server descriptor
    Me = 0x04,
}

impl MessageType {
    /// All defined message types
    pub const ALL: [MessageType; 5] = [
        MessageType::Error,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Who,
        MessageType::Me,
    ];

    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Error),
            0x01 => Some(Self::Ping),
            0x02 => Some(Self::Pong),
            0x03 => Some(Self::Who),
            0x04 => Some(Self::Me),
            _ => None,
        }
    }

    /// Whether messages of this type must carry a payload
    pub fn requires_payload(&self) -> bool {
        matches!(self, Self::Me | Self::Error)
    }

    /// Whether clients may send this type
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Ping | Self::Who)
    }

    /// Lowercase wire name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Who => "who",
            Self::Me => "me",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of an `error` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable reason the request was not serviced
    pub reason: String,
}

/// A single control message.
///
/// The payload is kept as an untyped JSON value; interpreting it is left to
/// whoever consumes the message. Construction enforces the presence rule, so
/// a `Message` value is always well-formed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    message_type: MessageType,
    payload: Option<Value>,
}

impl Message {
    /// Create a message, checking payload presence against the type
    pub fn new(message_type: MessageType, payload: Option<Value>) -> Result<Self, DecodeError> {
        match (message_type.requires_payload(), payload.is_some()) {
            (true, false) => Err(DecodeError::PayloadRequired(message_type)),
            (false, true) => Err(DecodeError::UnexpectedPayload(message_type)),
            _ => Ok(Self {
                message_type,
                payload,
            }),
        }
    }

    /// `ping` request
    pub fn ping() -> Self {
        Self::bare(MessageType::Ping)
    }

    /// `pong` reply
    pub fn pong() -> Self {
        Self::bare(MessageType::Pong)
    }

    /// `who` request
    pub fn who() -> Self {
        Self::bare(MessageType::Who)
    }

    /// `me` reply describing a server
    pub fn me(descriptor: &ServerDescriptor) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_type: MessageType::Me,
            payload: Some(serde_json::to_value(descriptor)?),
        })
    }

    /// `error` reply
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Error,
            payload: Some(serde_json::json!({ "reason": reason.into() })),
        }
    }

    fn bare(message_type: MessageType) -> Self {
        Self {
            message_type,
            payload: None,
        }
    }

    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Borrow the payload, if any
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Take the payload, if any
    pub fn into_payload(self) -> Option<Value> {
        self.payload
    }
}
