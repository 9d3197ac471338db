//! Frame header encoding/decoding
//!
//! The frame format uses an 8-byte header:
//! - sequence: 4 bytes (u32, big-endian)
//! - message_type: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian, 0 = no payload)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::DecodeError;
use crate::message::MessageType;
use crate::sequence::SequenceNumber;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest length the 24-bit field can express
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Frame header carrying correlation, type and length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Client-generated sequence number
    pub sequence: SequenceNumber,
    /// Type of message in the frame
    pub message_type: MessageType,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(sequence: SequenceNumber, message_type: MessageType, payload_length: u32) -> Self {
        Self {
            sequence,
            message_type,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.sequence.as_u32());
        dst.put_u8(self.message_type.as_u8());
        dst.put_uint(u64::from(self.payload_length), 3);
    }

    /// Take a header off the front of `src`, or `None` until eight bytes
    /// have arrived. An unknown type byte is an error and leaves `src`
    /// untouched.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, DecodeError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Validate the type before consuming anything
        let type_byte = src[4];
        let message_type = MessageType::from_u8(type_byte)
            .ok_or_else(|| DecodeError::unknown_message_type(type_byte))?;

        let sequence = SequenceNumber::new(src.get_u32());
        src.advance(1);
        let payload_length = src.get_uint(3) as u32;

        Ok(Some(Self {
            sequence,
            message_type,
            payload_length,
        }))
    }
}
