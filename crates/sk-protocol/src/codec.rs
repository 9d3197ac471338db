//! Tokio codec for framed control messages

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DecodeError, ProtocolError};
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::Message;
use crate::sequence::SequenceNumber;

/// Default limit on a single payload (1 MiB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// A complete frame: sequence number plus message
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Sequence number this frame carries
    pub sequence: SequenceNumber,
    /// The message
    pub message: Message,
}

impl Frame {
    /// Create a new frame
    pub fn new(sequence: SequenceNumber, message: Message) -> Self {
        Self { sequence, message }
    }
}

/// Codec for encoding/decoding control frames
#[derive(Debug)]
pub struct MessageCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
    /// Largest payload accepted or produced
    max_payload_size: usize,
}

impl MessageCodec {
    /// Create a new codec with the default payload limit
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a codec with a custom payload limit (capped by the header field)
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            pending_header: None,
            max_payload_size: max_payload_size.min(MAX_PAYLOAD_SIZE),
        }
    }

    /// Largest payload this codec accepts
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None), // Need more data
            },
        };

        let payload_len = header.payload_length as usize;
        if payload_len > self.max_payload_size {
            return Err(DecodeError::MalformedFrame(format!(
                "payload of {} bytes exceeds limit of {} bytes",
                payload_len, self.max_payload_size
            ))
            .into());
        }

        // Presence is known from the header alone
        let message_type = header.message_type;
        if message_type.requires_payload() && payload_len == 0 {
            return Err(DecodeError::PayloadRequired(message_type).into());
        }
        if !message_type.requires_payload() && payload_len > 0 {
            return Err(DecodeError::UnexpectedPayload(message_type).into());
        }

        if src.len() < payload_len {
            self.pending_header = Some(header);
            src.reserve(payload_len - src.len());
            return Ok(None);
        }

        let payload = if payload_len == 0 {
            None
        } else {
            let bytes = src.split_to(payload_len);
            let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
                DecodeError::MalformedFrame(format!("payload is not valid JSON: {}", e))
            })?;
            Some(value)
        };

        let message = Message::new(message_type, payload)?;
        Ok(Some(Frame::new(header.sequence, message)))
    }
}

impl Encoder<Frame> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = match frame.message.payload() {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };

        if payload.len() > self.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        let header = FrameHeader::new(
            frame.sequence,
            frame.message.message_type(),
            payload.len() as u32,
        );
        header.encode(dst);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DeviceDescriptor, ServerDescriptor};
    use crate::endpoint::{EndpointAddress, EndpointKind};
    use crate::frame::HEADER_SIZE;
    use crate::message::MessageType;

    fn sample_descriptor() -> ServerDescriptor {
        let control: EndpointAddress = "tcp://10.0.0.1:1234".parse().unwrap();
        let depth: EndpointAddress = "tcp://10.0.0.1:1236".parse().unwrap();
        let mut descriptor = ServerDescriptor::new("Bob's sensor host", control);
        descriptor.devices.push(
            DeviceDescriptor::new("123456789abcdefghijklmnopqrstuv")
                .with_endpoint(EndpointKind::Depth, depth),
        );
        descriptor
    }

    fn raw_frame(type_byte: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 7, type_byte]);
        let len = payload.len() as u32;
        buf.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
        buf.extend_from_slice(payload);
        buf
    }

    fn decode_err(mut buf: BytesMut) -> DecodeError {
        match MessageCodec::new().decode(&mut buf) {
            Err(ProtocolError::Decode(e)) => e,
            other => panic!("Expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_codec_roundtrip_every_type() {
        let messages = vec![
            Message::error("unsupported request"),
            Message::ping(),
            Message::pong(),
            Message::who(),
            Message::me(&sample_descriptor()).unwrap(),
        ];
        assert_eq!(messages.len(), MessageType::ALL.len());

        let mut codec = MessageCodec::new();
        for (i, message) in messages.into_iter().enumerate() {
            let frame = Frame::new(SequenceNumber::new(i as u32), message);

            let mut buf = BytesMut::new();
            codec.encode(frame.clone(), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().unwrap();

            assert_eq!(decoded, frame);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = MessageCodec::new();

        let frame = Frame::new(
            SequenceNumber::new(3),
            Message::me(&sample_descriptor()).unwrap(),
        );

        let mut full_buf = BytesMut::new();
        codec.encode(frame.clone(), &mut full_buf).unwrap();

        // Header only partially available
        let mut partial = full_buf.split_to(HEADER_SIZE - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Header complete, payload still short
        partial.extend_from_slice(&full_buf.split_to(5));
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_unknown_discriminant_is_malformed() {
        assert!(matches!(
            decode_err(raw_frame(0xFF, b"")),
            DecodeError::MalformedFrame(_)
        ));
    }

    #[test]
    fn test_missing_payload_rejected() {
        assert_eq!(
            decode_err(raw_frame(MessageType::Me.as_u8(), b"")),
            DecodeError::PayloadRequired(MessageType::Me)
        );
        assert_eq!(
            decode_err(raw_frame(MessageType::Error.as_u8(), b"")),
            DecodeError::PayloadRequired(MessageType::Error)
        );
    }

    #[test]
    fn test_unexpected_payload_rejected() {
        assert_eq!(
            decode_err(raw_frame(MessageType::Ping.as_u8(), b"{}")),
            DecodeError::UnexpectedPayload(MessageType::Ping)
        );
    }

    #[test]
    fn test_non_json_payload_is_malformed() {
        assert!(matches!(
            decode_err(raw_frame(MessageType::Error.as_u8(), b"{not json")),
            DecodeError::MalformedFrame(_)
        ));
    }

    #[test]
    fn test_oversize_payload_is_malformed() {
        let mut codec = MessageCodec::with_max_payload(8);
        let mut buf = raw_frame(MessageType::Error.as_u8(), br#"{"reason":"too long"}"#);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::Decode(DecodeError::MalformedFrame(_)))
        ));
    }

    #[test]
    fn test_encode_rejects_oversize_payload() {
        let mut codec = MessageCodec::with_max_payload(8);
        let mut buf = BytesMut::new();
        let result = codec.encode(
            Frame::new(SequenceNumber::new(1), Message::error("far too long")),
            &mut buf,
        );
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
