//! sk-protocol: Control-channel protocol for streamkinect depth servers
//!
//! This crate defines the request/reply framing spoken on a server's control
//! endpoint, the descriptors a server returns when asked `who`, and the
//! per-connection state machines that drive one exchange at a time.

pub mod channel;
pub mod codec;
pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod message;
pub mod sequence;

pub use channel::{
    ChannelError, ChannelState, ClientChannel, CloseReason, RequestHandler, ServerChannel,
    ServerChannelState,
};
pub use codec::{Frame, MessageCodec, DEFAULT_MAX_PAYLOAD_SIZE};
pub use descriptor::{DescriptorError, DeviceDescriptor, DeviceId, ServerDescriptor, PROTOCOL_VERSION};
pub use endpoint::{AddressError, EndpointAddress, EndpointKind, Endpoints};
pub use error::{DecodeError, ProtocolError};
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{ErrorPayload, Message, MessageType};
pub use sequence::SequenceNumber;
