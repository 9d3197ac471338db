//! Control channel state machines
//!
//! A control channel pairs exactly one client with one server over a single
//! transport connection and carries strictly one request at a time.
//!
//! Client side:
//!
//! ```text
//!   Idle --send--> AwaitingReply --reply--> Idle
//!     \                 |
//!      `----------------+--disconnect/framing error/timeout--> Closed
//! ```
//!
//! Server side:
//!
//! ```text
//!   AwaitingRequest -> Processing -> Replying -> AwaitingRequest
//!          |                                        |
//!          `------ disconnect / malformed frame ----`--> Closed
//! ```
//!
//! Framing errors never produce an `error` reply: the receiving side closes
//! the connection because the rest of the byte stream can no longer be
//! trusted. Requests that decode fine but cannot be serviced get an `error`
//! reply and the channel stays open.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::codec::{Frame, MessageCodec};
use crate::error::{DecodeError, ProtocolError};
use crate::message::{Message, MessageType};
use crate::sequence::SequenceNumber;

/// Failures surfaced by [`ClientChannel::send`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is not idle: it was closed, or an earlier request was abandoned
    #[error("Channel closed")]
    Closed,

    /// Transport disconnected or framing failed mid-exchange
    #[error("Channel broken: {0}")]
    Broken(String),

    /// No reply arrived in time; the channel is now closed
    #[error("No reply within {0:?}")]
    TimedOut(Duration),

    /// Only request types may be sent by a client
    #[error("'{0}' is not a request type")]
    NotARequest(MessageType),
}

/// Client-side channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No request outstanding
    Idle,
    /// Request sent, reply not yet received
    AwaitingReply,
    /// Terminal
    Closed,
}

/// Client half of a control channel
pub struct ClientChannel<T> {
    framed: Framed<T, MessageCodec>,
    state: ChannelState,
    next_sequence: SequenceNumber,
    request_timeout: Option<Duration>,
}

impl<T> ClientChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected transport
    pub fn new(io: T) -> Self {
        Self::with_codec(io, MessageCodec::new())
    }

    /// Wrap a connected transport with a specific codec
    pub fn with_codec(io: T, codec: MessageCodec) -> Self {
        Self {
            framed: Framed::new(io, codec),
            state: ChannelState::Idle,
            next_sequence: SequenceNumber::default(),
            request_timeout: None,
        }
    }

    /// Bound each exchange by a timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Current state
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Send a request and wait for its reply.
    ///
    /// Taking `&mut self` rules out a second request while one is in flight.
    /// If the returned future is dropped before completing, the channel stays
    /// in `AwaitingReply` and every later call fails with
    /// [`ChannelError::Closed`].
    pub async fn send(&mut self, request: Message) -> Result<Message, ChannelError> {
        if self.state != ChannelState::Idle {
            return Err(ChannelError::Closed);
        }
        if !request.message_type().is_request() {
            return Err(ChannelError::NotARequest(request.message_type()));
        }

        let sequence = self.next_sequence.advance();
        self.state = ChannelState::AwaitingReply;

        let result = match self.request_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, self.exchange(sequence, request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ChannelError::TimedOut(timeout)),
                }
            }
            None => self.exchange(sequence, request).await,
        };

        self.state = match result {
            Ok(_) => ChannelState::Idle,
            Err(_) => ChannelState::Closed,
        };
        result
    }

    async fn exchange(
        &mut self,
        sequence: SequenceNumber,
        request: Message,
    ) -> Result<Message, ChannelError> {
        let request_type = request.message_type();
        tracing::debug!(%sequence, message_type = %request_type, "Sending request");

        self.framed
            .send(Frame::new(sequence, request))
            .await
            .map_err(|e| ChannelError::Broken(format!("failed to send request: {}", e)))?;

        match self.framed.next().await {
            Some(Ok(frame)) => {
                if frame.sequence != sequence {
                    tracing::warn!(
                        expected = %sequence,
                        received = %frame.sequence,
                        "Reply carries a different sequence number"
                    );
                }
                tracing::debug!(
                    %sequence,
                    message_type = %frame.message.message_type(),
                    "Received reply"
                );
                Ok(frame.message)
            }
            Some(Err(ProtocolError::Decode(e))) => {
                tracing::warn!("Malformed reply to {}: {}", request_type, e);
                Err(ChannelError::Broken(e.to_string()))
            }
            Some(Err(e)) => Err(ChannelError::Broken(e.to_string())),
            None => Err(ChannelError::Broken(
                "connection closed before reply".to_string(),
            )),
        }
    }

    /// Close the channel, flushing and shutting down the transport
    pub async fn close(mut self) -> Result<(), ChannelError> {
        self.state = ChannelState::Closed;
        SinkExt::<Frame>::close(&mut self.framed)
            .await
            .map_err(|e| ChannelError::Broken(e.to_string()))
    }
}

/// Server-side channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerChannelState {
    /// Waiting for the next request
    AwaitingRequest,
    /// Request handed to the handler
    Processing,
    /// Writing the reply
    Replying,
    /// Terminal
    Closed,
}

/// Why a server channel stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the connection between requests
    PeerClosed,
    /// No request arrived within the idle timeout
    IdleTimeout(Duration),
    /// Peer sent a frame that could not be decoded
    MalformedFrame(DecodeError),
    /// Read or write failed at the transport level
    TransportError(String),
}

/// Services requests arriving on a server channel.
///
/// Implementations are shared by every channel of a server, so they must not
/// keep per-request state of their own.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the reply for one well-formed request
    async fn handle(&self, request: Message) -> Message;
}

/// Server half of a control channel
pub struct ServerChannel<T> {
    framed: Framed<T, MessageCodec>,
    state: ServerChannelState,
    idle_timeout: Option<Duration>,
    requests_served: u64,
}

impl<T> ServerChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted transport
    pub fn new(io: T) -> Self {
        Self::with_codec(io, MessageCodec::new())
    }

    /// Wrap an accepted transport with a specific codec
    pub fn with_codec(io: T, codec: MessageCodec) -> Self {
        Self {
            framed: Framed::new(io, codec),
            state: ServerChannelState::AwaitingRequest,
            idle_timeout: None,
            requests_served: 0,
        }
    }

    /// Close the channel if no request arrives within `timeout`
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Current state
    pub fn state(&self) -> ServerChannelState {
        self.state
    }

    /// Number of requests answered so far
    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// Answer requests until the channel closes
    pub async fn serve<H>(&mut self, handler: &H) -> CloseReason
    where
        H: RequestHandler + ?Sized,
    {
        loop {
            if let Err(reason) = self.serve_one(handler).await {
                self.state = ServerChannelState::Closed;
                return reason;
            }
        }
    }

    async fn serve_one<H>(&mut self, handler: &H) -> Result<(), CloseReason>
    where
        H: RequestHandler + ?Sized,
    {
        self.state = ServerChannelState::AwaitingRequest;
        let frame = self.next_request().await?;

        self.state = ServerChannelState::Processing;
        let request_type = frame.message.message_type();
        tracing::debug!(sequence = %frame.sequence, message_type = %request_type, "Handling request");

        let reply = if request_type.is_request() {
            handler.handle(frame.message).await
        } else {
            Message::error(format!("'{}' is not a request", request_type))
        };

        self.state = ServerChannelState::Replying;
        self.write_reply(frame.sequence, reply).await?;
        self.requests_served += 1;
        Ok(())
    }

    async fn next_request(&mut self) -> Result<Frame, CloseReason> {
        let next = match self.idle_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.framed.next())
                .await
                .map_err(|_| CloseReason::IdleTimeout(timeout))?,
            None => self.framed.next().await,
        };

        match next {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(ProtocolError::Decode(e))) => Err(CloseReason::MalformedFrame(e)),
            Some(Err(e)) => Err(CloseReason::TransportError(e.to_string())),
            None => Err(CloseReason::PeerClosed),
        }
    }

    async fn write_reply(
        &mut self,
        sequence: SequenceNumber,
        reply: Message,
    ) -> Result<(), CloseReason> {
        match self.framed.send(Frame::new(sequence, reply)).await {
            Ok(()) => Ok(()),
            // Nothing was buffered for the rejected reply, so an error reply can follow
            Err(e @ ProtocolError::PayloadTooLarge { .. })
            | Err(e @ ProtocolError::Serialization(_)) => {
                tracing::warn!(%sequence, "Could not encode reply: {}", e);
                self.framed
                    .send(Frame::new(sequence, Message::error(e.to_string())))
                    .await
                    .map_err(|e| CloseReason::TransportError(e.to_string()))
            }
            Err(e) => Err(CloseReason::TransportError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct PingOnly;

    #[async_trait]
    impl RequestHandler for PingOnly {
        async fn handle(&self, request: Message) -> Message {
            match request.message_type() {
                MessageType::Ping => Message::pong(),
                other => Message::error(format!("cannot service '{}'", other)),
            }
        }
    }

    fn spawn_server(io: DuplexStream) -> tokio::task::JoinHandle<CloseReason> {
        tokio::spawn(async move {
            let mut channel = ServerChannel::new(io);
            channel.serve(&PingOnly).await
        })
    }

    #[tokio::test]
    async fn test_ping_twice_stays_idle() {
        let (client_io, server_io) = duplex(4096);
        let server = spawn_server(server_io);
        let mut client = ClientChannel::new(client_io);

        for _ in 0..2 {
            let reply = client.send(Message::ping()).await.unwrap();
            assert_eq!(reply, Message::pong());
            assert_eq!(client.state(), ChannelState::Idle);
        }

        client.close().await.unwrap();
        assert_eq!(server.await.unwrap(), CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_error_reply_keeps_channel_usable() {
        let (client_io, server_io) = duplex(4096);
        let _server = spawn_server(server_io);
        let mut client = ClientChannel::new(client_io);

        let reply = client.send(Message::who()).await.unwrap();
        assert_eq!(reply.message_type(), MessageType::Error);
        assert_eq!(client.state(), ChannelState::Idle);

        let reply = client.send(Message::ping()).await.unwrap();
        assert_eq!(reply, Message::pong());
    }

    #[tokio::test]
    async fn test_client_refuses_non_request_types() {
        let (client_io, _server_io) = duplex(4096);
        let mut client = ClientChannel::new(client_io);

        let result = client.send(Message::pong()).await;
        assert_eq!(result, Err(ChannelError::NotARequest(MessageType::Pong)));
        assert_eq!(client.state(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_abandoned_request_closes_channel() {
        let (client_io, _server_io) = duplex(4096);
        let mut client = ClientChannel::new(client_io);

        tokio::select! {
            _ = client.send(Message::ping()) => panic!("no server should have replied"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        assert_eq!(client.state(), ChannelState::AwaitingReply);

        let result = client.send(Message::ping()).await;
        assert_eq!(result, Err(ChannelError::Closed));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (client_io, _server_io) = duplex(4096);
        let mut client =
            ClientChannel::new(client_io).with_request_timeout(Duration::from_millis(30));

        let result = client.send(Message::ping()).await;
        assert_eq!(
            result,
            Err(ChannelError::TimedOut(Duration::from_millis(30)))
        );
        assert_eq!(client.state(), ChannelState::Closed);
        assert_eq!(client.send(Message::ping()).await, Err(ChannelError::Closed));
    }

    #[tokio::test]
    async fn test_disconnect_mid_exchange_is_broken() {
        let (client_io, server_io) = duplex(4096);
        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, MessageCodec::new());
            let _request = framed.next().await;
            // Drop without replying
        });

        let mut client = ClientChannel::new(client_io);
        let result = client.send(Message::ping()).await;
        assert!(matches!(result, Err(ChannelError::Broken(_))));
        assert_eq!(client.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_broken() {
        let (client_io, mut server_io) = duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 8];
            server_io.read_exact(&mut buf).await.unwrap();
            server_io
                .write_all(&[0, 0, 0, 1, 0xFF, 0, 0, 0])
                .await
                .unwrap();
            // Keep the stream open so only the bad frame can break the channel
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut client = ClientChannel::new(client_io);
        let result = client.send(Message::ping()).await;
        assert!(matches!(result, Err(ChannelError::Broken(_))));
    }

    #[tokio::test]
    async fn test_server_closes_on_malformed_frame_without_reply() {
        let (mut client_io, server_io) = duplex(4096);
        let server = spawn_server(server_io);

        client_io
            .write_all(&[0, 0, 0, 1, 0xFF, 0, 0, 0])
            .await
            .unwrap();

        let reason = server.await.unwrap();
        assert!(matches!(
            reason,
            CloseReason::MalformedFrame(DecodeError::MalformedFrame(_))
        ));

        let mut received = Vec::new();
        client_io.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty(), "no error reply may be sent");
    }

    #[tokio::test]
    async fn test_server_echoes_sequence_and_rejects_replies_as_requests() {
        let (client_io, server_io) = duplex(4096);
        let _server = spawn_server(server_io);
        let mut framed = Framed::new(client_io, MessageCodec::new());

        framed
            .send(Frame::new(SequenceNumber::new(99), Message::pong()))
            .await
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap();
        assert_eq!(reply.sequence, SequenceNumber::new(99));
        assert_eq!(reply.message.message_type(), MessageType::Error);

        framed
            .send(Frame::new(SequenceNumber::new(100), Message::ping()))
            .await
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap();
        assert_eq!(reply.sequence, SequenceNumber::new(100));
        assert_eq!(reply.message, Message::pong());
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_channel() {
        let (_client_io, server_io) = duplex(4096);
        let mut channel = ServerChannel::new(server_io).with_idle_timeout(Duration::from_millis(20));

        let reason = channel.serve(&PingOnly).await;
        assert_eq!(reason, CloseReason::IdleTimeout(Duration::from_millis(20)));
        assert_eq!(channel.state(), ServerChannelState::Closed);
        assert_eq!(channel.requests_served(), 0);
    }
}
