//! Client session over one control channel

use std::io;
use std::time::{Duration, Instant};

use serde_json::Value;
use sk_core::config::ClientConfig;
use sk_protocol::{
    ChannelState, ClientChannel, DescriptorError, EndpointAddress, ErrorPayload, Message,
    MessageCodec, MessageType, ServerDescriptor,
};
use tokio::net::TcpStream;

use crate::error::ClientError;
use crate::reconnect::ExponentialBackoff;

/// An open control session with one server
pub struct ClientSession {
    channel: ClientChannel<TcpStream>,
    address: EndpointAddress,
    server: Option<ServerDescriptor>,
}

impl ClientSession {
    /// Open a control channel to `address`
    pub async fn connect(
        address: &EndpointAddress,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let socket_address = match address.socket_address() {
            Some(socket) if address.scheme().eq_ignore_ascii_case("tcp") => socket,
            _ => return Err(ClientError::UnsupportedScheme(address.scheme().to_string())),
        };

        let connect = TcpStream::connect(socket_address);
        let stream = match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Unreachable {
                    address: address.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ClientError::Unreachable {
                    address: address.clone(),
                    source: io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no answer within {:?}", config.connect_timeout),
                    ),
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }

        let codec = MessageCodec::with_max_payload(config.max_payload_size);
        let channel =
            ClientChannel::with_codec(stream, codec).with_request_timeout(config.request_timeout);

        tracing::info!("Connected to {}", address);
        Ok(Self {
            channel,
            address: address.clone(),
            server: None,
        })
    }

    /// Connect, retrying unreachable servers with exponential backoff
    pub async fn connect_with_retry(
        address: &EndpointAddress,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        let mut backoff = ExponentialBackoff::from_config(&config.backoff);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let may_retry = config
                .backoff
                .max_attempts
                .map_or(true, |max| attempt < max);

            match Self::connect(address, config).await {
                Err(e @ ClientError::Unreachable { .. }) if may_retry => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "Attempt {} failed: {}; retrying in {:?}",
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Ask the server to describe itself.
    ///
    /// A descriptor of unknown version is discarded whole and reported as
    /// [`ClientError::UnsupportedVersion`]; the session stays open.
    pub async fn who(&mut self) -> Result<ServerDescriptor, ClientError> {
        let reply = self.channel.send(Message::who()).await?;
        let payload = expect_reply(reply, MessageType::Me)?
            .ok_or_else(|| ClientError::InvalidReply("'me' without payload".to_string()))?;

        match ServerDescriptor::from_payload(payload) {
            Ok(descriptor) => {
                tracing::debug!(
                    "{} is '{}' with {} devices",
                    self.address,
                    descriptor.name,
                    descriptor.devices.len()
                );
                self.server = Some(descriptor.clone());
                Ok(descriptor)
            }
            Err(DescriptorError::UnsupportedVersion(version)) => {
                tracing::warn!(
                    "{} sent descriptor version {}, discarding",
                    self.address,
                    version
                );
                self.server = None;
                Err(ClientError::UnsupportedVersion(version))
            }
            Err(e) => {
                self.server = None;
                Err(ClientError::InvalidReply(e.to_string()))
            }
        }
    }

    /// Measure a `ping` round trip
    pub async fn ping(&mut self) -> Result<Duration, ClientError> {
        let started = Instant::now();
        let reply = self.channel.send(Message::ping()).await?;
        expect_reply(reply, MessageType::Pong)?;
        Ok(started.elapsed())
    }

    /// Last descriptor accepted by [`who`](Self::who)
    pub fn server(&self) -> Option<&ServerDescriptor> {
        self.server.as_ref()
    }

    /// Name from the last accepted descriptor
    pub fn server_name(&self) -> Option<&str> {
        self.server.as_ref().map(|s| s.name.as_str())
    }

    /// Address this session is connected to
    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Channel state
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Close the session
    pub async fn close(self) -> Result<(), ClientError> {
        tracing::debug!("Closing session with {}", self.address);
        self.channel.close().await?;
        Ok(())
    }
}

/// Unwrap a reply of the expected type, turning `error` into `Rejected`
fn expect_reply(reply: Message, expected: MessageType) -> Result<Option<Value>, ClientError> {
    match reply.message_type() {
        actual if actual == expected => Ok(reply.into_payload()),
        MessageType::Error => {
            let payload = reply.into_payload().unwrap_or(Value::Null);
            let reason = match serde_json::from_value::<ErrorPayload>(payload.clone()) {
                Ok(error) => error.reason,
                Err(_) => payload.to_string(),
            };
            Err(ClientError::Rejected { reason })
        }
        actual => Err(ClientError::InvalidReply(format!(
            "expected '{}', got '{}'",
            expected, actual
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expect_reply() {
        assert!(expect_reply(Message::pong(), MessageType::Pong)
            .unwrap()
            .is_none());

        match expect_reply(Message::error("busy"), MessageType::Pong) {
            Err(ClientError::Rejected { reason }) => assert_eq!(reason, "busy"),
            other => panic!("unexpected {:?}", other),
        }

        let odd_error = Message::new(MessageType::Error, Some(json!({"code": 3}))).unwrap();
        match expect_reply(odd_error, MessageType::Pong) {
            Err(ClientError::Rejected { reason }) => assert!(reason.contains("code")),
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            expect_reply(Message::pong(), MessageType::Me),
            Err(ClientError::InvalidReply(_))
        ));
    }

    #[tokio::test]
    async fn test_non_tcp_scheme_rejected() {
        let address: EndpointAddress = "ipc://sensor:1".parse().unwrap();
        let result = ClientSession::connect(&address, &ClientConfig::default()).await;
        assert!(matches!(result, Err(ClientError::UnsupportedScheme(s)) if s == "ipc"));
    }
}
