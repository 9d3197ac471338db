//! Request dispatch for control channels

use std::sync::Arc;

use async_trait::async_trait;
use sk_protocol::{Message, MessageType, RequestHandler};

use crate::registry::ServerRegistry;

/// Answers `who` from the registry and `ping` with `pong`
pub struct ControlHandler {
    registry: Arc<ServerRegistry>,
}

impl ControlHandler {
    pub fn new(registry: Arc<ServerRegistry>) -> Self {
        Self { registry }
    }

    fn describe(&self) -> Message {
        let snapshot = self.registry.snapshot();
        match Message::me(&snapshot) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("Failed to encode server descriptor: {}", e);
                Message::error(format!("internal error: {}", e))
            }
        }
    }
}

#[async_trait]
impl RequestHandler for ControlHandler {
    async fn handle(&self, request: Message) -> Message {
        match request.message_type() {
            MessageType::Ping => Message::pong(),
            MessageType::Who => self.describe(),
            other => Message::error(format!("unsupported request '{}'", other)),
        }
    }
}
