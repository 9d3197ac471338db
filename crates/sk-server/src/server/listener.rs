//! TCP control listener
//!
//! Accepts incoming connections and serves one control channel per
//! connection in its own task.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use sk_core::config::ServerConfig;
use sk_core::{ServiceAdvertiser, ServiceRecord};
use sk_protocol::{CloseReason, EndpointAddress, MessageCodec, ServerChannel};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::registry::ServerRegistry;
use crate::server::handler::ControlHandler;
use crate::state::ServerState;

/// Control server bound to a TCP port
pub struct ControlServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    control: EndpointAddress,
    state: Arc<ServerState>,
    handler: Arc<ControlHandler>,
    cancel: CancellationToken,
    advertiser: Option<Arc<dyn ServiceAdvertiser>>,
}

impl ControlServer {
    /// Bind the listener and set up a registry advertising its control endpoint
    pub async fn bind(config: ServerConfig, cancel: CancellationToken) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
        let local_addr = listener.local_addr()?;

        let control = control_endpoint(config.advertise_host.as_deref(), local_addr)?;
        let registry = ServerRegistry::new(config.server_name(), control.clone());
        let state = Arc::new(ServerState::new(config, registry));
        let handler = Arc::new(ControlHandler::new(Arc::clone(&state.registry)));

        Ok(Self {
            listener,
            local_addr,
            control,
            state,
            handler,
            cancel,
            advertiser: None,
        })
    }

    /// Advertise the control endpoint while running
    pub fn with_advertiser(mut self, advertiser: Arc<dyn ServiceAdvertiser>) -> Self {
        self.advertiser = Some(advertiser);
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Advertised control endpoint
    pub fn control_endpoint(&self) -> &EndpointAddress {
        &self.control
    }

    /// Registry served to clients
    pub fn registry(&self) -> Arc<ServerRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Shared server state
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accept connections until cancelled
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            "Control server '{}' listening on {} (control endpoint {})",
            self.state.registry.name(),
            self.local_addr,
            self.control
        );
        self.advertise().await;

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Control server shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(&mut tasks, socket, peer_addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                // Reap finished connection tasks
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Connection tasks watch the same token and finish promptly
        while tasks.join_next().await.is_some() {}
        self.withdraw().await;

        tracing::info!("Control server stopped");
        Ok(())
    }

    fn handle_connection(&self, tasks: &mut JoinSet<()>, socket: TcpStream, peer_addr: SocketAddr) {
        if !self.state.has_capacity() {
            tracing::warn!(
                "Rejecting connection from {}: {} connections open",
                peer_addr,
                self.state.connections.len()
            );
            return;
        }

        let info = self.state.connections.open(peer_addr);
        tracing::info!("New connection {} from {}", info.id, peer_addr);

        let state = Arc::clone(&self.state);
        let handler = Arc::clone(&self.handler);
        let cancel = self.cancel.clone();

        tasks.spawn(async move {
            let codec = MessageCodec::with_max_payload(state.config.max_payload_size);
            let mut channel =
                ServerChannel::with_codec(socket, codec).with_idle_timeout(state.config.idle_timeout);

            let reason = tokio::select! {
                _ = cancel.cancelled() => None,
                reason = channel.serve(handler.as_ref()) => Some(reason),
            };

            let served = channel.requests_served();
            match reason {
                None => tracing::debug!("Connection {} cancelled", info.id),
                Some(CloseReason::PeerClosed) => {
                    tracing::info!("Connection {} closed by peer after {} requests", info.id, served)
                }
                Some(CloseReason::IdleTimeout(timeout)) => {
                    tracing::info!("Connection {} idle for {:?}, closing", info.id, timeout)
                }
                Some(CloseReason::MalformedFrame(e)) => {
                    tracing::warn!("Connection {} sent a malformed frame: {}", info.id, e)
                }
                Some(CloseReason::TransportError(e)) => {
                    tracing::warn!("Connection {} failed: {}", info.id, e)
                }
            }

            state.connections.close(info.id);
        });
    }

    async fn advertise(&self) {
        let Some(advertiser) = &self.advertiser else {
            return;
        };
        let record = ServiceRecord::for_endpoint(
            self.state.config.service_type.clone(),
            self.state.registry.name(),
            &self.control,
        );
        match advertiser.register(record).await {
            Ok(()) => tracing::info!("Advertised under {}", self.state.config.service_type),
            Err(e) => tracing::warn!("Failed to advertise control endpoint: {}", e),
        }
    }

    async fn withdraw(&self) {
        let Some(advertiser) = &self.advertiser else {
            return;
        };
        let name = self.state.registry.name();
        if let Err(e) = advertiser
            .unregister(&self.state.config.service_type, &name)
            .await
        {
            tracing::warn!("Failed to withdraw advertisement: {}", e);
        }
    }
}

/// Work out the control endpoint clients should use
fn control_endpoint(advertise_host: Option<&str>, local_addr: SocketAddr) -> Result<EndpointAddress> {
    let host = match advertise_host {
        Some(host) if host.contains(':') && !host.starts_with('[') => format!("[{}]", host),
        Some(host) => host.to_string(),
        None if local_addr.ip().is_unspecified() => {
            tracing::warn!(
                "Bound to unspecified address {}, advertising 127.0.0.1; set advertise_host for remote clients",
                local_addr.ip()
            );
            "127.0.0.1".to_string()
        }
        None => match local_addr.ip() {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{}]", ip),
        },
    };

    EndpointAddress::tcp(host.clone(), local_addr.port())
        .with_context(|| format!("Invalid advertised host '{}'", host))
}
