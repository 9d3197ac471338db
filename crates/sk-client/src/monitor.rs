//! Heartbeat monitoring of an open session
//!
//! The monitor owns the session while it runs. Every heartbeat it asks the
//! server to describe itself and forwards device changes to the caller. It
//! stops when cancelled, when the receiver is dropped, or when the session
//! becomes useless.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::session::ClientSession;
use crate::tracker::{DeviceEvent, DeviceTracker};

const EVENT_BUFFER: usize = 32;

/// Shortest heartbeat period accepted; zero would spin
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Something the caller should know about the monitored server
#[derive(Debug)]
pub enum SessionEvent {
    /// A device came, went or moved
    Device(DeviceEvent),
    /// The channel failed; monitoring has stopped
    Lost(ClientError),
    /// The server speaks a descriptor version we do not understand
    Unusable(String),
}

/// Handle to a running heartbeat task
pub struct SessionMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<ClientSession>,
}

impl SessionMonitor {
    /// Start monitoring `session`, issuing `who` every `period` (at least
    /// 10 ms)
    pub fn spawn(
        session: ClientSession,
        period: Duration,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = tokio::spawn(run(session, period, cancel.clone(), tx));
        (Self { cancel, handle }, rx)
    }

    /// Whether the heartbeat task has ended on its own
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop monitoring and take the session back
    pub async fn stop(self) -> Option<ClientSession> {
        self.cancel.cancel();
        match self.handle.await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::error!("Session monitor task failed: {}", e);
                None
            }
        }
    }
}

async fn run(
    mut session: ClientSession,
    period: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<SessionEvent>,
) -> ClientSession {
    let mut tracker = DeviceTracker::new();
    if period < MIN_HEARTBEAT {
        tracing::warn!("Heartbeat period {:?} too short, using {:?}", period, MIN_HEARTBEAT);
    }
    let mut heartbeat = tokio::time::interval(period.max(MIN_HEARTBEAT));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = heartbeat.tick() => {}
        }

        let terminal = match session.who().await {
            Ok(descriptor) => {
                let mut delivered = true;
                for event in tracker.update(&descriptor) {
                    if tx.send(SessionEvent::Device(event)).await.is_err() {
                        delivered = false;
                        break;
                    }
                }
                if !delivered {
                    tracing::debug!("Session monitor receiver dropped");
                    break;
                }
                continue;
            }
            Err(ClientError::Rejected { reason }) => {
                tracing::warn!("{} refused heartbeat: {}", session.address(), reason);
                continue;
            }
            Err(ClientError::UnsupportedVersion(version)) => SessionEvent::Unusable(version),
            Err(e) => {
                tracing::warn!("Lost session with {}: {}", session.address(), e);
                SessionEvent::Lost(e)
            }
        };

        // Devices of an unusable or lost server are gone as far as we know
        for event in tracker.clear() {
            let _ = tx.send(SessionEvent::Device(event)).await;
        }
        let _ = tx.send(terminal).await;
        break;
    }

    session
}
