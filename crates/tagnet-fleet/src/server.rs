//! # Fleet Server
//!
//! The TCP acceptor and per-connection lifecycle manager, plus the handle
//! the control logic drives the fleet through.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Fleet Server Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     FleetServer (acceptor)                      │   │
//! │  │                                                                 │   │
//! │  │  TcpListener ──► accept()                                       │   │
//! │  │                     │                                           │   │
//! │  │                     ▼                                           │   │
//! │  │             ┌───────────────┐                                   │   │
//! │  │             │  Connection   │ ◀───── one pair of tasks          │   │
//! │  │             │  lifecycle    │        per device                 │   │
//! │  │             └───────┬───────┘                                   │   │
//! │  │                     │                                           │   │
//! │  │        ┌────────────┼────────────┐                             │   │
//! │  │        ▼            ▼            ▼                             │   │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────┐                        │   │
//! │  │  │  Tag #1  │ │  Tag #2  │ │ Reader#3 │   Connected devices    │   │
//! │  │  └──────────┘ └──────────┘ └──────────┘                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Per-connection tasks:                                                 │
//! │  ─────────────────────                                                 │
//! │  reader: read → framer → dispatcher, update last-seen per read         │
//! │  writer: drain outbound channel → socket (no lock across a send)       │
//! │                                                                         │
//! │  Disconnection truth: the reader observing EOF or an I/O error.        │
//! │  Cleanup runs exactly once; a device reconnect is a fresh accept       │
//! │  with a new identifier, no identity continuity assumed.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tagnet_core::TagConfig;

use crate::broker::{Collected, CorrelationBroker, Reply};
use crate::config::{FleetConfig, TimeoutSettings};
use crate::dispatch::Dispatcher;
use crate::error::{FleetError, FleetResult};
use crate::framer::LineFramer;
use crate::protocol::ServerCommand;
use crate::registry::{ConnId, ConnectionRegistry, DeviceInfo};
use crate::sink::EventSink;

/// Outbound channel depth per connection. When a device stops draining its
/// socket, sends to it start failing; nobody else's traffic is affected.
const OUTBOUND_CHANNEL_DEPTH: usize = 64;

/// Read buffer size per connection. Device lines are short; one read often
/// carries several frames.
const READ_BUFFER_SIZE: usize = 1024;

// =============================================================================
// Ack Outcome
// =============================================================================

/// Terminal state of a configuration assignment.
///
/// A timeout is an expected outcome reported in the value, never an error:
/// the operator decides whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The device echoed the matching `ACK ID=<n>` in time.
    Applied,
    /// No matching ack arrived before the deadline.
    TimedOut,
}

// =============================================================================
// Fleet Server
// =============================================================================

/// The main server owning the acceptor and all connection tasks.
pub struct FleetServer {
    config: FleetConfig,
    registry: Arc<ConnectionRegistry>,
    broker: Arc<CorrelationBroker>,
    dispatcher: Arc<Dispatcher>,
}

impl FleetServer {
    /// Creates a server wired to the given event sink.
    pub fn new(config: FleetConfig, sink: Arc<dyn EventSink>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broker = Arc::new(CorrelationBroker::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), broker.clone(), sink));
        FleetServer {
            config,
            registry,
            broker,
            dispatcher,
        }
    }

    /// Binds the listener, spawns the acceptor and returns a handle.
    pub async fn start(self) -> FleetResult<FleetHandle> {
        self.config.validate()?;

        let bind_addr = self.config.server.bind_address();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            FleetError::BindFailed {
                addr: bind_addr.clone(),
                reason: e.to_string(),
            }
        })?;
        let local_addr = listener.local_addr().map_err(|e| FleetError::BindFailed {
            addr: bind_addr,
            reason: e.to_string(),
        })?;

        info!(addr = %local_addr, "Fleet server listening");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let handle = FleetHandle {
            registry: self.registry.clone(),
            broker: self.broker.clone(),
            timeouts: self.config.timeouts.clone(),
            shutdown_tx,
            local_addr,
        };

        let registry = self.registry;
        let dispatcher = self.dispatcher;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Fleet server shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let registry = registry.clone();
                                let dispatcher = dispatcher.clone();
                                tokio::spawn(async move {
                                    handle_connection(stream, addr, registry, dispatcher).await;
                                });
                            }
                            Err(e) => {
                                // One bad accept must not kill the acceptor.
                                warn!(error = %e, "Accept failed");
                            }
                        }
                    }
                }
            }
        });

        Ok(handle)
    }
}

// =============================================================================
// Connection Lifecycle
// =============================================================================

/// Drives one accepted connection to its end of life.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CHANNEL_DEPTH);

    let id = registry.register(addr, outbound_tx).await;
    let origin = addr.to_string();

    // Writer task: owns the write half, drains the outbound channel. Lines
    // arrive without their delimiter; it is appended here, once.
    let writer = tokio::spawn(async move {
        while let Some(line) = outbound_rx.recv().await {
            let mut bytes = line.into_bytes();
            bytes.push(b'\n');
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    // Receive loop: read → frame → dispatch.
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(conn = id, "Peer closed the connection");
                break;
            }
            Ok(n) => {
                registry.touch(id).await;
                for line in framer.feed(&buf[..n]) {
                    dispatcher.dispatch(id, &origin, &line).await;
                }
            }
            Err(e) => {
                warn!(conn = id, error = %e, "Read error, closing connection");
                break;
            }
        }
    }

    // Single point of disconnection truth. Unregister is idempotent, so a
    // racing external cleanup cannot double-run it; in-flight correlations
    // that expected this participant resolve by quorum of the others or by
    // their own deadline.
    registry.unregister(id).await;
    writer.abort();
}

// =============================================================================
// Fleet Handle
// =============================================================================

/// Cloneable handle for driving the fleet.
///
/// All request methods block only their caller; the engine keeps serving
/// other connections while a wait is in progress.
#[derive(Clone)]
pub struct FleetHandle {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<CorrelationBroker>,
    timeouts: TimeoutSettings,
    shutdown_tx: mpsc::Sender<()>,
    local_addr: SocketAddr,
}

impl FleetHandle {
    /// The address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Point-in-time view of all connected devices, ordered by id.
    pub async fn devices(&self) -> Vec<DeviceInfo> {
        self.registry.snapshot().await
    }

    /// One device's point-in-time view.
    pub async fn device(&self, id: ConnId) -> Option<DeviceInfo> {
        self.registry.get(id).await
    }

    /// Number of connected devices.
    pub async fn device_count(&self) -> usize {
        self.registry.len().await
    }

    /// Sends one raw line to a device.
    ///
    /// Fails immediately with [`FleetError::TargetNotConnected`] when the
    /// target is not registered; the send itself goes through the
    /// connection's outbound channel, never under a registry lock.
    pub async fn send_line(&self, id: ConnId, line: &str) -> FleetResult<()> {
        let sender = self
            .registry
            .sender(id)
            .await
            .ok_or(FleetError::TargetNotConnected(id))?;
        sender.try_send(line.to_string()).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "outbound channel full (stalled peer)",
                mpsc::error::TrySendError::Closed(_) => "outbound channel closed",
            };
            FleetError::SendFailed {
                conn: id,
                reason: reason.into(),
            }
        })
    }

    // =========================================================================
    // Broadcast-and-collect
    // =========================================================================

    /// Polls every connected device with the configured timeout.
    pub async fn poll(&self) -> FleetResult<Collected> {
        self.poll_timeout(self.timeouts.poll_timeout()).await
    }

    /// Polls every connected device: `PING <rid>` to each, then collects
    /// replies until quorum or deadline.
    pub async fn poll_timeout(&self, timeout: Duration) -> FleetResult<Collected> {
        let participants = self.registry.ids().await;
        self.broadcast_collect(&participants, timeout, |_, rid| {
            ServerCommand::Ping {
                rid: rid.to_string(),
            }
            .encode()
        })
        .await
    }

    /// Broadcast-and-collect with a caller-supplied payload per
    /// participant.
    ///
    /// The expected set is fixed at issuance; devices connecting later are
    /// not part of this request. Sends are best-effort: a failure for one
    /// participant is logged and the rest proceed, the silent one simply
    /// ends up in `missing`. Missing participants are reported, not
    /// retried; retrying a hardware poll is a caller decision.
    pub async fn broadcast_collect<F>(
        &self,
        participants: &[ConnId],
        timeout: Duration,
        payload: F,
    ) -> FleetResult<Collected>
    where
        F: Fn(ConnId, &str) -> FleetResult<String>,
    {
        let rid = self.broker.begin_poll(participants);

        for &id in participants {
            let line = match payload(id, &rid) {
                Ok(line) => line,
                Err(e) => {
                    warn!(conn = id, rid = %rid, error = %e, "Payload encoding failed, participant will be missing");
                    continue;
                }
            };
            if let Err(e) = self.send_line(id, &line).await {
                warn!(conn = id, rid = %rid, error = %e, "Broadcast send failed, participant will be missing");
            }
        }

        Ok(self.broker.wait(&rid, timeout).await)
    }

    // =========================================================================
    // Single-target requests
    // =========================================================================

    /// Assigns a configuration with the configured ack timeout.
    pub async fn assign(&self, target: ConnId, config: &TagConfig) -> FleetResult<AckOutcome> {
        self.assign_timeout(target, config, self.timeouts.ack_timeout())
            .await
    }

    /// Sends `SET <json>` to one device and waits for `ACK ID=<config.id>`.
    ///
    /// Resolves as soon as the matching ack arrives; a mismatched ack keeps
    /// the wait open. A timeout is reported in the outcome, not thrown.
    pub async fn assign_timeout(
        &self,
        target: ConnId,
        config: &TagConfig,
        timeout: Duration,
    ) -> FleetResult<AckOutcome> {
        config.validate()?;
        let line = ServerCommand::Set(config.clone()).encode()?;

        let rid = self.broker.begin_ack(target, config.id);
        if let Err(e) = self.send_line(target, &line).await {
            self.broker.discard(&rid);
            return Err(e);
        }

        let outcome = self.broker.wait(&rid, timeout).await;
        if outcome.satisfied {
            debug!(conn = target, id = config.id, "Configuration acknowledged");
            Ok(AckOutcome::Applied)
        } else {
            Ok(AckOutcome::TimedOut)
        }
    }

    /// Requests a hardware UID read with the configured timeout.
    pub async fn read_uid(&self, target: ConnId) -> FleetResult<Option<String>> {
        self.read_uid_timeout(target, self.timeouts.uid_timeout())
            .await
    }

    /// Sends `READUID <rid>` to one device and waits for any `UID <rid>`
    /// reply. Returns `None` when the deadline passes without one.
    pub async fn read_uid_timeout(
        &self,
        target: ConnId,
        timeout: Duration,
    ) -> FleetResult<Option<String>> {
        let rid = self
            .broker
            .begin_single(target, |reply| matches!(reply, Reply::Uid(_)));
        let line = ServerCommand::ReadUid { rid: rid.clone() }.encode()?;

        if let Err(e) = self.send_line(target, &line).await {
            self.broker.discard(&rid);
            return Err(e);
        }

        let mut outcome = self.broker.wait(&rid, timeout).await;
        match outcome.replies.remove(&target) {
            Some(Reply::Uid(uid)) => Ok(Some(uid)),
            _ => Ok(None),
        }
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops the acceptor. Existing connections drain on their own.
    pub async fn shutdown(&self) -> FleetResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| FleetError::ChannelError("shutdown channel closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;

    fn loopback_config() -> FleetConfig {
        let mut config = FleetConfig::default();
        config.server.bind_addr = "127.0.0.1".to_string();
        config.server.port = 0;
        config
    }

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let server = FleetServer::new(loopback_config(), Arc::new(NullSink));
        let handle = server.start().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(handle.device_count().await, 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut config = loopback_config();
        config.timeouts.poll_ms = 0;
        let server = FleetServer::new(config, Arc::new(NullSink));
        assert!(matches!(
            server.start().await,
            Err(FleetError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let mut config = loopback_config();
        config.server.bind_addr = "definitely-not-an-address".to_string();
        let server = FleetServer::new(config, Arc::new(NullSink));
        assert!(matches!(
            server.start().await,
            Err(FleetError::BindFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_to_absent_target_fails_immediately() {
        let server = FleetServer::new(loopback_config(), Arc::new(NullSink));
        let handle = server.start().await.unwrap();

        let started = std::time::Instant::now();
        let result = handle.send_line(42, "PING 1").await;
        assert!(matches!(result, Err(FleetError::TargetNotConnected(42))));
        assert!(started.elapsed() < Duration::from_millis(500));

        handle.shutdown().await.unwrap();
    }
}
