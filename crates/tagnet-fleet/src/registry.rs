//! # Connection Registry
//!
//! Thread-safe map from connection identifier to live connection state.
//! This is the single point of truth for "who is connected right now".
//!
//! ## Contract
//! - `register` allocates a fresh identifier under the registry lock and
//!   stores the connection. Identifiers are monotonically increasing and
//!   never reused for the lifetime of the process.
//! - `unregister` is idempotent: removing an already-absent id is a no-op,
//!   because a disconnect can race with control-logic cleanup.
//! - `snapshot` returns a consistent point-in-time copy, ordered by id,
//!   safe to iterate without holding the lock.
//! - The lock is only ever held for map access, never across a socket
//!   write; sends go through each connection's outbound channel.

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use tagnet_core::{DeviceRole, ReaderKind};

/// Stable handle for one accepted connection.
///
/// This is the only identity external logic may hold; the socket itself
/// never leaves the lifecycle manager.
pub type ConnId = u64;

// =============================================================================
// Connection State
// =============================================================================

/// Live state of one accepted connection.
#[derive(Debug)]
struct Connection {
    /// Remote peer address.
    addr: SocketAddr,

    /// Outbound line channel; the write half is owned by the connection's
    /// writer task.
    outbound: mpsc::Sender<String>,

    /// Current role. Starts as TAG, upgraded by role announcements.
    role: DeviceRole,

    /// Last time any bytes arrived from this peer.
    last_seen: DateTime<Utc>,

    /// Last acknowledgement value observed from this peer.
    last_ack: Option<i64>,
}

/// Point-in-time view of one connection, safe to hold after the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: ConnId,
    pub addr: SocketAddr,
    pub role: DeviceRole,
    pub last_seen: DateTime<Utc>,
    pub last_ack: Option<i64>,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Default)]
struct RegistryInner {
    /// Next identifier to allocate. Only ever incremented.
    next_id: ConnId,

    /// Live connections by id.
    connections: HashMap<ConnId, Connection>,
}

/// Thread-safe connection registry. All mutation is serialized through one
/// exclusive lock.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry::default()
    }

    /// Allocates a fresh identifier and stores the connection.
    pub async fn register(&self, addr: SocketAddr, outbound: mpsc::Sender<String>) -> ConnId {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.connections.insert(
            id,
            Connection {
                addr,
                outbound,
                role: DeviceRole::Tag,
                last_seen: Utc::now(),
                last_ack: None,
            },
        );
        info!(conn = id, addr = %addr, "Device connected");
        id
    }

    /// Removes a connection. Idempotent: returns false if already absent.
    pub async fn unregister(&self, id: ConnId) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.connections.remove(&id) {
            Some(conn) => {
                info!(conn = id, addr = %conn.addr, role = %conn.role, "Device disconnected");
                true
            }
            None => false,
        }
    }

    /// Returns the outbound channel for a connection, if it is live.
    ///
    /// The sender is cloned out so the caller performs the actual send
    /// without the registry lock.
    pub async fn sender(&self, id: ConnId) -> Option<mpsc::Sender<String>> {
        let inner = self.inner.lock().await;
        inner.connections.get(&id).map(|c| c.outbound.clone())
    }

    /// Returns a consistent point-in-time copy of all connections,
    /// ordered by identifier.
    pub async fn snapshot(&self) -> Vec<DeviceInfo> {
        let inner = self.inner.lock().await;
        let mut devices: Vec<DeviceInfo> = inner
            .connections
            .iter()
            .map(|(id, conn)| DeviceInfo {
                id: *id,
                addr: conn.addr,
                role: conn.role,
                last_seen: conn.last_seen,
                last_ack: conn.last_ack,
            })
            .collect();
        devices.sort_by_key(|d| d.id);
        devices
    }

    /// Returns one connection's point-in-time view.
    pub async fn get(&self, id: ConnId) -> Option<DeviceInfo> {
        let inner = self.inner.lock().await;
        inner.connections.get(&id).map(|conn| DeviceInfo {
            id,
            addr: conn.addr,
            role: conn.role,
            last_seen: conn.last_seen,
            last_ack: conn.last_ack,
        })
    }

    /// Live connection ids, ordered.
    pub async fn ids(&self) -> Vec<ConnId> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<ConnId> = inner.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Upgrades a connection to an NFC reader role. Idempotent; repeated
    /// or conflicting announcements overwrite, last one wins.
    pub async fn set_reader_role(&self, id: ConnId, kind: ReaderKind) {
        let mut inner = self.inner.lock().await;
        if let Some(conn) = inner.connections.get_mut(&id) {
            let role = DeviceRole::Nfc(kind);
            if conn.role != role {
                debug!(conn = id, role = %role, "Role announced");
            }
            conn.role = role;
        }
    }

    /// The reader sub-role of a connection, if it announced one.
    pub async fn reader_kind(&self, id: ConnId) -> Option<ReaderKind> {
        let inner = self.inner.lock().await;
        inner
            .connections
            .get(&id)
            .and_then(|conn| conn.role.reader_kind())
    }

    /// Refreshes the last-activity timestamp.
    pub async fn touch(&self, id: ConnId) {
        let mut inner = self.inner.lock().await;
        if let Some(conn) = inner.connections.get_mut(&id) {
            conn.last_seen = Utc::now();
        }
    }

    /// Records the last acknowledgement value observed from a connection.
    pub async fn record_ack(&self, id: ConnId, value: i64) {
        let mut inner = self.inner.lock().await;
        if let Some(conn) = inner.connections.get_mut(&id) {
            conn.last_ack = Some(value);
        }
    }
}
