//! Connection registry.
//!
//! Tracks every attached peer and whether it has completed the handshake.
//! Transports hand the registry an outbox; the registry never touches sockets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use studiolink_core::ConnectionState;
use tokio::sync::mpsc;

/// A frame queued for a connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame.
    Frame(String),
    /// Close the transport after flushing earlier frames.
    Close,
}

pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// One attached peer.
#[derive(Debug)]
pub(crate) struct Connection {
    pub id: String,
    pub connected_at: u64,
    pub ready: bool,
    pub version: Option<String>,
    outbox: Outbox,
}

impl Connection {
    pub fn new(id: String, connected_at: u64, outbox: Outbox) -> Self {
        Self {
            id,
            connected_at,
            ready: false,
            version: None,
            outbox,
        }
    }

    /// Queue a text frame. Returns false if the writer is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.outbox.send(Outbound::Frame(frame.to_string())).is_ok()
    }

    pub fn close(&self) {
        let _ = self.outbox.send(Outbound::Close);
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            connected_at: self.connected_at,
            state: if self.ready {
                ConnectionState::Ready
            } else {
                ConnectionState::Connected
            },
            version: self.version.clone(),
        }
    }
}

/// Read-only view of a connection for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub connected_at: u64,
    pub state: ConnectionState,
    pub version: Option<String>,
}

impl ConnectionInfo {
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }
}

/// Which transports currently reach a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSummary {
    /// An HTTP poller is waiting or polled recently.
    pub http_connected: bool,
    /// Attached WebSocket connections, ready or not.
    pub ws_clients: usize,
    /// Milliseconds since the Unix epoch of the last poll; 0 if never.
    pub last_poll_time: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    connections: BTreeMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn add(&mut self, connection: Connection) {
        tracing::debug!(id = %connection.id, "connection registered");
        self.connections.insert(connection.id.clone(), connection);
    }

    pub fn remove(&mut self, id: &str) -> Option<Connection> {
        let removed = self.connections.remove(id);
        if let Some(conn) = &removed {
            tracing::debug!(id = %conn.id, ready = conn.ready, "connection removed");
        }
        removed
    }

    /// Flip a connection to ready. Returns false for unknown ids.
    pub fn mark_ready(&mut self, id: &str, version: String) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.ready = true;
                conn.version = Some(version);
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn ready_count(&self) -> usize {
        self.connections.values().filter(|c| c.ready).count()
    }

    pub fn for_each_ready(&self, mut f: impl FnMut(&Connection)) {
        self.connections.values().filter(|c| c.ready).for_each(|c| f(c));
    }

    pub fn infos(&self) -> Vec<ConnectionInfo> {
        self.connections.values().map(Connection::info).collect()
    }

    pub fn clear(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.connections).into_values().collect()
    }
}
