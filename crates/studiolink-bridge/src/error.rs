//! Caller-visible failures.

use std::net::SocketAddr;
use studiolink_core::Params;

/// Why a call through the bridge failed.
///
/// Every message already names the method and, for timeouts, the attempt, so
/// callers can surface it as-is.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(
        "No editor plugin connected: {method} was not answered (attempt {attempt}). \
         Ensure the plugin is installed and the editor is running."
    )]
    NotConnected { method: String, attempt: u32 },
    #[error("{method} timed out after {timeout_ms}ms (attempt {attempt})")]
    TimedOut {
        method: String,
        timeout_ms: u64,
        attempt: u32,
    },
    #[error("{method} failed: {message}")]
    Execution {
        message: String,
        method: String,
        params: Params,
    },
    #[error("bridge is shut down")]
    Shutdown,
}

impl BridgeError {
    /// Timeouts are the only failures worth another attempt.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BridgeError::NotConnected { .. } | BridgeError::TimedOut { .. }
        )
    }
}

/// Failure starting or running the HTTP/WebSocket server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("port {0} is already in use")]
    PortInUse(u16),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub(crate) fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            ServerError::PortInUse(addr.port())
        } else {
            ServerError::Bind { addr, source }
        }
    }
}
