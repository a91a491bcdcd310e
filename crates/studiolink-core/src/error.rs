//! Protocol-level failures, absorbed at the connection boundary.

use crate::{INVALID_MESSAGE, VERSION_MISMATCH};

/// Error decoding or validating an inbound frame, or rejecting a handshake.
///
/// The display text is what goes out on the wire; parser detail stays in
/// [`std::error::Error::source`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid result: {0}")]
    InvalidResult(String),
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),
    /// Well-formed JSON whose `type` is not one the bridge understands.
    #[error("Unsupported message type: {0}")]
    Unsupported(String),
    #[error("Plugin version {peer} is incompatible with server {server}")]
    VersionMismatch { server: String, peer: String },
}

impl ProtocolError {
    /// Wire code carried by the `error` notice for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::VersionMismatch { .. } => VERSION_MISMATCH,
            _ => INVALID_MESSAGE,
        }
    }

    /// Whether the peer should be told about this failure. Unknown message
    /// types are dropped silently so newer peers can talk to older bridges.
    pub fn warrants_reply(&self) -> bool {
        !matches!(self, ProtocolError::Unsupported(_))
    }
}
