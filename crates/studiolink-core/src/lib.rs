//! Core types for studiolink.
//!
//! This crate provides the protocol primitives shared by the bridge server and
//! the editor-side peer: commands, results, the framed messages that carry
//! them, and the version gate applied during the handshake.

mod command;
mod error;
mod message;
mod version;

pub use command::{Command, CommandResult, Params};
pub use error::ProtocolError;
pub use message::{PeerMessage, ServerMessage};
pub use version::{VersionParts, is_compatible};

use serde::{Deserialize, Serialize};

/// Error code sent when a peer's version is rejected.
pub const VERSION_MISMATCH: &str = "VERSION_MISMATCH";

/// Error code sent when an inbound frame cannot be understood.
pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";

/// Lifecycle of a single peer connection, as seen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Transport accepted, handshake not yet completed.
    Connected,
    /// Handshake accepted; the connection receives commands.
    Ready,
    /// Terminal.
    Closed,
}
