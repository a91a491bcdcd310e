//! Protocol messages.
//!
//! Every frame is a JSON object tagged by `type`. Field names are camelCase on
//! the wire.

use crate::{Command, CommandResult, ProtocolError};
use serde::{Deserialize, Serialize};

/// Messages sent from the bridge to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once, right after the transport is accepted.
    Connected {
        client_id: String,
        server_version: String,
    },
    /// Handshake accepted.
    HandshakeOk {
        server_version: String,
        plugin_version: String,
    },
    /// Handshake rejected or malformed input.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_version: Option<String>,
    },
    /// Batch of queued commands.
    Commands { data: Vec<Command> },
    /// Receipt for a result, sent whether or not the id was pending.
    Ack { id: String },
    /// Keepalive reply; `timestamp` is milliseconds since the Unix epoch.
    Pong { timestamp: u64 },
}

impl ServerMessage {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages sent from a peer to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Peer announces its version.
    Handshake { version: String },
    /// Outcome of one command.
    Result { data: CommandResult },
    /// Keepalive.
    Ping,
}

impl PeerMessage {
    /// Decode and validate one inbound frame.
    ///
    /// Unparseable JSON is [`ProtocolError::Malformed`]; a known `type` whose
    /// payload has the wrong shape is [`ProtocolError::InvalidResult`] or
    /// [`ProtocolError::InvalidHandshake`]; anything else is
    /// [`ProtocolError::Unsupported`].
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Decode a binary frame holding UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ProtocolError> {
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        let msg: PeerMessage = serde_json::from_value(value).map_err(|e| match kind.as_str() {
            "result" => ProtocolError::InvalidResult(e.to_string()),
            "handshake" => ProtocolError::InvalidHandshake(e.to_string()),
            "" => ProtocolError::Unsupported("<missing>".into()),
            _ => ProtocolError::Unsupported(kind.clone()),
        })?;

        if let PeerMessage::Result { data } = &msg {
            data.validate()?;
        }
        Ok(msg)
    }
}
