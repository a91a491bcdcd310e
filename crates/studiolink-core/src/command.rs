//! Commands pushed to a peer and the results it reports back.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Ordered parameter bag for a remote method.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// A single remote invocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Opaque identifier, unique among in-flight commands.
    pub id: String,
    /// Remote method name (e.g. `CreateInstance`).
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Params,
}

impl Command {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Params) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A peer's outcome report for one [`Command`], matched by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: String,
    pub success: bool,
    /// Returned value. A missing field decodes as `null`.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Peer-reported failure text; only present when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    /// A successful result carrying `data`.
    pub fn ok(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            data,
            error: None,
        }
    }

    /// A failed result carrying the peer's error text.
    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Decode a bare result posted outside the message envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let result: CommandResult = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidResult(e.to_string()))?;
        result.validate()?;
        Ok(result)
    }

    /// Check the result shape. Serde already enforces a string id and a
    /// boolean `success`; an empty id is the remaining invalid case.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.id.is_empty() {
            return Err(ProtocolError::InvalidResult("result id is empty".into()));
        }
        Ok(())
    }

    /// Peer error text, or a generic message when the peer sent none.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown peer error")
    }
}
