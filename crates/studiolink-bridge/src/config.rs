//! Bridge configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version this build of the bridge reports during the handshake.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What happens to waiting calls when the last peer disconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Calls keep waiting for their own deadline.
    #[default]
    AwaitDeadline,
    /// Calls fail immediately with the not-connected timeout error.
    FailPending,
}

/// Tunables for a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Version announced to peers and checked against theirs.
    pub server_version: String,
    /// Deadline for a single attempt.
    pub timeout_ms: u64,
    /// Extra attempts after a timeout.
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_delay_ms: u64,
    /// Completed commands kept for metrics.
    pub metrics_capacity: usize,
    /// Completed commands reported verbatim in a metrics snapshot.
    pub recent_commands: usize,
    pub disconnect_policy: DisconnectPolicy,
    /// How long an HTTP long poll waits for commands.
    pub poll_timeout_ms: u64,
    /// How long after its last poll an HTTP peer still counts as connected.
    pub poll_presence_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_version: SERVER_VERSION.to_string(),
            timeout_ms: 30_000,
            max_retries: 2,
            retry_delay_ms: 1_000,
            metrics_capacity: 100,
            recent_commands: 10,
            disconnect_policy: DisconnectPolicy::AwaitDeadline,
            poll_timeout_ms: 25_000,
            poll_presence_ms: 10_000,
        }
    }
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn poll_presence(&self) -> Duration {
        Duration::from_millis(self.poll_presence_ms)
    }
}
