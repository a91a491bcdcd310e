//! The studiolink bridge.
//!
//! An editor plugin connects back to this server over a WebSocket, completes a
//! version handshake, and then executes whatever commands the bridge pushes to
//! it. Plugins that cannot hold a socket open long-poll `GET /poll` and post
//! results to `POST /result` instead. Callers use [`Bridge::execute`] to issue a call and wait for the
//! correlated result, bounded by a deadline and an optional retry budget.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use studiolink_bridge::{Bridge, BridgeConfig, BridgeServer};
//!
//! let bridge = Bridge::new(BridgeConfig::default());
//! let server = BridgeServer::bind(bridge.clone(), ([127, 0, 0, 1], 62847).into()).await?;
//! tokio::spawn(server.serve());
//!
//! let mut params = serde_json::Map::new();
//! params.insert("path".into(), "game.Workspace".into());
//! let children = bridge.execute("GetChildren", params).await?;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod dispatch;
mod error;
mod metrics;
mod pending;
mod registry;
mod server;
mod session;

pub use bridge::Bridge;
pub use config::{BridgeConfig, DisconnectPolicy};
pub use error::{BridgeError, ServerError};
pub use metrics::{CommandMetric, MethodStats, MetricsSnapshot};
pub use registry::{ConnectionInfo, Outbound, Outbox, TransportSummary};
pub use server::{BridgeServer, ResultReceipt, StatusReport, router};
pub use session::Session;

pub use studiolink_core::{Command, CommandResult, Params};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
