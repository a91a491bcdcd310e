//! studiolink daemon.
//!
//! Runs the bridge server that editor plugins connect back to. Logs go to
//! stderr so stdout stays free for a tool adapter.
//!
//! Run:
//!   cargo run -p studiolink-daemon -- --port 62847
//!   cargo run -p studiolink-daemon -- --config studiolink.toml

mod config;

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use studiolink_bridge::{Bridge, BridgeServer, ServerError};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

#[derive(Debug, Parser)]
#[command(name = "studiolink", version, about = "Bridge between automation agents and an editor plugin")]
struct Args {
    /// TOML config file.
    #[arg(short, long, env = "STUDIOLINK_CONFIG")]
    config: Option<PathBuf>,
    /// Address to listen on.
    #[arg(long, env = "STUDIOLINK_HOST")]
    host: Option<IpAddr>,
    /// Port to listen on.
    #[arg(short, long, env = "STUDIOLINK_PORT")]
    port: Option<u16>,
    /// Per-attempt command timeout in milliseconds.
    #[arg(long, env = "STUDIOLINK_TIMEOUT_MS")]
    timeout_ms: Option<u64>,
}

impl Args {
    fn resolve(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path)?,
            None => DaemonConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.bridge.timeout_ms = timeout_ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("studiolink=info".parse()?)
                .add_directive("studiolink_bridge=info".parse()?),
        )
        .init();

    let config = Args::parse().resolve()?;
    let addr = config.addr();
    tracing::info!(
        "Starting studiolink {} on {} (timeout {}ms, {} retries)",
        config.bridge.server_version,
        addr,
        config.bridge.timeout_ms,
        config.bridge.max_retries
    );

    let bridge = Bridge::new(config.bridge);
    let server = match BridgeServer::bind(bridge.clone(), addr).await {
        Ok(server) => server,
        Err(ServerError::PortInUse(port)) => {
            anyhow::bail!("port {port} is already in use; is another studiolink running?")
        }
        Err(e) => return Err(e.into()),
    };

    // Close peer sessions first so graceful shutdown is not held open by them.
    let closing = bridge.clone();
    server
        .serve_with_shutdown(async move {
            shutdown_signal().await;
            closing.shutdown().await;
        })
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from(["studiolink", "--port", "9100", "--timeout-ms", "250"])
            .unwrap();
        let config = args.resolve().unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.bridge.timeout_ms, 250);
        assert_eq!(config.host.to_string(), "127.0.0.1");
    }
}
