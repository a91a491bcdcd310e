//! Stand-in editor plugin.
//!
//! Connects to a running bridge and answers every command by echoing its
//! parameters back, which is enough to exercise the bridge end to end without
//! an editor.
//!
//! Run the daemon, then:
//!   cargo run -p studiolink-demo-echo-peer -- --url ws://127.0.0.1:62847/ws
//!
//! Methods named `Fail*` report an execution failure.

use clap::Parser;
use studiolink_client::PeerClient;
use studiolink_core::{Command, CommandResult};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
struct Args {
    /// Bridge WebSocket URL.
    #[arg(long, default_value = "ws://127.0.0.1:62847/ws")]
    url: String,
    /// Version announced in the handshake.
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    version: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("echo_peer=info".parse()?))
        .init();

    let args = Args::parse();
    let peer = PeerClient::connect(&args.url, &args.version).await?;
    tracing::info!("Connected to {} as {}", args.url, peer.client_id());

    peer.serve(execute).await?;
    tracing::info!("Bridge closed the connection");
    Ok(())
}

fn execute(command: &Command) -> CommandResult {
    tracing::info!("{} {}", command.method, serde_json::Value::Object(command.params.clone()));
    if command.method.starts_with("Fail") {
        return CommandResult::failed(&command.id, format!("{} failed on purpose", command.method));
    }
    CommandResult::ok(&command.id, serde_json::Value::Object(command.params.clone()))
}
