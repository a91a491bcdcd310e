//! HTTP/WebSocket front door.
//!
//! Peers upgrade on `/` or `/ws`, or long-poll `GET /poll` and report results
//! with `POST /result`. `/status` and `/metrics` serve diagnostics; everything
//! else is told to use a WebSocket.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use studiolink_core::{Command, CommandResult};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::error::ServerError;
use crate::metrics::MetricsSnapshot;
use crate::registry::{Outbound, TransportSummary};
use crate::{Bridge, Session};

pub const SERVICE_NAME: &str = "studiolink";

#[derive(Clone)]
struct AppState {
    bridge: Bridge,
    port: u16,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub service: String,
    pub version: String,
    pub port: u16,
    pub clients: usize,
    pub ready: usize,
    pub connected: bool,
    pub pending: usize,
    /// Seconds since the bridge was created.
    pub uptime: f64,
    pub transport: TransportSummary,
}

/// Body of `POST /result` replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultReceipt {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A bound, not yet running, bridge server.
pub struct BridgeServer {
    bridge: Bridge,
    listener: TcpListener,
    addr: SocketAddr,
}

impl BridgeServer {
    /// Bind the listener. A busy port is reported as [`ServerError::PortInUse`].
    pub async fn bind(bridge: Bridge, addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr, e))?;
        let addr = listener.local_addr()?;
        Ok(Self {
            bridge,
            listener,
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn serve(self) -> Result<(), ServerError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.bridge, self.addr.port());
        tracing::info!("Listening on ws://{}", self.addr);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(signal)
            .await?;
        Ok(())
    }
}

/// Routes for a bridge reachable on `port`.
pub fn router(bridge: Bridge, port: u16) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/ws", get(upgrade))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/poll", get(poll))
        .route("/result", post(result))
        .fallback(|| async { (StatusCode::UPGRADE_REQUIRED, "Use WebSocket connection") })
        .with_state(AppState { bridge, port })
}

async fn upgrade(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state.bridge)),
        Err(rejection) => {
            tracing::debug!("upgrade rejected: {}", rejection);
            (StatusCode::BAD_REQUEST, "WebSocket upgrade failed").into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    let bridge = &state.bridge;
    Json(StatusReport {
        service: SERVICE_NAME.to_string(),
        version: bridge.server_version().to_string(),
        port: state.port,
        clients: bridge.connection_count().await,
        ready: bridge.ready_count().await,
        connected: bridge.is_connected().await,
        pending: bridge.pending_count().await,
        uptime: bridge.uptime().as_secs_f64(),
        transport: bridge.transport_summary().await,
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.bridge.metrics().await)
}

async fn poll(State(state): State<AppState>) -> Json<Vec<Command>> {
    Json(state.bridge.long_poll().await)
}

async fn result(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<ResultReceipt>) {
    match CommandResult::from_slice(&body) {
        Ok(result) => {
            state.bridge.handle_result(result).await;
            (
                StatusCode::OK,
                Json(ResultReceipt {
                    status: "ok".into(),
                    message: None,
                }),
            )
        }
        Err(e) => {
            tracing::warn!("rejected posted result: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(ResultReceipt {
                    status: "error".into(),
                    message: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn handle_socket(socket: WebSocket, bridge: Bridge) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut outbound) = mpsc::unbounded_channel();
    let mut session = match Session::open(bridge, outbox).await {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!("refused connection: {}", e);
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            // Frame from the peer
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!(id = %session.id(), "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => session.handle_text(text.as_str()).await,
                    Message::Binary(bytes) => session.handle_binary(&bytes).await,
                    Message::Close(_) => break,
                    // Transport-level ping/pong is answered by axum.
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }

            // Frame for the peer
            out = outbound.recv() => {
                match out {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::debug!(id = %session.id(), "send failed: {}", e);
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    session.close().await;
}
