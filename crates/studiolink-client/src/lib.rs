//! Peer-side client for the studiolink bridge.
//!
//! Connects to a bridge, performs the version handshake, then receives command
//! batches and reports results. An editor integration wraps [`PeerClient::serve`]
//! around its own executor; tests drive the lower-level methods directly.

use futures_util::{SinkExt, StreamExt};
use studiolink_core::{Command, CommandResult, PeerMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Error talking to a bridge.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid frame from server: {0}")]
    Json(#[from] serde_json::Error),
    #[error("handshake rejected ({code}): {message}")]
    Rejected {
        code: String,
        message: String,
        server_version: Option<String>,
    },
    #[error("unexpected message: {0}")]
    Unexpected(String),
    #[error("connection closed")]
    Closed,
}

/// A connected, handshaken peer.
pub struct PeerClient {
    ws: Socket,
    client_id: String,
    server_version: String,
}

impl PeerClient {
    /// Connect to `url` and complete the handshake announcing `version`.
    pub async fn connect(url: &str, version: &str) -> Result<Self, ClientError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;

        let (client_id, server_version) = match read(&mut ws).await? {
            ServerMessage::Connected {
                client_id,
                server_version,
            } => (client_id, server_version),
            other => return Err(ClientError::Unexpected(format!("{other:?}"))),
        };
        tracing::debug!(%client_id, %server_version, "connected to bridge");

        write(
            &mut ws,
            &PeerMessage::Handshake {
                version: version.to_string(),
            },
        )
        .await?;

        match read(&mut ws).await? {
            ServerMessage::HandshakeOk { .. } => {}
            ServerMessage::Error {
                code,
                message,
                server_version,
            } => {
                return Err(ClientError::Rejected {
                    code: code.unwrap_or_default(),
                    message,
                    server_version,
                });
            }
            other => return Err(ClientError::Unexpected(format!("{other:?}"))),
        }

        Ok(Self {
            ws,
            client_id,
            server_version,
        })
    }

    /// Id the server assigned to this connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Next message from the server; `None` once the server closes.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        match read(&mut self.ws).await {
            Ok(msg) => Ok(Some(msg)),
            Err(ClientError::Closed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Wait for the next command batch, skipping acks and pongs.
    pub async fn next_commands(&mut self) -> Result<Vec<Command>, ClientError> {
        loop {
            match self.recv().await? {
                Some(ServerMessage::Commands { data }) => return Ok(data),
                Some(ServerMessage::Ack { .. } | ServerMessage::Pong { .. }) => continue,
                Some(other) => return Err(ClientError::Unexpected(format!("{other:?}"))),
                None => return Err(ClientError::Closed),
            }
        }
    }

    pub async fn send_result(&mut self, result: CommandResult) -> Result<(), ClientError> {
        write(&mut self.ws, &PeerMessage::Result { data: result }).await
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        write(&mut self.ws, &PeerMessage::Ping).await
    }

    /// Send a raw text frame, bypassing message encoding.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), ClientError> {
        self.ws.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Execute every received command with `handler` until the server closes.
    pub async fn serve<F>(mut self, mut handler: F) -> Result<(), ClientError>
    where
        F: FnMut(&Command) -> CommandResult,
    {
        loop {
            let commands = match self.next_commands().await {
                Ok(commands) => commands,
                Err(ClientError::Closed) => return Ok(()),
                Err(e) => return Err(e),
            };
            for command in &commands {
                tracing::debug!(id = %command.id, method = %command.method, "executing");
                let result = handler(command);
                self.send_result(result).await?;
            }
        }
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }
}

async fn read(ws: &mut Socket) -> Result<ServerMessage, ClientError> {
    loop {
        let msg = match ws.next().await {
            Some(msg) => msg?,
            None => return Err(ClientError::Closed),
        };
        match msg {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Binary(bytes) => return Ok(serde_json::from_slice(&bytes)?),
            Message::Close(_) => return Err(ClientError::Closed),
            _ => continue,
        }
    }
}

async fn write(ws: &mut Socket, msg: &PeerMessage) -> Result<(), ClientError> {
    let text = serde_json::to_string(msg)?;
    ws.send(Message::Text(text.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_names_the_code() {
        let err = ClientError::Rejected {
            code: "VERSION_MISMATCH".into(),
            message: "Plugin version 9.0.0 is incompatible with server 2.0.0".into(),
            server_version: Some("2.0.0".into()),
        };
        assert_eq!(
            err.to_string(),
            "handshake rejected (VERSION_MISMATCH): Plugin version 9.0.0 is incompatible with server 2.0.0"
        );
    }

    #[tokio::test]
    async fn connect_to_a_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = PeerClient::connect(&format!("ws://{addr}/ws"), "2.0.0")
            .await
            .err()
            .expect("nothing is listening");
        assert!(matches!(err, ClientError::WebSocket(_)), "{err}");
    }
}
