//! Per-connection protocol handler.
//!
//! A [`Session`] is created when a transport is accepted and is fed every
//! inbound frame in order. Replies go out through the connection's outbox.

use std::error::Error;
use studiolink_core::{ConnectionState, PeerMessage, ProtocolError, ServerMessage, is_compatible};

use crate::Bridge;
use crate::error::BridgeError;
use crate::now_millis;
use crate::registry::{Outbound, Outbox};

pub struct Session {
    bridge: Bridge,
    id: String,
    outbox: Outbox,
    state: ConnectionState,
}

impl Session {
    /// Register the connection and greet the peer.
    ///
    /// Fails with [`BridgeError::Shutdown`] once the bridge has shut down.
    pub async fn open(bridge: Bridge, outbox: Outbox) -> Result<Self, BridgeError> {
        let id = bridge.connect(outbox.clone()).await?;
        let session = Self {
            bridge,
            id,
            outbox,
            state: ConnectionState::Connected,
        };
        session.reply(&ServerMessage::Connected {
            client_id: session.id.clone(),
            server_version: session.bridge.server_version().to_string(),
        });
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub async fn handle_text(&mut self, text: &str) {
        let decoded = PeerMessage::decode(text);
        self.handle(decoded).await;
    }

    pub async fn handle_binary(&mut self, bytes: &[u8]) {
        let decoded = PeerMessage::decode_bytes(bytes);
        self.handle(decoded).await;
    }

    async fn handle(&mut self, decoded: Result<PeerMessage, ProtocolError>) {
        if self.state == ConnectionState::Closed {
            return;
        }

        match decoded {
            Ok(PeerMessage::Handshake { version }) => self.handshake(version).await,
            Ok(PeerMessage::Result { data }) => {
                let id = data.id.clone();
                self.bridge.handle_result(data).await;
                self.reply(&ServerMessage::Ack { id });
            }
            Ok(PeerMessage::Ping) => self.reply(&ServerMessage::Pong {
                timestamp: now_millis(),
            }),
            Err(e) if !e.warrants_reply() => {
                tracing::debug!(id = %self.id, "ignored frame: {}", e);
            }
            Err(e) => {
                let detail = e.source().map(ToString::to_string);
                tracing::warn!(id = %self.id, ?detail, "rejected frame: {}", e);
                self.reply(&ServerMessage::Error {
                    code: Some(e.code().to_string()),
                    message: e.to_string(),
                    server_version: None,
                });
            }
        }
    }

    async fn handshake(&mut self, version: String) {
        let server_version = self.bridge.server_version().to_string();

        if !is_compatible(&server_version, &version) {
            let err = ProtocolError::VersionMismatch {
                server: server_version.clone(),
                peer: version,
            };
            tracing::warn!(id = %self.id, "handshake rejected: {}", err);
            self.reply(&ServerMessage::Error {
                code: Some(err.code().to_string()),
                message: err.to_string(),
                server_version: Some(server_version),
            });
            let _ = self.outbox.send(Outbound::Close);
            self.state = ConnectionState::Closed;
            return;
        }

        // Acknowledge before marking ready so the peer sees handshake_ok
        // ahead of any queued commands.
        self.reply(&ServerMessage::HandshakeOk {
            server_version,
            plugin_version: version.clone(),
        });
        self.bridge.mark_ready(&self.id, version).await;
        self.state = ConnectionState::Ready;
    }

    /// Remove the connection from the bridge. Call once the transport is gone.
    pub async fn close(self) {
        self.bridge.disconnect(&self.id).await;
    }

    fn reply(&self, msg: &ServerMessage) {
        match msg.to_json() {
            Ok(frame) => {
                let _ = self.outbox.send(Outbound::Frame(frame));
            }
            Err(e) => tracing::error!(id = %self.id, "failed to encode reply: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeConfig;
    use serde_json::json;
    use studiolink_core::{CommandResult, Params};
    use tokio::sync::mpsc;

    async fn open() -> (Bridge, Session, mpsc::UnboundedReceiver<Outbound>) {
        let bridge = Bridge::new(BridgeConfig {
            server_version: "1.1.0".into(),
            ..BridgeConfig::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::open(bridge.clone(), tx).await.unwrap();
        match next(&mut rx) {
            ServerMessage::Connected { client_id, server_version } => {
                assert_eq!(client_id, session.id());
                assert_eq!(server_version, "1.1.0");
            }
            other => panic!("expected connected, got {other:?}"),
        }
        (bridge, session, rx)
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> ServerMessage {
        match rx.try_recv().expect("no frame queued") {
            Outbound::Frame(text) => serde_json::from_str(&text).unwrap(),
            Outbound::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn compatible_handshake_marks_ready() {
        let (bridge, mut session, mut rx) = open().await;
        assert!(!bridge.is_connected().await);

        session.handle_text(r#"{"type":"handshake","version":"1.1.99"}"#).await;
        assert_eq!(
            next(&mut rx),
            ServerMessage::HandshakeOk {
                server_version: "1.1.0".into(),
                plugin_version: "1.1.99".into(),
            }
        );
        assert_eq!(session.state(), ConnectionState::Ready);
        assert!(bridge.is_connected().await);
        let info = bridge.connection_info().await;
        assert_eq!(info[0].version.as_deref(), Some("1.1.99"));
    }

    #[tokio::test]
    async fn incompatible_handshake_is_rejected_and_closed() {
        let (bridge, mut session, mut rx) = open().await;

        session.handle_text(r#"{"type":"handshake","version":"1.2.0"}"#).await;
        match next(&mut rx) {
            ServerMessage::Error { code, message, server_version } => {
                assert_eq!(code.as_deref(), Some("VERSION_MISMATCH"));
                assert!(message.contains("incompatible"), "{message}");
                assert_eq!(server_version.as_deref(), Some("1.1.0"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(!bridge.is_connected().await);

        // Nothing further is processed on a closed session.
        session.handle_text(r#"{"type":"ping"}"#).await;
        assert!(rx.try_recv().is_err());

        session.close().await;
        assert_eq!(bridge.connection_count().await, 0);
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let (_bridge, mut session, mut rx) = open().await;
        session.handle_text(r#"{"type":"ping"}"#).await;
        assert!(matches!(next(&mut rx), ServerMessage::Pong { timestamp } if timestamp > 0));

        session.handle_binary(br#"{"type":"ping"}"#).await;
        assert!(matches!(next(&mut rx), ServerMessage::Pong { .. }));
    }

    #[tokio::test]
    async fn malformed_input_keeps_the_session_open() {
        let (_bridge, mut session, mut rx) = open().await;
        session.handle_text("not valid json {{{").await;
        match next(&mut rx) {
            ServerMessage::Error { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("INVALID_MESSAGE"));
                assert_eq!(message, "Invalid JSON");
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(session.state(), ConnectionState::Connected);

        session.handle_text(r#"{"type":"ping"}"#).await;
        assert!(matches!(next(&mut rx), ServerMessage::Pong { .. }));
    }

    #[tokio::test]
    async fn unknown_message_types_are_ignored() {
        let (_bridge, mut session, mut rx) = open().await;
        session.handle_text(r#"{"type":"unknown_type","data":{}}"#).await;
        assert!(rx.try_recv().is_err());

        session.handle_text(r#"{"type":"ping"}"#).await;
        assert!(matches!(next(&mut rx), ServerMessage::Pong { .. }));
    }

    #[tokio::test]
    async fn empty_frame_is_invalid_json() {
        let (_bridge, mut session, mut rx) = open().await;
        session.handle_text("").await;
        assert!(matches!(
            next(&mut rx),
            ServerMessage::Error { message, .. } if message == "Invalid JSON"
        ));
    }

    #[tokio::test]
    async fn open_is_refused_after_shutdown() {
        let bridge = Bridge::new(BridgeConfig::default());
        bridge.shutdown().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let opened = Session::open(bridge.clone(), tx).await;
        assert!(matches!(opened, Err(BridgeError::Shutdown)));
        assert!(rx.try_recv().is_err());
        assert_eq!(bridge.connection_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_result_is_rejected_without_ack() {
        let (_bridge, mut session, mut rx) = open().await;
        session
            .handle_text(r#"{"type":"result","data":{"id":"","success":true}}"#)
            .await;
        assert!(matches!(next(&mut rx), ServerMessage::Error { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_result_is_still_acked() {
        let (bridge, mut session, mut rx) = open().await;
        session
            .handle_text(r#"{"type":"result","data":{"id":"unknown-command-id","success":true,"data":"ignored"}}"#)
            .await;
        assert_eq!(next(&mut rx), ServerMessage::Ack { id: "unknown-command-id".into() });
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn result_resolves_call_and_acks() {
        let (bridge, mut session, mut rx) = open().await;
        session.handle_text(r#"{"type":"handshake","version":"1.1.0"}"#).await;
        next(&mut rx);

        let caller = bridge.clone();
        let call = tokio::spawn(async move {
            let mut params = Params::new();
            params.insert("test".into(), json!(true));
            caller.execute("TestCmd", params).await
        });
        let command = loop {
            match rx.recv().await {
                Some(Outbound::Frame(text)) => {
                    if let ServerMessage::Commands { mut data } = serde_json::from_str(&text).unwrap() {
                        break data.remove(0);
                    }
                }
                other => panic!("unexpected {other:?}"),
            }
        };
        assert_eq!(command.method, "TestCmd");

        let frame = json!({
            "type": "result",
            "data": CommandResult::ok(&command.id, json!("test-result")),
        });
        session.handle_text(&frame.to_string()).await;
        assert_eq!(next(&mut rx), ServerMessage::Ack { id: command.id.clone() });
        assert_eq!(call.await.unwrap().unwrap(), json!("test-result"));
    }

    #[tokio::test]
    async fn handshake_flushes_commands_queued_earlier() {
        let (bridge, mut session, mut rx) = open().await;
        let caller = bridge.clone();
        let _call = tokio::spawn(async move { caller.execute("GetSelection", Params::new()).await });
        while bridge.queued_count().await == 0 {
            tokio::task::yield_now().await;
        }

        session.handle_text(r#"{"type":"handshake","version":"1.1.0"}"#).await;
        assert!(matches!(next(&mut rx), ServerMessage::HandshakeOk { .. }));
        match next(&mut rx) {
            ServerMessage::Commands { data } => assert_eq!(data[0].method, "GetSelection"),
            other => panic!("expected commands, got {other:?}"),
        }
    }
}
