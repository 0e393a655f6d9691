//! Per-client chat channel over WebSocket.
//!
//! Protocol:
//! - Client → Server: `{"type": "chat", "content": "...", "category": "..."}`
//!   or `{"type": "clear"}`
//! - Server → Client: `{"type": "chat" | "status" | "error", "content": "..."}`
//!
//! The first connection for a client id creates its session, loads the
//! backend and sends a status frame with the outcome. A reconnect retries the
//! load until it succeeds. One connection drives its session's turns
//! sequentially.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kbchat_session::{SessionState, SessionStore, SharedSession};

use crate::SharedState;

pub const LOAD_OK: &str = "Model loaded successfully, ready to chat!";
pub const LOAD_FAILED: &str = "Model loading failed!";
pub const HISTORY_CLEARED: &str = "Chat history cleared";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Chat {
        content: String,
        #[serde(default)]
        category: Option<String>,
    },
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum ServerFrame {
    Chat(String),
    Status(String),
    Error(String),
}

impl ServerFrame {
    fn to_ws(&self) -> WsMessage {
        let json = serde_json::to_string(self).unwrap_or_default();
        WsMessage::Text(json.into())
    }
}

/// `GET /ws/{client_id}`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, client_id, state))
}

/// Look up the client's session and initialize it unless it is already
/// ready. The returned frame reports the load outcome when one was attempted.
pub async fn open_session(
    store: &SessionStore,
    client_id: &str,
) -> (SharedSession, Option<ServerFrame>) {
    let (session, created) = store.get_or_create(client_id).await;

    let probe = {
        let mut guard = session.lock().await;
        if !created && guard.state() == SessionState::Ready {
            None
        } else {
            Some(guard.initialize().await)
        }
    };
    let Some(probe) = probe else {
        return (session, None);
    };

    let status = if probe.ready {
        LOAD_OK.to_string()
    } else {
        format!("{LOAD_FAILED} {}", probe.message)
    };
    (session, Some(ServerFrame::Status(status)))
}

/// Apply one inbound text frame to the session and produce the reply frame.
pub async fn handle_frame(session: &SharedSession, raw: &str) -> ServerFrame {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(f) => f,
        Err(e) => return ServerFrame::Error(format!("Invalid message: {e}")),
    };

    match frame {
        ClientFrame::Chat { content, category } => {
            let reply = session.lock().await.turn(content, category.as_deref()).await;
            ServerFrame::Chat(reply)
        }
        ClientFrame::Clear => {
            session.lock().await.clear().await;
            ServerFrame::Status(HISTORY_CLEARED.into())
        }
    }
}

async fn handle_ws_connection(mut socket: WebSocket, client_id: String, state: SharedState) {
    info!(client_id = %client_id, "WebSocket connection established");

    let (session, greeting) = open_session(&state.sessions, &client_id).await;
    if let Some(frame) = greeting
        && socket.send(frame.to_ws()).await.is_err()
    {
        return;
    }

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue, // ignore binary, ping, pong
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "WebSocket receive failed");
                break;
            }
        };

        debug!(client_id = %client_id, bytes = text.len(), "Frame received");
        let reply = handle_frame(&session, text.as_str()).await;
        if socket.send(reply.to_ws()).await.is_err() {
            break; // client disconnected
        }
    }

    // The session outlives the connection.
    info!(client_id = %client_id, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use crate::test_support::{MockBackend, state_with, test_state};
    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use kbchat_core::{Backend, BackendError, BackendKind, Message, Probe};
    use kbchat_knowledge::InMemoryStore;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_tungstenite::tungstenite::Message as TMessage;

    /// Unreachable on the first readiness check, ready afterwards.
    #[derive(Default)]
    struct LateBackend {
        probes: AtomicUsize,
    }

    #[async_trait]
    impl Backend for LateBackend {
        fn name(&self) -> &str {
            "late"
        }
        fn kind(&self) -> BackendKind {
            BackendKind::LocalDaemon
        }
        async fn probe(&self) -> Probe {
            if self.probes.fetch_add(1, Ordering::SeqCst) == 0 {
                Probe::not_ready("Cannot connect")
            } else {
                Probe::ready("ok")
            }
        }
        async fn generate(&self, messages: &[Message]) -> Result<String, BackendError> {
            MockBackend.generate(messages).await
        }
    }

    #[test]
    fn frames_use_wire_shape() {
        let json = serde_json::to_value(ServerFrame::Chat("hi".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "chat", "content": "hi"}));

        let parsed: ClientFrame =
            serde_json::from_str(r#"{"type":"chat","content":"q","category":"billing"}"#).unwrap();
        assert_eq!(
            parsed,
            ClientFrame::Chat {
                content: "q".into(),
                category: Some("billing".into())
            }
        );
        let parsed: ClientFrame = serde_json::from_str(r#"{"type":"clear"}"#).unwrap();
        assert_eq!(parsed, ClientFrame::Clear);
    }

    #[tokio::test]
    async fn first_contact_reports_load_once() {
        let state = test_state().await;
        let (_, greeting) = open_session(&state.sessions, "c1").await;
        assert_eq!(greeting, Some(ServerFrame::Status(LOAD_OK.into())));

        let (_, greeting) = open_session(&state.sessions, "c1").await;
        assert_eq!(greeting, None);
    }

    #[tokio::test]
    async fn reconnect_retries_a_failed_load() {
        let backend = Arc::new(LateBackend::default());
        let state = state_with(Arc::new(InMemoryStore::new()), backend).await;

        let (_, greeting) = open_session(&state.sessions, "c1").await;
        assert_eq!(
            greeting,
            Some(ServerFrame::Status(format!("{LOAD_FAILED} Cannot connect")))
        );

        let (session, greeting) = open_session(&state.sessions, "c1").await;
        assert_eq!(greeting, Some(ServerFrame::Status(LOAD_OK.into())));
        let reply = handle_frame(&session, r#"{"type":"chat","content":"hello"}"#).await;
        assert_eq!(reply, ServerFrame::Chat("Mock reply to: hello".into()));

        let (_, greeting) = open_session(&state.sessions, "c1").await;
        assert_eq!(greeting, None);
    }

    #[tokio::test]
    async fn chat_and_clear_frames() {
        let state = test_state().await;
        let (session, _) = open_session(&state.sessions, "c1").await;

        let reply = handle_frame(&session, r#"{"type":"chat","content":"hello"}"#).await;
        assert_eq!(reply, ServerFrame::Chat("Mock reply to: hello".into()));
        assert_eq!(session.lock().await.history().len(), 3);

        let reply = handle_frame(&session, r#"{"type":"clear"}"#).await;
        assert_eq!(reply, ServerFrame::Status(HISTORY_CLEARED.into()));
        assert_eq!(session.lock().await.history().len(), 1);
    }

    #[tokio::test]
    async fn malformed_frames_get_error_replies() {
        let state = test_state().await;
        let (session, _) = open_session(&state.sessions, "c1").await;

        for raw in ["not json", r#"{"type":"dance"}"#, r#"{"type":"chat"}"#] {
            match handle_frame(&session, raw).await {
                ServerFrame::Error(msg) => assert!(msg.starts_with("Invalid message")),
                other => panic!("expected error frame for {raw}, got {other:?}"),
            }
        }
        assert_eq!(session.lock().await.history().len(), 1);
    }

    #[tokio::test]
    async fn websocket_round_trip() {
        let app = build_router(test_state().await);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/tester"))
            .await
            .unwrap();

        let greeting = ws.next().await.unwrap().unwrap();
        let greeting: serde_json::Value =
            serde_json::from_str(greeting.to_text().unwrap()).unwrap();
        assert_eq!(greeting, serde_json::json!({"type": "status", "content": LOAD_OK}));

        ws.send(TMessage::text(r#"{"type":"chat","content":"ping"}"#))
            .await
            .unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        let reply: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
        assert_eq!(reply["type"], "chat");
        assert_eq!(reply["content"], "Mock reply to: ping");
    }
}
