pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use base64::Engine;
use futures::{sink::SinkExt, stream::StreamExt};
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::store::RoomStore;
use crate::types::{new_participant_id, ParticipantId, Role, RoomCode};

/// Shared state behind the relay routes
pub struct RelayState {
    pub store: Arc<dyn RoomStore>,
    /// Resume token -> the participant it was issued to
    identities: RwLock<HashMap<String, ParticipantId>>,
}

impl RelayState {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self {
            store,
            identities: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve who is connecting. A token issued earlier maps back to its
    /// participant; anything else gets a fresh id and a fresh token. Clients
    /// never pick their own id.
    pub async fn identify(&self, token: Option<&str>) -> (ParticipantId, String) {
        if let Some(token) = token {
            if let Some(id) = self.identities.read().await.get(token) {
                return (id.clone(), token.to_string());
            }
            tracing::warn!("Unknown resume token, issuing a new identity");
        }

        let id = new_participant_id();
        let token = generate_token();
        self.identities
            .write()
            .await
            .insert(token.clone(), id.clone());
        (id, token)
    }
}

/// Unguessable resume token (256 random bits, URL-safe)
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub role: Option<String>,
    /// Token from an earlier `welcome`, to come back as the same participant
    pub token: Option<String>,
}

/// One connected device
pub struct Connection {
    pub id: ParticipantId,
    pub role: Role,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    watches: HashMap<RoomCode, JoinHandle<()>>,
}

impl Connection {
    pub fn new(id: ParticipantId, role: Role) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                role,
                outbound,
                watches: HashMap::new(),
            },
            rx,
        )
    }

    pub fn is_watching(&self, code: &str) -> bool {
        self.watches.get(code).is_some_and(|task| !task.is_finished())
    }

    fn watch(&mut self, code: RoomCode, task: JoinHandle<()>) {
        if let Some(previous) = self.watches.insert(code, task) {
            previous.abort();
        }
    }

    fn unwatch(&mut self, code: &str) -> bool {
        match self.watches.remove(code) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for (_, task) in self.watches.drain() {
            task.abort();
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    tracing::info!(
        "WebSocket connection request: role={:?}, resuming={}",
        params.role,
        params.token.is_some()
    );

    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<RelayState>) {
    let (mut sender, mut receiver) = socket.split();

    let role = match params.role.as_deref() {
        Some("host") => Role::Host,
        _ => Role::Player,
    };
    let (id, token) = state.identify(params.token.as_deref()).await;

    tracing::info!("WebSocket connected: {} as {:?}", id, role);

    let (mut conn, mut outbound) = Connection::new(id.clone(), role);

    let welcome = ServerMessage::Welcome {
        protocol: "1.0".to_string(),
        role,
        id,
        token,
        server_now: chrono::Utc::now().to_rfc3339(),
    };

    if let Ok(msg) = serde_json::to_string(&welcome) {
        if sender.send(Message::Text(msg.into())).await.is_err() {
            tracing::error!("Failed to send welcome message");
            return;
        }
    }

    loop {
        tokio::select! {
            // Room/players snapshots from watch forwarders
            Some(msg) = outbound.recv() => {
                if let Ok(json) = serde_json::to_string(&msg) {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) =
                                    handlers::handle_message(client_msg, &mut conn, &state).await
                                {
                                    if let Ok(json) = serde_json::to_string(&response) {
                                        if sender.send(Message::Text(json.into())).await.is_err() {
                                            tracing::error!("Failed to send response");
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                let error = ServerMessage::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", e),
                                );
                                if let Ok(json) = serde_json::to_string(&error) {
                                    let _ = sender.send(Message::Text(json.into())).await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed for {} ({:?})", conn.id, conn.role);
}
