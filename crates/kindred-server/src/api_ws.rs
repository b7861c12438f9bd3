//! Websocket relay: connection registry, chat frames, and persona replies.
//!
//! Every accepted socket registers a session under its user id. A user may
//! hold any number of concurrent sessions (phone and desktop at once), and
//! frames addressed to the user fan out to all of them. Personas never hold
//! sessions; their side of a conversation is synthesized on the relay and
//! pushed back to the human who wrote to them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use kindred_chat::{
    create_message, find_persona, get_conversation, CreateMessageParams, Message, Persona,
};
use kindred_types::TurnRole;
use kindred_voice::ChatTurn;

use crate::{ApiError, AppState};

/// Frames buffered per session before the relay starts dropping.
const SESSION_QUEUE_DEPTH: usize = 256;

/// One live websocket session.
#[derive(Clone)]
struct SessionHandle {
    id: Uuid,
    connected_at: DateTime<Utc>,
    tx: mpsc::Sender<String>,
}

/// Registry of live sessions, keyed by user id.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    sessions: Arc<RwLock<HashMap<String, Vec<SessionHandle>>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for a user and returns its id.
    pub async fn add_session(&self, user_id: String, tx: mpsc::Sender<String>) -> Uuid {
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            connected_at: Utc::now(),
            tx,
        };
        let id = handle.id;
        let mut sessions = self.sessions.write().await;
        sessions.entry(user_id).or_default().push(handle);
        id
    }

    /// Removes one session, pruning the user's entry when it was the last.
    /// Returns the session's connect time when it was actually registered.
    pub async fn remove_session(&self, user_id: &str, session_id: Uuid) -> Option<DateTime<Utc>> {
        let mut sessions = self.sessions.write().await;
        let handles = sessions.get_mut(user_id)?;
        let position = handles.iter().position(|h| h.id == session_id)?;
        let handle = handles.remove(position);
        if handles.is_empty() {
            sessions.remove(user_id);
        }
        Some(handle.connected_at)
    }

    /// Removes every session a user holds.
    pub async fn disconnect_user(&self, user_id: &str) {
        self.sessions.write().await.remove(user_id);
    }

    /// Queues a frame on every live session of a user. Sessions whose queue
    /// is full lose the frame; the write never blocks relay processing.
    pub async fn send_to_user(&self, user_id: &str, frame_json: String) {
        let sessions = self.sessions.read().await;
        let Some(handles) = sessions.get(user_id) else {
            return;
        };
        for handle in handles {
            if let Err(e) = handle.tx.try_send(frame_json.clone()) {
                tracing::warn!(
                    user = user_id,
                    session = %handle.id,
                    "dropping frame for slow consumer: {}",
                    e
                );
            }
        }
    }

    /// Number of live sessions a user holds.
    pub async fn session_count(&self, user_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of distinct users with at least one live session.
    pub async fn connected_users(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingFrame {
    /// Send a message to a user or persona.
    #[serde(rename = "message")]
    Message { to: String, body: String },
    /// Request the recent conversation with a counterpart.
    #[serde(rename = "history")]
    History { with: String, limit: Option<u32> },
}

/// A stored message as it travels over the socket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessagePayload {
    pub message_id: String,
    pub sender: String,
    pub receiver: String,
    pub body: String,
    pub created_at: String,
}

impl From<Message> for WsMessagePayload {
    fn from(message: Message) -> Self {
        Self {
            message_id: message.message_id,
            sender: message.sender,
            receiver: message.receiver,
            body: message.body,
            created_at: message.created_at,
        }
    }
}

/// Frames the relay pushes to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingFrame {
    /// A persisted message, echoed to the sender and delivered to the
    /// receiver's sessions.
    #[serde(rename = "message")]
    Message(WsMessagePayload),
    /// Reply to a history request; goes only to the session that asked.
    #[serde(rename = "history")]
    History {
        with: String,
        messages: Vec<WsMessagePayload>,
    },
    /// Mirror of a completed voice turn so open chat views stay current.
    #[serde(rename = "voice_turn")]
    VoiceTurn {
        persona: String,
        transcript: String,
        #[serde(rename = "replyText")]
        reply_text: String,
    },
    /// Something went wrong with the caller's last frame.
    #[serde(rename = "error")]
    Error {
        reason: &'static str,
        message: String,
    },
}

/// Serializes a frame and queues it on one session.
fn send_frame(tx: &mpsc::Sender<String>, frame: &OutgoingFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("dropping frame for slow consumer: {}", e);
            }
        }
        Err(e) => tracing::error!("failed to serialize websocket frame: {}", e),
    }
}

fn send_error_frame(tx: &mpsc::Sender<String>, err: &ApiError) {
    send_frame(
        tx,
        &OutgoingFrame::Error {
            reason: err.reason(),
            message: err.message().to_string(),
        },
    );
}

/// Serializes a frame once and fans it out to every session of a user.
pub(crate) async fn push_frame(manager: &ConnectionManager, user_id: &str, frame: &OutgoingFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => manager.send_to_user(user_id, json).await,
        Err(e) => tracing::error!("failed to serialize websocket frame: {}", e),
    }
}

#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    pub user: Option<String>,
}

/// GET /ws?user={user_id}
///
/// Upgrades to a websocket session. The identity rides in the query string
/// because browsers cannot attach headers to upgrade requests; connections
/// that present no identity are refused before the upgrade completes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let user_id = match params.user {
        Some(user) if !user.trim().is_empty() => user,
        _ => {
            tracing::warn!(remote = %addr, "websocket connect without user identity");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    tracing::info!(user = %user_id, remote = %addr, "websocket connected");
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(SESSION_QUEUE_DEPTH);
    let session_id = state
        .connection_manager
        .add_session(user_id.clone(), tx.clone())
        .await;

    // Forward queued frames to the socket until the client goes away.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(AxumMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                match serde_json::from_str::<IncomingFrame>(&text.to_string()) {
                    Ok(IncomingFrame::Message { to, body }) => {
                        handle_message_frame(&state, &user_id, to, body, &tx).await;
                    }
                    Ok(IncomingFrame::History { with, limit }) => {
                        handle_history_frame(&state, &user_id, with, limit, &tx).await;
                    }
                    Err(e) => {
                        tracing::warn!(user = %user_id, "unparseable websocket frame: {}", e);
                        send_error_frame(&tx, &ApiError::validation("unrecognized frame"));
                    }
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    if let Some(connected_at) = state
        .connection_manager
        .remove_session(&user_id, session_id)
        .await
    {
        let duration = Utc::now().signed_duration_since(connected_at);
        tracing::info!(
            user = %user_id,
            session = %session_id,
            duration_secs = duration.num_seconds(),
            "websocket session closed"
        );
    }
    send_task.abort();
}

async fn handle_message_frame(
    state: &Arc<AppState>,
    sender_id: &str,
    to: String,
    body: String,
    tx: &mpsc::Sender<String>,
) {
    if to.trim().is_empty() {
        send_error_frame(tx, &ApiError::validation("receiver must not be empty"));
        return;
    }
    if body.trim().is_empty() {
        send_error_frame(tx, &ApiError::validation("message body must not be empty"));
        return;
    }
    if body.len() > state.policy.max_message_bytes {
        send_error_frame(
            tx,
            &ApiError::validation(format!(
                "message body exceeds {} bytes",
                state.policy.max_message_bytes
            )),
        );
        return;
    }

    // Persist before anyone sees the message, classifying the receiver in
    // the same pool checkout. A persist failure reaches only the sending
    // session: nothing is delivered and nothing retries.
    let pool = state.pool.clone();
    let params = CreateMessageParams {
        message_id: Uuid::new_v4().to_string(),
        sender: sender_id.to_string(),
        receiver: to.clone(),
        body,
    };
    let persisted = tokio::task::spawn_blocking(
        move || -> Result<(Message, Option<Persona>), ApiError> {
            let conn = pool.get().map_err(ApiError::internal)?;
            let persona = find_persona(&conn, &params.receiver)?;
            let message = create_message(&conn, &params)?;
            Ok((message, persona))
        },
    )
    .await;

    let (message, persona) = match persisted {
        Ok(Ok(pair)) => pair,
        Ok(Err(err)) => {
            tracing::error!(sender = sender_id, receiver = %to, "failed to persist message: {}", err);
            send_error_frame(tx, &err);
            return;
        }
        Err(e) => {
            tracing::error!(sender = sender_id, receiver = %to, "message persistence task failed: {}", e);
            send_error_frame(tx, &ApiError::internal(e));
            return;
        }
    };

    // The echo doubles as the delivery acknowledgment: every session the
    // sender holds sees the stored form, ids and timestamp included.
    let frame = OutgoingFrame::Message(WsMessagePayload::from(message));
    push_frame(&state.connection_manager, sender_id, &frame).await;

    match persona {
        None => {
            // Human counterpart: deliver to whatever sessions they have
            // live. Offline users catch up from history.
            push_frame(&state.connection_manager, &to, &frame).await;
        }
        Some(persona) if !persona.active => {
            send_error_frame(
                tx,
                &ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    format!("persona {} is retired", persona.persona_id),
                ),
            );
        }
        Some(persona) => {
            match synthesize_persona_reply(state, sender_id, &persona).await {
                Ok(reply) => {
                    let reply_frame = OutgoingFrame::Message(WsMessagePayload::from(reply));
                    push_frame(&state.connection_manager, sender_id, &reply_frame).await;
                }
                Err(err) => {
                    tracing::error!(
                        sender = sender_id,
                        persona = %persona.persona_id,
                        "persona reply failed: {}",
                        err
                    );
                    send_error_frame(tx, &err);
                }
            }
        }
    }
}

/// Generates, persists, and returns the persona's reply to the user's
/// latest message. The generation context is the most recent window of the
/// conversation, which at this point already ends with that message.
async fn synthesize_persona_reply(
    state: &Arc<AppState>,
    user_id: &str,
    persona: &Persona,
) -> Result<Message, ApiError> {
    let pool = state.pool.clone();
    let user = user_id.to_string();
    let persona_id = persona.persona_id.clone();
    let window = state.policy.context_window as u32;
    let history = tokio::task::spawn_blocking(move || -> Result<Vec<Message>, ApiError> {
        let conn = pool.get().map_err(ApiError::internal)?;
        Ok(get_conversation(&conn, &user, &persona_id, Some(window))?)
    })
    .await
    .map_err(ApiError::internal)??;

    let turns: Vec<ChatTurn> = history
        .into_iter()
        .map(|m| ChatTurn {
            role: if m.sender == persona.persona_id {
                TurnRole::Assistant
            } else {
                TurnRole::User
            },
            content: m.body,
        })
        .collect();

    let reply_text = state
        .generator
        .generate(&persona.persona_prompt, &turns)
        .await?;

    let pool = state.pool.clone();
    let params = CreateMessageParams {
        message_id: Uuid::new_v4().to_string(),
        sender: persona.persona_id.clone(),
        receiver: user_id.to_string(),
        body: reply_text,
    };
    let reply = tokio::task::spawn_blocking(move || -> Result<Message, ApiError> {
        let conn = pool.get().map_err(ApiError::internal)?;
        Ok(create_message(&conn, &params)?)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(reply)
}

async fn handle_history_frame(
    state: &Arc<AppState>,
    user_id: &str,
    with: String,
    limit: Option<u32>,
    tx: &mpsc::Sender<String>,
) {
    if with.trim().is_empty() {
        send_error_frame(tx, &ApiError::validation("history counterpart must not be empty"));
        return;
    }

    let pool = state.pool.clone();
    let user = user_id.to_string();
    let counterpart = with.clone();
    let fetched = tokio::task::spawn_blocking(move || -> Result<Vec<Message>, ApiError> {
        let conn = pool.get().map_err(ApiError::internal)?;
        Ok(get_conversation(&conn, &user, &counterpart, limit)?)
    })
    .await;

    match fetched {
        Ok(Ok(messages)) => {
            send_frame(
                tx,
                &OutgoingFrame::History {
                    with,
                    messages: messages.into_iter().map(WsMessagePayload::from).collect(),
                },
            );
        }
        Ok(Err(err)) => {
            tracing::error!(user = user_id, "failed to load history: {}", err);
            send_error_frame(tx, &err);
        }
        Err(e) => {
            tracing::error!(user = user_id, "history task failed: {}", e);
            send_error_frame(tx, &ApiError::internal(e));
        }
    }
}
