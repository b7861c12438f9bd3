//! HTTP and websocket surface of the Kindred relay.
//!
//! Wires the persona catalog, the conversation relay, the voice turn
//! pipeline, and the wallet ledger into a single axum application.
//! Handlers stay thin: they validate, hop to the blocking pool for SQLite
//! work, and translate domain errors into the wire taxonomy.

pub mod api_conversations;
pub mod api_personas;
pub mod api_voice;
pub mod api_wallet;
pub mod api_ws;
pub mod background;
pub mod config;
pub mod middleware;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use kindred_chat::ChatError;
use kindred_db::DbPool;
use kindred_ledger::LedgerError;
use kindred_types::RelayPolicy;
use kindred_voice::{ReplyGenerator, TurnPipeline, VoiceError};

use api_ws::ConnectionManager;
use middleware::RateLimiter;

/// Body cap for the ordinary JSON routes. Voice turn uploads get their own
/// limit from the relay policy when the router is built.
const MAX_JSON_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state, injected into handlers via `Extension`.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub policy: Arc<RelayPolicy>,
    pub rate_limiter: RateLimiter,
    pub connection_manager: ConnectionManager,
    /// Reply generator for text chat with personas. The voice pipeline
    /// holds its own clone.
    pub generator: Arc<dyn ReplyGenerator>,
    pub pipeline: Arc<TurnPipeline>,
}

/// A failure translated onto the wire.
///
/// Carries the HTTP status plus a stable machine-readable reason so clients
/// can branch without parsing prose. Websocket error frames reuse the same
/// reason strings, so insufficient funds looks the same on both surfaces.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    reason: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.reason, "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, "not_found", msg),
            ChatError::Validation(msg) => Self::validation(msg),
            ChatError::Database(e) => {
                tracing::error!("chat store failure: {}", e);
                Self::internal(e)
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds { needed, available } => Self::new(
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_funds",
                format!("needed {} coins, only {} available", needed, available),
            ),
            LedgerError::Validation(msg) => Self::validation(msg),
            LedgerError::Database(e) => {
                tracing::error!("ledger failure: {}", e);
                Self::internal(e)
            }
            LedgerError::Json(e) => Self::internal(e),
        }
    }
}

impl From<VoiceError> for ApiError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::Unauthorized(msg) => Self::new(StatusCode::UNAUTHORIZED, "unauthorized", msg),
            VoiceError::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, "not_found", msg),
            VoiceError::Validation(msg) => Self::validation(msg),
            VoiceError::Config(msg) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "missing_configuration", msg)
            }
            VoiceError::Transcription(msg)
            | VoiceError::Generation(msg)
            | VoiceError::Synthesis(msg) => Self::new(StatusCode::BAD_GATEWAY, "upstream", msg),
            VoiceError::Ledger(inner) => inner.into(),
            VoiceError::Database(e) => {
                tracing::error!("voice store failure: {}", e);
                Self::internal(e)
            }
            VoiceError::Pool(e) => Self::internal(e),
            VoiceError::Task(msg) => Self::internal(msg),
        }
    }
}

/// Health check handler.
///
/// Reports the number of users holding at least one live websocket session
/// so operators can watch connection churn from the probe alone.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let connected_users = state.connection_manager.connected_users().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connected_users": connected_users,
    }))
}

/// Builds the application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/api/conversations/{counterpart}/messages",
            get(api_conversations::get_conversation_handler),
        )
        .route(
            "/api/personas",
            get(api_personas::list_personas_handler).post(api_personas::create_persona_handler),
        )
        .route("/api/personas/{persona_id}", get(api_personas::get_persona_handler))
        .route("/api/wallet", get(api_wallet::get_wallet_handler))
        .route("/api/wallet/history", get(api_wallet::wallet_history_handler))
        .route("/api/wallet/deduct", post(api_wallet::deduct_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    // Voice turns upload raw audio, so they carry a larger body cap than
    // the JSON routes.
    let voice_routes = Router::new()
        .route("/api/voice/{persona_id}/turn", post(api_voice::submit_turn_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware))
        .layer(DefaultBodyLimit::max(state.policy.max_audio_bytes));

    Router::new()
        .route("/health", get(health))
        // The payment provider calls this one; it cannot present a user
        // identity, so it stays outside the auth group.
        .route("/api/payments/completed", post(api_wallet::payment_completed_handler))
        .merge(protected_routes)
        .merge(voice_routes)
        // Browsers cannot set headers on websocket upgrades; /ws
        // authenticates from the query string inside the handler.
        .route("/ws", get(api_ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_JSON_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
