//! Request throttling tests against the full middleware stack.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use kindred_db::DbRuntimeSettings;
use kindred_server::api_ws::ConnectionManager;
use kindred_server::middleware::RateLimiter;
use kindred_server::{app, AppState};
use kindred_types::{RateLimitConfig, RelayPolicy};
use kindred_voice::{
    ChatTurn, ReplyGenerator, SpeechSynthesizer, Transcriber, TurnPipeline, VoiceError,
};

struct OfflineTranscriber;

#[async_trait]
impl Transcriber for OfflineTranscriber {
    async fn transcribe(&self, _audio: &[u8], _content_type: &str) -> Result<String, VoiceError> {
        Err(VoiceError::Transcription("no transcriber in this test".into()))
    }
}

struct OfflineGenerator;

#[async_trait]
impl ReplyGenerator for OfflineGenerator {
    async fn generate(
        &self,
        _system_prompt: &str,
        _turns: &[ChatTurn],
    ) -> Result<String, VoiceError> {
        Err(VoiceError::Generation("no generator in this test".into()))
    }
}

struct OfflineSynthesizer;

#[async_trait]
impl SpeechSynthesizer for OfflineSynthesizer {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> Result<Vec<u8>, VoiceError> {
        Err(VoiceError::Synthesis("no synthesizer in this test".into()))
    }
}

fn test_state() -> (AppState, TempDir) {
    let dir = tempfile::tempdir().expect("create tempdir");
    let db_path = dir.path().join("kindred.db");
    let pool = kindred_db::create_pool(
        db_path.to_str().expect("utf8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("create pool");
    {
        let conn = pool.get().expect("checkout connection");
        kindred_db::run_migrations(&conn).expect("run migrations");
    }

    let policy = RelayPolicy {
        rate_limit: RateLimitConfig {
            voice_limit: 2,
            default_limit: 5,
        },
        ..RelayPolicy::default()
    };
    let generator: Arc<dyn ReplyGenerator> = Arc::new(OfflineGenerator);
    let pipeline = Arc::new(TurnPipeline::new(
        pool.clone(),
        policy.clone(),
        Arc::new(OfflineTranscriber),
        generator.clone(),
        Arc::new(OfflineSynthesizer),
    ));

    let state = AppState {
        pool,
        policy: Arc::new(policy),
        rate_limiter: RateLimiter::new(),
        connection_manager: ConnectionManager::new(),
        generator,
        pipeline,
    };
    (state, dir)
}

async fn request_from(
    app: &Router,
    method: &str,
    uri: &str,
    ip: [u8; 4],
    user: Option<&str>,
) -> axum::response::Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-Kindred-User", user);
    }
    let mut request = builder.body(Body::empty()).expect("build request");
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
    app.clone().oneshot(request).await.expect("send request")
}

#[tokio::test]
async fn requests_over_the_window_budget_are_rejected() {
    let (state, _dir) = test_state();
    let app = app(state);

    for _ in 0..5 {
        let response = request_from(&app, "GET", "/health", [10, 0, 0, 1], None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = request_from(&app, "GET", "/health", [10, 0, 0, 1], None).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response
        .headers()
        .get("Retry-After")
        .expect("retry-after header");
    assert_eq!(retry_after, "60");
}

#[tokio::test]
async fn voice_turns_use_the_tighter_budget() {
    let (state, _dir) = test_state();
    let app = app(state);

    // The first two clear the limiter and die later, on the missing persona.
    for _ in 0..2 {
        let response = request_from(
            &app,
            "POST",
            "/api/voice/ghost/turn",
            [10, 0, 0, 7],
            Some("ana"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let response = request_from(
        &app,
        "POST",
        "/api/voice/ghost/turn",
        [10, 0, 0, 7],
        Some("ana"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn separate_clients_have_separate_budgets() {
    let (state, _dir) = test_state();
    let app = app(state);

    for _ in 0..6 {
        let _ = request_from(&app, "GET", "/health", [10, 0, 0, 1], None).await;
    }
    let throttled = request_from(&app, "GET", "/health", [10, 0, 0, 1], None).await;
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);

    let fresh = request_from(&app, "GET", "/health", [10, 0, 0, 2], None).await;
    assert_eq!(fresh.status(), StatusCode::OK);
}
