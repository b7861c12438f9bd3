//! Kindred relay server binary.
//!
//! Starts the axum application with structured logging, database
//! initialization, the transcript pruning task, and graceful shutdown on
//! SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use kindred_server::api_ws::ConnectionManager;
use kindred_server::middleware::RateLimiter;
use kindred_server::{app, background, config, AppState};
use kindred_voice::{
    HttpReplyGenerator, HttpSynthesizer, HttpTranscriber, ReplyGenerator, TurnPipeline,
};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("KINDRED_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = kindred_db::create_pool(
        &config.database.path,
        kindred_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool; check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = kindred_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let transcriber =
        Arc::new(HttpTranscriber::from_config(&config.speech).expect("failed to build transcriber"));
    let generator: Arc<dyn ReplyGenerator> = Arc::new(
        HttpReplyGenerator::from_config(&config.speech).expect("failed to build reply generator"),
    );
    let synthesizer = Arc::new(
        HttpSynthesizer::from_config(&config.speech).expect("failed to build speech synthesizer"),
    );

    let pipeline = Arc::new(TurnPipeline::new(
        pool.clone(),
        config.relay.clone(),
        transcriber,
        generator.clone(),
        synthesizer,
    ));

    let state = AppState {
        pool,
        policy: Arc::new(config.relay.clone()),
        rate_limiter: RateLimiter::new(),
        connection_manager: ConnectionManager::new(),
        generator,
        pipeline,
    };

    tokio::spawn(background::start_transcript_pruning(
        Arc::new(state.clone()),
        config.relay.prune_interval_secs,
    ));

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting kindred relay");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("kindred relay shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
