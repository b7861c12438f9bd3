//! Server configuration loading.
//!
//! Reads a TOML file into [`Config`], falling back to defaults for any
//! missing section or field, then applies `KINDRED_*` environment variable
//! overrides. The relay policy and speech collaborator sections deserialize
//! straight into the types the inner crates consume.

use std::net::{IpAddr, Ipv4Addr};

use serde::Deserialize;
use thiserror::Error;

use kindred_types::RelayPolicy;
use kindred_voice::SpeechConfig;

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout applied to every pooled connection, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, e.g. "info" or "kindred_server=debug,info".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON-structured log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Relay behavior knobs: context window, turn cost, starting balance,
    /// body caps, pruning cadence, rate limits.
    pub relay: RelayPolicy,
    /// Endpoints and keys for the transcription, generation, and synthesis
    /// collaborators. An empty URL leaves that stage unconfigured.
    pub speech: SpeechConfig,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "kindred.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `KINDRED_HOST` overrides `server.host`
/// - `KINDRED_PORT` overrides `server.port`
/// - `KINDRED_DB_PATH` overrides `database.path`
/// - `KINDRED_LOG_LEVEL` overrides `logging.level`
/// - `KINDRED_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `KINDRED_STT_URL` / `KINDRED_STT_API_KEY` override the transcriber
/// - `KINDRED_LLM_URL` / `KINDRED_LLM_API_KEY` / `KINDRED_LLM_MODEL`
///   override the reply generator
/// - `KINDRED_TTS_URL` / `KINDRED_TTS_API_KEY` override the synthesizer
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(host) = std::env::var("KINDRED_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("KINDRED_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("KINDRED_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("KINDRED_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("KINDRED_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(url) = std::env::var("KINDRED_STT_URL") {
        config.speech.stt_url = url;
    }
    if let Ok(key) = std::env::var("KINDRED_STT_API_KEY") {
        config.speech.stt_api_key = key;
    }
    if let Ok(url) = std::env::var("KINDRED_LLM_URL") {
        config.speech.llm_url = url;
    }
    if let Ok(key) = std::env::var("KINDRED_LLM_API_KEY") {
        config.speech.llm_api_key = key;
    }
    if let Ok(model) = std::env::var("KINDRED_LLM_MODEL") {
        config.speech.llm_model = model;
    }
    if let Ok(url) = std::env::var("KINDRED_TTS_URL") {
        config.speech.tts_url = url;
    }
    if let Ok(key) = std::env::var("KINDRED_TTS_API_KEY") {
        config.speech.tts_api_key = key;
    }
}
