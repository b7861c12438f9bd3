//! Persona catalog endpoints.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use kindred_chat::{
    create_persona, get_persona, list_personas, ChatError, CreatePersonaParams, Persona,
};

use crate::{ApiError, AppState};

const MAX_PERSONA_ID_LEN: usize = 64;
const MAX_DISPLAY_NAME_LEN: usize = 128;
const MAX_PROMPT_LEN: usize = 8 * 1024;

#[derive(Debug, Deserialize)]
pub struct CreatePersonaRequest {
    pub persona_id: String,
    pub display_name: String,
    pub persona_prompt: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub voice_enabled: bool,
}

/// GET /api/personas
///
/// Lists personas open for conversation. Retired ones are omitted.
pub async fn list_personas_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Persona>>, ApiError> {
    let pool = state.pool.clone();
    let personas = tokio::task::spawn_blocking(move || -> Result<Vec<Persona>, ApiError> {
        let conn = pool.get().map_err(ApiError::internal)?;
        Ok(list_personas(&conn)?)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(personas))
}

/// GET /api/personas/{persona_id}
///
/// Fetches one persona by id, retired or not.
pub async fn get_persona_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(persona_id): Path<String>,
) -> Result<Json<Persona>, ApiError> {
    let pool = state.pool.clone();
    let persona = tokio::task::spawn_blocking(move || -> Result<Persona, ApiError> {
        let conn = pool.get().map_err(ApiError::internal)?;
        Ok(get_persona(&conn, &persona_id)?)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(persona))
}

/// POST /api/personas
///
/// Registers a persona. Ids are immutable once taken; reusing one is a
/// conflict, not an upsert.
pub async fn create_persona_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CreatePersonaRequest>,
) -> Result<Json<Value>, ApiError> {
    let persona_id = req.persona_id.trim().to_string();
    if persona_id.is_empty() || persona_id.len() > MAX_PERSONA_ID_LEN {
        return Err(ApiError::validation(format!(
            "persona_id must be 1..={} characters",
            MAX_PERSONA_ID_LEN
        )));
    }
    if req.display_name.trim().is_empty() || req.display_name.len() > MAX_DISPLAY_NAME_LEN {
        return Err(ApiError::validation(format!(
            "display_name must be 1..={} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    if req.persona_prompt.trim().is_empty() || req.persona_prompt.len() > MAX_PROMPT_LEN {
        return Err(ApiError::validation(format!(
            "persona_prompt must be 1..={} characters",
            MAX_PROMPT_LEN
        )));
    }

    let pool = state.pool.clone();
    let params = CreatePersonaParams {
        persona_id,
        display_name: req.display_name,
        persona_prompt: req.persona_prompt,
        voice_id: req.voice_id,
        voice_enabled: req.voice_enabled,
    };
    let persona = tokio::task::spawn_blocking(move || -> Result<Persona, ApiError> {
        let conn = pool.get().map_err(ApiError::internal)?;
        create_persona(&conn, &params).map_err(|e| match e {
            // A taken id surfaces as a unique constraint violation.
            ChatError::Database(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ffi::ErrorCode::ConstraintViolation =>
            {
                ApiError::new(StatusCode::CONFLICT, "conflict", "persona id already exists")
            }
            other => other.into(),
        })
    })
    .await
    .map_err(ApiError::internal)??;

    tracing::info!(persona = %persona.persona_id, "registered persona");
    Ok(Json(json!({ "status": "created", "persona_id": persona.persona_id })))
}
