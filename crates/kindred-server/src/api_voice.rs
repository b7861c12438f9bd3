//! Voice turn submission over HTTP.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::{header, HeaderMap},
    response::Json,
};
use base64::Engine;
use serde::Serialize;

use crate::api_ws::{push_frame, OutgoingFrame};
use crate::middleware::UserContext;
use crate::{ApiError, AppState};

/// A completed voice turn. The reply audio is base64 so the whole turn fits
/// in one JSON document; it is null when synthesis failed and the turn fell
/// back to text.
#[derive(Debug, Serialize)]
pub struct VoiceTurnResponse {
    pub transcript: String,
    pub reply_text: String,
    pub reply_audio: Option<String>,
    pub synthesis_error: Option<String>,
    pub balance: i64,
}

/// POST /api/voice/{persona_id}/turn
///
/// The request body is the raw recorded audio; the content type tells the
/// transcriber which container it got. The pipeline authorizes, charges,
/// and runs the speech stages; any failure after the charge is refunded
/// before the error surfaces here.
pub async fn submit_turn_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user_id)): Extension<UserContext>,
    Path(persona_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VoiceTurnResponse>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let outcome = state
        .pipeline
        .run(&user_id, &persona_id, body.to_vec(), &content_type)
        .await?;

    // Mirror the exchange onto the caller's live sessions so an open chat
    // view stays current. The audio itself only travels in the response.
    let frame = OutgoingFrame::VoiceTurn {
        persona: persona_id,
        transcript: outcome.transcript.clone(),
        reply_text: outcome.reply_text.clone(),
    };
    push_frame(&state.connection_manager, &user_id, &frame).await;

    let reply_audio = outcome
        .reply_audio
        .map(|audio| base64::engine::general_purpose::STANDARD.encode(audio));

    Ok(Json(VoiceTurnResponse {
        transcript: outcome.transcript,
        reply_text: outcome.reply_text,
        reply_audio,
        synthesis_error: outcome.synthesis_error,
        balance: outcome.balance,
    }))
}
