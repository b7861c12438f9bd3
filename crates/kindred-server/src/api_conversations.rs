//! Conversation history over HTTP.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::Json,
};
use serde::Deserialize;

use kindred_chat::{get_conversation, Message};

use crate::middleware::UserContext;
use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ConversationParams {
    pub limit: Option<u32>,
}

/// GET /api/conversations/{counterpart}/messages
///
/// Returns the most recent window of the conversation between the caller
/// and the counterpart, oldest first. The counterpart may be a user id or
/// a persona id; the store treats both the same.
pub async fn get_conversation_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user_id)): Extension<UserContext>,
    Path(counterpart): Path<String>,
    Query(params): Query<ConversationParams>,
) -> Result<Json<Vec<Message>>, ApiError> {
    if counterpart.trim().is_empty() {
        return Err(ApiError::validation("counterpart must not be empty"));
    }

    let pool = state.pool.clone();
    let messages = tokio::task::spawn_blocking(move || -> Result<Vec<Message>, ApiError> {
        let conn = pool.get().map_err(ApiError::internal)?;
        Ok(get_conversation(&conn, &user_id, &counterpart, params.limit)?)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(messages))
}
