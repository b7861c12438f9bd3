//! Persona catalog and conversation persistence for the Kindred relay.
//!
//! Implements the persona store (the AI companions a user can talk to) and
//! the message store backing the websocket relay. Conversations are flat
//! (sender, receiver) pairs; a participant id is either a user id or a
//! persona id, and the relay decides which by looking the receiver up here.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during persona and message operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// An AI persona registered on this relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID for the persona (e.g. "mia").
    pub persona_id: String,
    /// Display name shown to users.
    pub display_name: String,
    /// System prompt used for reply generation.
    pub persona_prompt: String,
    /// Synthesis voice for this persona, if voice is enabled.
    pub voice_id: Option<String>,
    /// Whether this persona accepts voice turns.
    pub voice_enabled: bool,
    /// Inactive personas are hidden and refuse new activity.
    pub active: bool,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// Parameters for registering a new persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePersonaParams {
    pub persona_id: String,
    pub display_name: String,
    pub persona_prompt: String,
    pub voice_id: Option<String>,
    pub voice_enabled: bool,
}

/// Registers a new persona.
pub fn create_persona(
    conn: &Connection,
    params: &CreatePersonaParams,
) -> Result<Persona, ChatError> {
    if params.persona_id.trim().is_empty() {
        return Err(ChatError::Validation("persona id must not be empty".into()));
    }
    if params.display_name.trim().is_empty() {
        return Err(ChatError::Validation(
            "persona display name must not be empty".into(),
        ));
    }
    if params.persona_prompt.trim().is_empty() {
        return Err(ChatError::Validation(
            "persona prompt must not be empty".into(),
        ));
    }

    let persona = conn.query_row(
        "INSERT INTO personas (persona_id, display_name, persona_prompt, voice_id, voice_enabled)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING id, persona_id, display_name, persona_prompt, voice_id, voice_enabled, active, created_at",
        params![
            params.persona_id,
            params.display_name,
            params.persona_prompt,
            params.voice_id,
            params.voice_enabled,
        ],
        map_row_to_persona,
    )?;

    Ok(persona)
}

/// Retrieves a persona by its public ID.
pub fn get_persona(conn: &Connection, persona_id: &str) -> Result<Persona, ChatError> {
    find_persona(conn, persona_id)?.ok_or_else(|| ChatError::NotFound(persona_id.to_string()))
}

/// Looks up a persona by its public ID, returning `None` when absent.
///
/// The relay uses this to classify message receivers: a hit means the
/// counterpart is a persona, a miss means it is (presumed) human.
pub fn find_persona(conn: &Connection, persona_id: &str) -> Result<Option<Persona>, ChatError> {
    let persona = conn
        .query_row(
            "SELECT id, persona_id, display_name, persona_prompt, voice_id, voice_enabled, active, created_at
             FROM personas WHERE persona_id = ?1",
            [persona_id],
            map_row_to_persona,
        )
        .optional()?;
    Ok(persona)
}

/// Lists all active personas, ordered by display name.
pub fn list_personas(conn: &Connection) -> Result<Vec<Persona>, ChatError> {
    let mut stmt = conn.prepare(
        "SELECT id, persona_id, display_name, persona_prompt, voice_id, voice_enabled, active, created_at
         FROM personas WHERE active = 1 ORDER BY display_name ASC",
    )?;

    let rows = stmt.query_map([], map_row_to_persona)?;
    let mut personas = Vec::new();
    for row in rows {
        personas.push(row?);
    }
    Ok(personas)
}

/// Activates or retires a persona.
///
/// Retired personas stop appearing in listings and refuse voice turns, but
/// their conversation history stays readable.
pub fn set_persona_active(
    conn: &Connection,
    persona_id: &str,
    active: bool,
) -> Result<(), ChatError> {
    let count = conn.execute(
        "UPDATE personas SET active = ?1 WHERE persona_id = ?2",
        params![active, persona_id],
    )?;
    if count == 0 {
        return Err(ChatError::NotFound(persona_id.to_string()));
    }
    Ok(())
}

fn map_row_to_persona(row: &Row) -> rusqlite::Result<Persona> {
    Ok(Persona {
        id: row.get(0)?,
        persona_id: row.get(1)?,
        display_name: row.get(2)?,
        persona_prompt: row.get(3)?,
        voice_id: row.get(4)?,
        voice_enabled: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// A relayed conversation message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID of the message.
    pub message_id: String,
    /// Participant id of the sender.
    pub sender: String,
    /// Participant id of the receiver.
    pub receiver: String,
    /// Message text.
    pub body: String,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// Parameters for persisting a new message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageParams {
    pub message_id: String,
    pub sender: String,
    pub receiver: String,
    pub body: String,
}

/// Persists a new message and returns the stored row.
pub fn create_message(conn: &Connection, params: &CreateMessageParams) -> Result<Message, ChatError> {
    if params.sender.trim().is_empty() {
        return Err(ChatError::Validation("sender must not be empty".into()));
    }
    if params.receiver.trim().is_empty() {
        return Err(ChatError::Validation("receiver must not be empty".into()));
    }
    if params.body.is_empty() {
        return Err(ChatError::Validation(
            "message body must not be empty".into(),
        ));
    }

    let message = conn.query_row(
        "INSERT INTO messages (message_id, sender, receiver, body)
         VALUES (?1, ?2, ?3, ?4)
         RETURNING id, message_id, sender, receiver, body, created_at",
        params![
            params.message_id,
            params.sender,
            params.receiver,
            params.body,
        ],
        map_row_to_message,
    )?;

    Ok(message)
}

/// Retrieves the conversation window between two participants.
///
/// Returns the most recent `limit` messages exchanged in either direction,
/// ordered oldest first so the caller can render or replay them directly.
/// `limit` defaults to 50 and is capped at 200.
pub fn get_conversation(
    conn: &Connection,
    participant_a: &str,
    participant_b: &str,
    limit: Option<u32>,
) -> Result<Vec<Message>, ChatError> {
    let limit = limit.unwrap_or(50).min(200);

    let mut stmt = conn.prepare(
        "SELECT id, message_id, sender, receiver, body, created_at FROM (
            SELECT id, message_id, sender, receiver, body, created_at
            FROM messages
            WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
        ) ORDER BY created_at ASC, id ASC",
    )?;

    let rows = stmt.query_map(
        params![participant_a, participant_b, limit],
        map_row_to_message,
    )?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn map_row_to_message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        message_id: row.get(1)?,
        sender: row.get(2)?,
        receiver: row.get(3)?,
        body: row.get(4)?,
        created_at: row.get(5)?,
    })
}
