//! Rolling transcript store for voice sessions.
//!
//! One session exists per (user, persona) pair, created on first exchange.
//! Each recorded exchange appends the user turn and the assistant turn,
//! then compacts the session down to the retention cap, so a session holds
//! a bounded window of the most recent entries.

use crate::error::VoiceError;
use kindred_types::TurnRole;
use rusqlite::{params, Connection, Row, TransactionBehavior};
use serde::Serialize;

/// One stored transcript entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TranscriptTurn {
    /// Internal database ID. Also the ordering key within a session.
    pub id: i64,
    /// Who spoke.
    pub role: TurnRole,
    /// What was said.
    pub content: String,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// Returns the most recent `limit` entries for a (user, persona) session,
/// oldest first. A pair with no session yet yields an empty list.
pub fn recent_turns(
    conn: &Connection,
    user_id: &str,
    persona_id: &str,
    limit: usize,
) -> Result<Vec<TranscriptTurn>, VoiceError> {
    let mut stmt = conn.prepare(
        "SELECT id, role, content, created_at FROM (
            SELECT t.id, t.role, t.content, t.created_at
            FROM voice_turns t
            JOIN voice_sessions s ON s.id = t.session_id
            WHERE s.user_id = ?1 AND s.persona_id = ?2
            ORDER BY t.id DESC
            LIMIT ?3
        ) ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(
        params![user_id, persona_id, limit as i64],
        map_row_to_turn,
    )?;
    let mut turns = Vec::new();
    for row in rows {
        turns.push(row?);
    }
    Ok(turns)
}

/// Records one finished exchange and compacts the session to `cap` entries.
///
/// The session upsert, both turn inserts, and the compaction run in a single
/// immediate transaction; a reader never observes a half-recorded exchange.
/// The session's `updated_at` is bumped so idle pruning spares it.
pub fn record_exchange(
    conn: &mut Connection,
    user_id: &str,
    persona_id: &str,
    user_text: &str,
    assistant_text: &str,
    cap: usize,
) -> Result<(), VoiceError> {
    if user_id.trim().is_empty() || persona_id.trim().is_empty() {
        return Err(VoiceError::Validation(
            "user id and persona id must not be empty".into(),
        ));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute(
        "INSERT INTO voice_sessions (user_id, persona_id) VALUES (?1, ?2)
         ON CONFLICT(user_id, persona_id) DO UPDATE SET updated_at = datetime('now')",
        params![user_id, persona_id],
    )?;

    let session_id: i64 = tx.query_row(
        "SELECT id FROM voice_sessions WHERE user_id = ?1 AND persona_id = ?2",
        params![user_id, persona_id],
        |row| row.get(0),
    )?;

    tx.execute(
        "INSERT INTO voice_turns (session_id, role, content) VALUES (?1, 'user', ?2)",
        params![session_id, user_text],
    )?;
    tx.execute(
        "INSERT INTO voice_turns (session_id, role, content) VALUES (?1, 'assistant', ?2)",
        params![session_id, assistant_text],
    )?;

    tx.execute(
        "DELETE FROM voice_turns
         WHERE session_id = ?1
           AND id NOT IN (
               SELECT id FROM voice_turns WHERE session_id = ?1
               ORDER BY id DESC LIMIT ?2
           )",
        params![session_id, cap as i64],
    )?;

    tx.commit()?;
    Ok(())
}

/// Counts the stored entries for a (user, persona) session.
pub fn stored_turn_count(
    conn: &Connection,
    user_id: &str,
    persona_id: &str,
) -> Result<i64, VoiceError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM voice_turns t
         JOIN voice_sessions s ON s.id = t.session_id
         WHERE s.user_id = ?1 AND s.persona_id = ?2",
        params![user_id, persona_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Deletes sessions whose last exchange is older than `idle_days`.
///
/// Turn rows go with their session via the cascade. Returns the number of
/// sessions deleted.
pub fn delete_idle_sessions(conn: &Connection, idle_days: u32) -> Result<usize, VoiceError> {
    let modifier = format!("-{idle_days} days");
    let count = conn.execute(
        "DELETE FROM voice_sessions WHERE updated_at < datetime('now', ?1)",
        [modifier],
    )?;
    Ok(count)
}

fn map_row_to_turn(row: &Row) -> rusqlite::Result<TranscriptTurn> {
    let role_str: String = row.get(1)?;
    let role = TurnRole::from_str(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown turn role: {role_str}").into(),
        )
    })?;

    Ok(TranscriptTurn {
        id: row.get(0)?,
        role,
        content: row.get(2)?,
        created_at: row.get(3)?,
    })
}
