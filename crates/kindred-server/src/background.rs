//! Periodic maintenance tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use kindred_voice::transcript::delete_idle_sessions;

use crate::AppState;

/// Periodically deletes voice transcripts whose sessions have gone idle.
///
/// `interval_secs` of zero disables the task. Idleness comes from the relay
/// policy: a session counts as idle when its newest entry is older than
/// `voice_session_idle_days`.
pub async fn start_transcript_pruning(state: Arc<AppState>, interval_secs: u64) {
    if interval_secs == 0 {
        tracing::warn!("transcript pruning disabled (interval is 0)");
        return;
    }

    let idle_days = state.policy.voice_session_idle_days;
    let interval = Duration::from_secs(interval_secs);
    tracing::info!(
        interval_secs,
        idle_days,
        "starting voice transcript pruning task"
    );

    loop {
        sleep(interval).await;

        let pool = state.pool.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            delete_idle_sessions(&conn, idle_days).map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(Ok(0)) => {}
            Ok(Ok(deleted)) => tracing::info!(deleted, "pruned idle voice transcripts"),
            Ok(Err(e)) => tracing::error!("transcript pruning failed: {}", e),
            Err(e) => tracing::error!("transcript pruning task panicked: {}", e),
        }
    }
}
