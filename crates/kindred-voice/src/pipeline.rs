//! The staged voice turn pipeline.
//!
//! Stage order: authorize, charge, transcribe, generate, synthesize, record.
//! The charge lands before any external service is involved; every later
//! failure except synthesis refunds it. Synthesis failure degrades the turn
//! to text: the reply is still recorded and the charge stands, because the
//! exchange itself succeeded.

use crate::error::VoiceError;
use crate::generate::{ChatTurn, ReplyGenerator};
use crate::stt::Transcriber;
use crate::transcript;
use crate::tts::SpeechSynthesizer;
use kindred_chat::Persona;
use kindred_db::DbPool;
use kindred_types::{RelayPolicy, TransactionKind, TurnRole};
use serde_json::json;
use std::sync::Arc;

/// One fully processed voice exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// What the user said, per the transcription service.
    pub transcript: String,
    /// The persona's reply text.
    pub reply_text: String,
    /// The reply rendered to audio, when synthesis succeeded.
    pub reply_audio: Option<Vec<u8>>,
    /// Why synthesis failed, when it did.
    pub synthesis_error: Option<String>,
    /// Wallet balance after the turn charge.
    pub balance: i64,
}

/// Tagged result of the synthesis stage. Failure here is data, not an
/// error: the turn still completes as text.
enum SynthesisOutcome {
    Audio(Vec<u8>),
    Failed(String),
}

/// Drives one audio clip through the full turn pipeline.
pub struct TurnPipeline {
    pool: DbPool,
    policy: RelayPolicy,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl TurnPipeline {
    pub fn new(
        pool: DbPool,
        policy: RelayPolicy,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            pool,
            policy,
            transcriber,
            generator,
            synthesizer,
        }
    }

    /// Processes one voice turn for `user_id` against `persona_id`.
    pub async fn run(
        &self,
        user_id: &str,
        persona_id: &str,
        audio: Vec<u8>,
        content_type: &str,
    ) -> Result<TurnOutcome, VoiceError> {
        if user_id.trim().is_empty() {
            return Err(VoiceError::Unauthorized("missing user identity".into()));
        }
        if audio.is_empty() {
            return Err(VoiceError::Validation("audio body must not be empty".into()));
        }
        if audio.len() > self.policy.max_audio_bytes {
            return Err(VoiceError::Validation(format!(
                "audio exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                self.policy.max_audio_bytes
            )));
        }

        // 1. Authorize: the persona must exist, be active, and speak.
        let persona = self.authorize(persona_id).await?;
        let voice_id = persona
            .voice_id
            .clone()
            .unwrap_or_else(|| "default".to_string());

        // 2. Charge up front, before any external service is called.
        let balance = self.charge(user_id, persona_id).await?;

        // 3. Transcribe.
        let transcript_text = match self.transcriber.transcribe(&audio, content_type).await {
            Ok(text) if text.is_empty() => {
                let cause =
                    VoiceError::Transcription("transcription produced no text".to_string());
                return Err(self.refund_after_failure(user_id, persona_id, cause).await);
            }
            Ok(text) => text,
            Err(cause) => {
                return Err(self.refund_after_failure(user_id, persona_id, cause).await)
            }
        };

        // 4. Generate from the bounded rolling context plus the new turn.
        let mut turns = match self.context(user_id, persona_id).await {
            Ok(turns) => turns,
            Err(cause) => {
                return Err(self.refund_after_failure(user_id, persona_id, cause).await)
            }
        };
        turns.push(ChatTurn {
            role: TurnRole::User,
            content: transcript_text.clone(),
        });

        let reply_text = match self.generator.generate(&persona.persona_prompt, &turns).await {
            Ok(reply) => reply,
            Err(cause) => {
                return Err(self.refund_after_failure(user_id, persona_id, cause).await)
            }
        };

        // 5. Synthesize. Failure is tolerated; the turn completes as text.
        let synthesis = match self.synthesizer.synthesize(&reply_text, &voice_id).await {
            Ok(audio) => SynthesisOutcome::Audio(audio),
            Err(e) => {
                tracing::warn!(
                    user = user_id,
                    persona = persona_id,
                    error = %e,
                    "speech synthesis failed, completing turn as text"
                );
                SynthesisOutcome::Failed(e.to_string())
            }
        };

        // 6. Record both sides and compact the session.
        if let Err(cause) = self
            .record(user_id, persona_id, &transcript_text, &reply_text)
            .await
        {
            return Err(self.refund_after_failure(user_id, persona_id, cause).await);
        }

        let (reply_audio, synthesis_error) = match synthesis {
            SynthesisOutcome::Audio(audio) => (Some(audio), None),
            SynthesisOutcome::Failed(reason) => (None, Some(reason)),
        };

        Ok(TurnOutcome {
            transcript: transcript_text,
            reply_text,
            reply_audio,
            synthesis_error,
            balance,
        })
    }

    async fn authorize(&self, persona_id: &str) -> Result<Persona, VoiceError> {
        let pool = self.pool.clone();
        let id = persona_id.to_string();

        let persona = tokio::task::spawn_blocking(
            move || -> Result<Option<Persona>, VoiceError> {
                let conn = pool.get()?;
                Ok(kindred_chat::find_persona(&conn, &id)?)
            },
        )
        .await
        .map_err(|e| VoiceError::Task(e.to_string()))??;

        let persona =
            persona.ok_or_else(|| VoiceError::NotFound(persona_id.to_string()))?;
        if !persona.active {
            return Err(VoiceError::Unauthorized(format!(
                "persona {persona_id} is retired"
            )));
        }
        if !persona.voice_enabled {
            return Err(VoiceError::Unauthorized(format!(
                "voice is not enabled for persona {persona_id}"
            )));
        }
        Ok(persona)
    }

    /// Deducts the per-turn cost and returns the remaining balance. A zero
    /// cost skips the ledger write but still materializes the wallet.
    async fn charge(&self, user_id: &str, persona_id: &str) -> Result<i64, VoiceError> {
        let pool = self.pool.clone();
        let user = user_id.to_string();
        let persona = persona_id.to_string();
        let cost = self.policy.voice_turn_cost;
        let starting_balance = self.policy.starting_balance;

        let balance = tokio::task::spawn_blocking(move || -> Result<i64, VoiceError> {
            let mut conn = pool.get()?;
            if cost > 0 {
                let (wallet, _) = kindred_ledger::deduct(
                    &mut conn,
                    &user,
                    cost,
                    "voice turn",
                    Some(&json!({ "persona_id": persona })),
                    starting_balance,
                )?;
                Ok(wallet.balance)
            } else {
                let wallet =
                    kindred_ledger::get_or_create_wallet(&mut conn, &user, starting_balance)?;
                Ok(wallet.balance)
            }
        })
        .await
        .map_err(|e| VoiceError::Task(e.to_string()))??;

        Ok(balance)
    }

    /// Returns the turn charge after a post-charge stage failed, then hands
    /// the original cause back to the caller. A refund failure is logged
    /// rather than surfaced; the cause is what the user needs to see.
    async fn refund_after_failure(
        &self,
        user_id: &str,
        persona_id: &str,
        cause: VoiceError,
    ) -> VoiceError {
        let cost = self.policy.voice_turn_cost;
        if cost <= 0 {
            return cause;
        }

        let pool = self.pool.clone();
        let user = user_id.to_string();
        let persona = persona_id.to_string();
        let starting_balance = self.policy.starting_balance;

        let refunded = tokio::task::spawn_blocking(move || -> Result<(), VoiceError> {
            let mut conn = pool.get()?;
            kindred_ledger::credit(
                &mut conn,
                &user,
                cost,
                TransactionKind::Refund,
                "voice turn refund",
                None,
                Some(&json!({ "persona_id": persona })),
                starting_balance,
            )?;
            Ok(())
        })
        .await;

        match refunded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    user = user_id,
                    persona = persona_id,
                    error = %e,
                    "failed to refund voice turn charge"
                );
            }
            Err(e) => {
                tracing::error!(
                    user = user_id,
                    persona = persona_id,
                    error = %e,
                    "refund task failed"
                );
            }
        }

        cause
    }

    /// Loads the most recent transcript entries for the pair, bounded by the
    /// context window.
    async fn context(&self, user_id: &str, persona_id: &str) -> Result<Vec<ChatTurn>, VoiceError> {
        let pool = self.pool.clone();
        let user = user_id.to_string();
        let persona = persona_id.to_string();
        let window = self.policy.context_window;

        let turns = tokio::task::spawn_blocking(move || -> Result<Vec<ChatTurn>, VoiceError> {
            let conn = pool.get()?;
            let stored = transcript::recent_turns(&conn, &user, &persona, window)?;
            Ok(stored
                .into_iter()
                .map(|t| ChatTurn {
                    role: t.role,
                    content: t.content,
                })
                .collect())
        })
        .await
        .map_err(|e| VoiceError::Task(e.to_string()))??;

        Ok(turns)
    }

    async fn record(
        &self,
        user_id: &str,
        persona_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<(), VoiceError> {
        let pool = self.pool.clone();
        let user = user_id.to_string();
        let persona = persona_id.to_string();
        let user_text = user_text.to_string();
        let assistant_text = assistant_text.to_string();
        let cap = self.policy.transcript_cap();

        tokio::task::spawn_blocking(move || -> Result<(), VoiceError> {
            let mut conn = pool.get()?;
            transcript::record_exchange(&mut conn, &user, &persona, &user_text, &assistant_text, cap)
        })
        .await
        .map_err(|e| VoiceError::Task(e.to_string()))??;

        Ok(())
    }
}
