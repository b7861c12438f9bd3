use crate::config::SpeechConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Maximum text input size for synthesis (64 KiB). Prevents resource
/// exhaustion from oversized synthesis requests.
pub const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Renders reply text to audio in the persona's voice.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, VoiceError>;
}

/// `SpeechSynthesizer` backed by an HTTP voice service. The voice id is
/// appended to the endpoint path and the key travels in the `xi-api-key`
/// header, matching the common hosted-voice API shape.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpSynthesizer {
    pub fn from_config(config: &SpeechConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            url: config.tts_url.clone(),
            api_key: config.tts_api_key.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, VoiceError> {
        if self.url.is_empty() {
            return Err(VoiceError::Config(
                "tts_url is not configured; set [speech].tts_url or KINDRED_TTS_URL".to_string(),
            ));
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let endpoint = format!("{}/{}", self.url.trim_end_matches('/'), voice_id);
        let response = self
            .client
            .post(&endpoint)
            .header("xi-api-key", &self.api_key)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("synthesis request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "synthesis service returned {status}: {body_text}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to read synthesis body: {e}")))?;

        if audio.is_empty() {
            return Err(VoiceError::Synthesis(
                "synthesis service returned no audio".to_string(),
            ));
        }

        Ok(audio.to_vec())
    }
}
