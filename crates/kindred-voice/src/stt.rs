use crate::config::SpeechConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Maximum audio input size for transcription (10 MiB). Prevents OOM from
/// oversized payloads.
pub const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Converts one audio clip to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], content_type: &str) -> Result<String, VoiceError>;
}

/// `Transcriber` backed by an OpenAI-compatible transcription endpoint
/// (multipart upload with a `file` part and a `model` field).
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpTranscriber {
    pub fn from_config(config: &SpeechConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            url: config.stt_url.clone(),
            api_key: config.stt_api_key.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8], content_type: &str) -> Result<String, VoiceError> {
        if self.url.is_empty() {
            return Err(VoiceError::Config(
                "stt_url is not configured; set [speech].stt_url or KINDRED_STT_URL".to_string(),
            ));
        }
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Validation(format!(
                "audio exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("turn.audio")
            .mime_str(content_type)
            .map_err(|e| VoiceError::Validation(format!("invalid audio content type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", "whisper-1");

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Transcription(format!("transcription request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(VoiceError::Transcription(format!(
                "transcription service returned {status}: {body_text}"
            )));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Transcription(format!("failed to parse transcription: {e}")))?;

        Ok(parsed.text.trim().to_string())
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}
