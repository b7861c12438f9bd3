use serde::{Deserialize, Serialize};
use std::fmt;

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Connection settings for the external speech and language services.
///
/// An empty URL means the corresponding service is not configured; the
/// stage that needs it fails with a configuration error at call time, so
/// a text-only deployment can leave the whole section out.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechConfig {
    /// Speech-to-text endpoint (OpenAI-compatible transcription API).
    pub stt_url: String,
    #[serde(skip_serializing)]
    pub stt_api_key: String,

    /// Chat-completions endpoint for reply generation.
    pub llm_url: String,
    #[serde(skip_serializing)]
    pub llm_api_key: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Text-to-speech endpoint; the voice id is appended as a path segment.
    pub tts_url: String,
    #[serde(skip_serializing)]
    pub tts_api_key: String,

    /// Per-request timeout for all three services, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_url: String::new(),
            stt_api_key: String::new(),
            llm_url: String::new(),
            llm_api_key: String::new(),
            llm_model: default_llm_model(),
            tts_url: String::new(),
            tts_api_key: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("stt_url", &self.stt_url)
            .field("stt_api_key", &"[REDACTED]")
            .field("llm_url", &self.llm_url)
            .field("llm_api_key", &"[REDACTED]")
            .field("llm_model", &self.llm_model)
            .field("tts_url", &self.tts_url)
            .field("tts_api_key", &"[REDACTED]")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_keys() {
        let config = SpeechConfig {
            stt_api_key: "sk-very-secret".to_string(),
            llm_api_key: "sk-other-secret".to_string(),
            tts_api_key: "el-third-secret".to_string(),
            ..SpeechConfig::default()
        };

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("other-secret"));
        assert!(!rendered.contains("third-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn serialization_skips_api_keys() {
        let config = SpeechConfig {
            stt_api_key: "sk-very-secret".to_string(),
            ..SpeechConfig::default()
        };

        let json = serde_json::to_string(&config).expect("should serialize");
        assert!(!json.contains("very-secret"));
        assert!(!json.contains("stt_api_key"));
    }

    #[test]
    fn partial_toml_section_uses_defaults() {
        let config: SpeechConfig = toml::from_str(
            "llm_url = \"https://api.example.com/v1/chat/completions\"\nllm_api_key = \"sk-x\"\n",
        )
        .expect("should parse");

        assert_eq!(config.llm_url, "https://api.example.com/v1/chat/completions");
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.stt_url.is_empty());
    }
}
