use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("voice not authorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("speech configuration error: {0}")]
    Config(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("reply generation failed: {0}")]
    Generation(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("ledger error: {0}")]
    Ledger(#[from] kindred_ledger::LedgerError),

    #[error("blocking task failed: {0}")]
    Task(String),
}

impl From<kindred_chat::ChatError> for VoiceError {
    fn from(err: kindred_chat::ChatError) -> Self {
        match err {
            kindred_chat::ChatError::Database(e) => VoiceError::Database(e),
            kindred_chat::ChatError::NotFound(id) => VoiceError::NotFound(id),
            kindred_chat::ChatError::Validation(msg) => VoiceError::Validation(msg),
        }
    }
}
