//! Voice session broker for the Kindred platform.
//!
//! Turns one uploaded audio clip into one finished exchange: authorize the
//! persona, charge the wallet, transcribe the clip, generate a reply from
//! the rolling transcript, synthesize the reply, and record both sides.
//!
//! The external collaborators (speech-to-text, reply generation,
//! text-to-speech) sit behind traits so the pipeline can be driven by HTTP
//! services in production and by stubs in tests. Synthesis is the one stage
//! allowed to fail without failing the turn; everything after the charge
//! refunds it on failure.

pub mod config;
pub mod error;
pub mod generate;
pub mod pipeline;
pub mod stt;
pub mod transcript;
pub mod tts;

pub use config::SpeechConfig;
pub use error::VoiceError;
pub use generate::{ChatTurn, HttpReplyGenerator, ReplyGenerator};
pub use pipeline::{TurnOutcome, TurnPipeline};
pub use stt::{HttpTranscriber, Transcriber};
pub use tts::{HttpSynthesizer, SpeechSynthesizer};
