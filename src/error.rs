//! Error types for voice-relay

use thiserror::Error;

/// Result type alias for voice-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voice-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio decoding/encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language model error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Channel error
    #[error("channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Why a voice pipeline run stopped short of delivering a reply
///
/// These are expected outcomes, not faults: every stage converts its own
/// errors into one of these at its boundary. None of them is shown to the
/// end user verbatim (see [`GENERIC_FAILURE_MESSAGE`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum PipelineFailure {
    /// Input audio could not be decoded or the WAV could not be written
    #[error("audio conversion failed")]
    ConversionFailed,

    /// Audio was understood but contained no intelligible speech
    #[error("no speech detected")]
    NoSpeechDetected,

    /// Recognition backend request failed
    #[error("speech service unavailable")]
    ServiceUnavailable,

    /// Text generation returned nothing usable
    #[error("text generation failed")]
    GenerationFailed,

    /// Speech synthesis failed
    #[error("speech synthesis failed")]
    SynthesisFailed,

    /// Anything not covered above
    #[error("unexpected failure")]
    UnexpectedFailure,
}

/// The single message users see when any part of a request fails
pub const GENERIC_FAILURE_MESSAGE: &str =
    "❌ Sorry, I couldn't process your request. Please try again.";
