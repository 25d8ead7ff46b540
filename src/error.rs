//! Error types for voice-chatter

use thiserror::Error;

/// Result type alias for voice-chatter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voice-chatter
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text generation error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Authentication/authorization error
    #[error("auth error: {0}")]
    Auth(String),

    /// Connection dropped or write failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected protocol message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Session state machine violation
    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: crate::session::SessionState,
        to: crate::session::SessionState,
    },

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

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}
