//! Error types for the companion audio core

use thiserror::Error;

/// Result type alias for companion audio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the audio core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed incoming audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Self::Decode(err.to_string())
    }
}
