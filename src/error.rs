//! Error types for vaani.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaaniError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio output failed: {message}")]
    AudioOutput { message: String },

    // Codec errors
    #[error("Audio codec error: {message}")]
    Codec { message: String },

    // Session errors
    #[error("Microphone access denied: {message}")]
    Permission { message: String },

    #[error("Connection to the live session failed: {message}")]
    Connection { message: String },

    #[error("Failed to release {resource}: {message}")]
    Cleanup { resource: String, message: String },

    #[error("Cannot {operation} while session is {state}")]
    InvalidState { operation: String, state: String },

    #[error("Unknown persona: {id}")]
    PersonaNotFound { id: String },

    // Wire protocol errors
    #[error("Live protocol error: {message}")]
    Protocol { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl VaaniError {
    /// Whether this error should be shown to the person using the client.
    ///
    /// Only microphone permission and connectivity failures are surfaced;
    /// everything else is internal bookkeeping that gets logged.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            VaaniError::Permission { .. } | VaaniError::Connection { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VaaniError>;
