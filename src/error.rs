use thiserror::Error;

/// Failures that abort session start or break the live connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Token endpoint unreachable, non-200, or missing `client_secret.value`
    #[error("Credential error: {0}")]
    Credential(String),

    /// Microphone capture could not be started
    #[error("Microphone permission error: {0}")]
    MediaPermission(String),

    /// Non-2xx signaling response, malformed answer, or peer negotiation failure
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Data channel reported an error after the session went live
    #[error("Channel error: {0}")]
    Channel(String),

    /// Stop was requested while the connection was still being negotiated
    #[error("Session start cancelled")]
    Cancelled,
}

/// Speech-to-text failures reported by the remote agent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionError {
    /// Remote throttling (HTTP 429); recovered locally with a cooldown
    #[error("Transcription rate limited: {0}")]
    RateLimited(String),

    #[error("Transcription failed: {0}")]
    Generic(String),
}

impl TranscriptionError {
    /// Classify a `transcription.failed` error message
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("429") {
            Self::RateLimited(message)
        } else {
            Self::Generic(message)
        }
    }
}

/// Conversation or symptom save failures. Logged, never propagated to callers.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Persistence endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;
