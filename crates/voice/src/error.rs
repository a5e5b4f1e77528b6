//! Error taxonomy for the voice pipeline.
//!
//! Only attempt-fatal conditions live here. Locally recovered failures
//! (a chunk that fails to decode, an unknown tool, a tool handler error)
//! never surface as `VoiceError`; they are absorbed where they occur so
//! the conversation keeps going.

/// Fatal errors for a single voice session attempt.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Microphone access was refused. Surfaced to the host; no automatic retry.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// An audio device could not be created or started.
    #[error("audio device initialization failed: {0}")]
    DeviceInit(String),

    /// The session transport failed after (or while) opening.
    #[error("session transport error: {0}")]
    Transport(String),

    /// `start()` was called while another attempt is still live.
    #[error("a voice session is already in progress")]
    SessionActive,

    /// A configuration value could not be loaded or parsed.
    #[error("invalid configuration for {name}: {reason}")]
    Config { name: String, reason: String },
}

impl VoiceError {
    pub(crate) fn config(name: &str, reason: impl ToString) -> Self {
        VoiceError::Config {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
