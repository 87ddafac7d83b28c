use thiserror::Error;

/// Errors a caller of the session loop is expected to act on.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The question source never produced a usable question set.
    #[error("question source returned nothing usable after {attempts} attempts")]
    BootstrapExhausted { attempts: u32 },

    #[error("a recording session is already running")]
    AlreadyRecording,

    #[error("media '{name}' not found for language '{language}'")]
    MediaNotFound { name: String, language: String },
}
