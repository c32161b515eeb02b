//! Error types for the playback engine

use thiserror::Error;

/// Engine errors
///
/// Device and I/O failures are caught where they happen and turned into a
/// `false` return plus a log line; this type is what gets logged and handed
/// to the error callback.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No MIDI output port could be opened
    #[error("MIDI device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A song could not be read or decoded
    #[error("failed to load {resource}: {reason}")]
    ResourceLoad { resource: String, reason: String },

    /// Malformed arguments, e.g. an inverted range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration values
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn load(resource: impl ToString, reason: impl ToString) -> Self {
        EngineError::ResourceLoad {
            resource: resource.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
