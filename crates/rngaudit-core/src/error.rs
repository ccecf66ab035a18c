//! Error types for sources and validation sessions.

use thiserror::Error;

/// A bit source failed to deliver data.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source `{0}` cannot rewind")]
    NotRewindable(String),

    #[error("callback failed: {0}")]
    Callback(String),
}

/// Fatal, pre-execution errors. None of these leave a partial session behind.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("insufficient data: battery needs {required} bits, source can supply {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("unknown battery `{0}`")]
    UnknownBattery(String),

    #[error("battery `{0}` is already registered")]
    DuplicateBattery(String),

    #[error("invalid battery `{name}`: {reason}")]
    InvalidBattery { name: String, reason: String },

    #[error("unknown test `{0}`")]
    UnknownTest(String),

    #[error("test `{0}` is already registered")]
    DuplicateTest(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("failed to start worker thread: {0}")]
    WorkerSpawn(std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ValidationError {
    pub(crate) fn invalid_battery(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidBattery {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
