use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("Vector contains non-finite values")]
    NonFiniteVector,

    #[error("Passage {id} not found (store holds {size} passages)")]
    NotFound { id: usize, size: usize },

    #[error("Completion service error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Failed to load corpus: {0}")]
    StartupLoad(String),

    #[error("Invalid index: {0}")]
    Index(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::StartupLoad(msg.into())
    }
}

/// Failures of the remote text-generation service.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
