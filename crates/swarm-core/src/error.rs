//! Error types for swarm-core

use thiserror::Error;

/// Main error type for swarm-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Capacity exceeded: {requested} workers requested, max_parallel is {max}")]
    CapacityExceeded { requested: usize, max: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invocation failed: {0}")]
    Invocation(String),

    #[error("LLM API error: {0}")]
    LlmApi(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Aggregation failed: {0}")]
    Aggregation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classification of an [`Error`], used to decide how far it propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any work is dispatched
    Configuration,
    /// A single task failed; recorded as data in its `TaskResult`
    TaskExecution,
    /// The delegation as a whole failed
    Orchestration,
    /// Lookup of a missing or unreadable session
    Query,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTemplate(_)
            | Self::CapacityExceeded { .. }
            | Self::InvalidRequest(_)
            | Self::Config(_) => ErrorKind::Configuration,
            Self::Invocation(_) | Self::LlmApi(_) | Self::Http(_) => ErrorKind::TaskExecution,
            Self::SessionNotFound(_) => ErrorKind::Query,
            Self::Aggregation(_)
            | Self::Store(_)
            | Self::Database(_)
            | Self::Json(_)
            | Self::Io(_) => ErrorKind::Orchestration,
        }
    }
}

/// Result type alias for swarm-core
pub type Result<T> = std::result::Result<T, Error>;
