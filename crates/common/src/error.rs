//! Error types for Runwright

use thiserror::Error;

use crate::types::{Phase, RunId};

/// Result type alias using Runwright Error
pub type Result<T> = std::result::Result<T, Error>;

/// Runwright error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to launch test executable: {0}")]
    Spawn(String),

    #[error("Malformed test output: {0}")]
    Parse(String),

    #[error("Test run not found: {id}")]
    NotFound { id: String },

    #[error("Test run {id} already {phase}")]
    AlreadyTerminal { id: RunId, phase: Phase },

    #[error("Test run {id} is still running")]
    StillRunning { id: RunId },

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidStateTransition { from: Phase, to: Phase },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(id: impl ToString) -> Self {
        Error::NotFound { id: id.to_string() }
    }
}

/// Rejections raised before a run is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL is required")]
    MissingUrl,

    #[error("URL is missing a scheme (expected http:// or https://)")]
    MissingScheme,

    #[error("URL scheme `{0}` is not allowed; use http or https")]
    UnsupportedScheme(String),

    #[error("Invalid URL format: {0}")]
    MalformedUrl(String),

    #[error("URL must have a valid hostname")]
    MissingHost,

    #[error("At least one agent must be selected")]
    NoAgents,

    #[error("Invalid agents: {}", .0.join(", "))]
    UnknownAgents(Vec<String>),

    #[error("Invalid run ID: {0}")]
    InvalidRunId(String),
}
