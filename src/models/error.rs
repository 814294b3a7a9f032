//! Error types for setjudge.
//!
//! Taxonomy:
//! - Contract failures: malformed schema, incomplete input, non-conforming output
//! - Dispatch failures: the backend could not produce an object
//! - Ambient failures: config, IO, internal invariants

use thiserror::Error;

/// Top-level error type for setjudge.
#[derive(Debug, Error)]
pub enum SetJudgeError {
    // ═══════════════════════════════════════════════════════════════════
    // CONTRACT - structured-output protocol violations
    // ═══════════════════════════════════════════════════════════════════
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Incomplete input: required field '{field}' is empty")]
    IncompleteInput { field: String },

    #[error("Schema validation failed at '{path}': {reason}")]
    SchemaValidation { path: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════
    // DISPATCH - the inference backend did not deliver
    // ═══════════════════════════════════════════════════════════════════
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchFailure),

    // ═══════════════════════════════════════════════════════════════════
    // AMBIENT
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why the inference backend produced no JSON object for an envelope.
///
/// `Clone` so a single failure can be attached to both the per-envelope
/// result and the orchestrator's terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchFailure {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("model refused: {0}")]
    Refused(String),

    #[error("malformed completion: {0}")]
    MalformedCompletion(String),

    #[error("no result returned for envelope {0}")]
    MissingResult(String),

    #[error("request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl DispatchFailure {
    /// Whether the HTTP dispatcher should try the request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl SetJudgeError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn incomplete(field: impl Into<String>) -> Self {
        Self::IncompleteInput {
            field: field.into(),
        }
    }

    pub fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Field path of a schema validation failure, if this is one.
    pub fn violation_path(&self) -> Option<&str> {
        match self {
            Self::SchemaValidation { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for setjudge.
pub type Result<T> = std::result::Result<T, SetJudgeError>;
