//! Error types for the triage backend.

use thiserror::Error;

/// Errors surfaced by the triage core and its collaborators.
///
/// Validation failures (`InvalidExpression`, `NotFound`) are rejected
/// synchronously with no partial mutation; nothing here is fatal to the
/// process.
#[derive(Error, Debug)]
pub enum TriageError {
    /// Unknown quarantined-message or rule id
    #[error("not found: {0}")]
    NotFound(String),

    /// A quarantine rule expression failed to compile
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// Replay requested for a message that did not originate from a queue
    #[error("replay is only supported for queue-origin messages")]
    UnsupportedReplayTarget,

    /// Peek wait exceeded its bound; the payload may still arrive later
    #[error("timed out waiting for peeked payload")]
    Timeout,

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool error
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// I/O error during startup or persistence
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message bus publish failure; the quarantined record is left intact
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Result type alias for triage operations.
pub type TriageResult<T> = Result<T, TriageError>;
