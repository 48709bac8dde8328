//! Error types for the reconciliation engine
//!
//! Every failure the engine can surface carries an [`ErrorKind`], which the
//! orchestrator uses to decide whether a run continues past it.

use serde::Serialize;
use std::fmt;

/// Classification of a [`SyncError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Vendor response shape was not what the mapping table expects
    SchemaMismatch,
    /// Internal consistency broken
    InvariantViolation,
    /// Throttling retries were exhausted
    RateLimited,
    /// Genuine authorization failure
    Unauthorized,
    /// Network failures, malformed responses or 5xx after retries
    TransportError,
    /// The API refused a request with a non-retryable status
    Rejected,
    /// A create payload lacks a field the API requires
    IncompleteRecord,
    /// Conflict groups never reached a fixed point
    ConflictResolutionFailure,
}

impl ErrorKind {
    /// Whether an error of this kind stops the whole run
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::InvariantViolation
                | ErrorKind::Unauthorized
                | ErrorKind::ConflictResolutionFailure
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SchemaMismatch => "schema-mismatch",
            ErrorKind::InvariantViolation => "invariant-violation",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::TransportError => "transport-error",
            ErrorKind::Rejected => "rejected",
            ErrorKind::IncompleteRecord => "incomplete-record",
            ErrorKind::ConflictResolutionFailure => "conflict-resolution-failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while normalizing, diffing or talking to the remote API
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("schema mismatch on {field}: expected {expected}, found {found}")]
    SchemaMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transport error after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("record is missing required field {field}")]
    IncompleteRecord { field: String },

    #[error("conflict resolution failed: {0}")]
    ConflictResolution(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            SyncError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            SyncError::RateLimited { .. } => ErrorKind::RateLimited,
            SyncError::Unauthorized(_) => ErrorKind::Unauthorized,
            SyncError::Transport { .. } => ErrorKind::TransportError,
            SyncError::Rejected { .. } => ErrorKind::Rejected,
            SyncError::IncompleteRecord { .. } => ErrorKind::IncompleteRecord,
            SyncError::ConflictResolution(_) => ErrorKind::ConflictResolutionFailure,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}
