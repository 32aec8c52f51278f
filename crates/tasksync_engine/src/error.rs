//! Error types for the sync engine.

use tasksync_journal::JournalError;
use tasksync_protocol::{ChangeId, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure of a single remote call.
///
/// The variant is chosen where the failure is constructed, so the error
/// classifier never has to guess from message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The request was rejected locally before any I/O.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// No response: connection refused, reset or DNS failure.
    #[error("network error: {0}")]
    Network(String),

    /// The transport gave up waiting for a response.
    #[error("request timed out")]
    Timeout,

    /// The remote answered with a non-success status.
    #[error("http {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// A success response whose body could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Anything else.
    #[error("remote error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status, if the remote answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<ProtocolError> for RemoteError {
    fn from(err: ProtocolError) -> Self {
        RemoteError::Precondition(err.to_string())
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Durable journal failure.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    /// Invalid protocol data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A journal record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A pull was requested without a cursor.
    #[error("pull requires a cursor")]
    MissingCursor,

    /// A pull was requested with a cursor that does not parse.
    #[error("invalid cursor: {value:?}")]
    InvalidCursor {
        /// The rejected text.
        value: String,
    },

    /// No pending change has the given id.
    #[error("unknown pending change {0}")]
    UnknownChange(ChangeId),

    /// The pending change is not dead-lettered.
    #[error("pending change {0} is not dead-lettered")]
    NotDeadLettered(ChangeId),

    /// A remote call failed outside the push engine.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => match err {
                RemoteError::Network(_) | RemoteError::Timeout | RemoteError::Other(_) => true,
                RemoteError::Http { status, .. } => *status >= 500,
                RemoteError::Precondition(_) | RemoteError::Malformed(_) => false,
            },
            SyncError::Journal(JournalError::Locked) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Remote(RemoteError::Network("reset".into())).is_retryable());
        assert!(SyncError::Remote(RemoteError::Timeout).is_retryable());
        assert!(SyncError::Remote(RemoteError::http(503, "busy")).is_retryable());
        assert!(!SyncError::Remote(RemoteError::http(422, "bad")).is_retryable());
        assert!(!SyncError::MissingCursor.is_retryable());
        assert!(!SyncError::UnknownChange(7).is_retryable());
    }

    #[test]
    fn protocol_errors_become_preconditions() {
        let err: RemoteError = ProtocolError::MissingIdentity {
            kind: "updateTodo",
            field: "id",
        }
        .into();
        assert!(matches!(err, RemoteError::Precondition(_)));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn error_display() {
        assert_eq!(
            RemoteError::http(404, "not found").to_string(),
            "http 404: not found"
        );
        assert_eq!(
            SyncError::UnknownChange(3).to_string(),
            "unknown pending change 3"
        );
    }
}
