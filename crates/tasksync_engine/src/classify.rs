//! Error classification for push failures.
//!
//! [`classify`] is a pure function of the error and the mutation that
//! caused it. Rules are evaluated in strict priority order:
//!
//! 1. Local precondition violations: `validation_4xx`, fatal.
//! 2. No response or timeout: `network`, retryable.
//! 3. HTTP 5xx: `server_5xx`, retryable.
//! 4. HTTP 404 on a delete: `delete_404`. Success-equivalent for
//!    completions, fatal for todos and categories.
//! 5. Any other HTTP 4xx: `validation_4xx`, fatal.
//! 6. Everything else: `unknown`, retryable.

use crate::error::RemoteError;
use std::fmt;
use tasksync_protocol::{EntityKind, Mutation, MutationOp};

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport failure or timeout.
    Network,
    /// Remote-side failure.
    Server5xx,
    /// The request itself is wrong.
    Validation4xx,
    /// A delete found nothing to delete.
    Delete404,
    /// Could not be classified.
    Unknown,
}

impl ErrorCategory {
    /// Returns the category name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Server5xx => "server_5xx",
            ErrorCategory::Validation4xx => "validation_4xx",
            ErrorCategory::Delete404 => "delete_404",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    /// Taxonomy bucket.
    pub category: ErrorCategory,
    /// Whether another attempt may succeed.
    pub retryable: bool,
    /// Whether the failure already matches the desired end state.
    pub success_equivalent: bool,
    /// Stable machine-readable reason.
    pub reason_code: &'static str,
    /// HTTP status, if the remote answered.
    pub status: Option<u16>,
    /// Human-readable message.
    pub message: String,
}

impl ErrorClassification {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        reason_code: &'static str,
        error: &RemoteError,
    ) -> Self {
        Self {
            category,
            retryable,
            success_equivalent: false,
            reason_code,
            status: error.status(),
            message: error.to_string(),
        }
    }

    fn success_equivalent(mut self) -> Self {
        self.success_equivalent = true;
        self.retryable = false;
        self
    }
}

/// Classifies a remote failure of `mutation`.
pub fn classify(error: &RemoteError, mutation: &Mutation) -> ErrorClassification {
    use ErrorCategory::*;

    match error {
        RemoteError::Precondition(_) => {
            ErrorClassification::new(Validation4xx, false, "precondition_failed", error)
        }
        RemoteError::Network(_) => ErrorClassification::new(Network, true, "network_error", error),
        RemoteError::Timeout => ErrorClassification::new(Network, true, "timeout", error),
        RemoteError::Http { status, .. } => match *status {
            500..=599 => ErrorClassification::new(Server5xx, true, "server_error", error),
            404 if mutation.op() == MutationOp::Delete => {
                if mutation.entity_kind() == EntityKind::Completion {
                    ErrorClassification::new(Delete404, false, "already_deleted", error)
                        .success_equivalent()
                } else {
                    ErrorClassification::new(Delete404, false, "unknown_entity", error)
                }
            }
            400..=499 => ErrorClassification::new(Validation4xx, false, "rejected", error),
            _ => ErrorClassification::new(Unknown, true, "unexpected_status", error),
        },
        RemoteError::Malformed(_) | RemoteError::Other(_) => {
            ErrorClassification::new(Unknown, true, "unknown_error", error)
        }
    }
}
