//! Error types for the consistency layer.
//!
//! The taxonomy mirrors what callers need to react to: `NotFound` and
//! `Conflict` propagate unchanged, `Validation` and `InvariantViolation` are
//! surfaced before/instead of any write, and `PreconditionFailed` is an
//! internal signal absorbed by the optimistic mutator and the default guard —
//! a caller of [`OptimisticMutator::mutate`](crate::mutator::OptimisticMutator::mutate)
//! never sees it.
//!
//! The layer never produces partial writes: every multi-document operation
//! either fully commits through an atomic batch or fully fails.

use strata_core::DocumentKind;
use strata_core::error::Error as CoreError;

/// Result type alias for consistency-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during consistency-layer operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested document does not exist.
    #[error("not found: {kind} '{id}'")]
    NotFound {
        /// Entity kind of the missing document.
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A create collided with an existing document, or a uniqueness
    /// constraint was violated.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// A conditional write lost a race with a concurrent writer.
    ///
    /// Recovered internally by the retry loops; callers of the mutator and
    /// the default guard never observe it.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// The document failed schema or business-rule validation.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The operation would break a cross-document invariant.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// An optimistic retry loop ran out of attempts under contention.
    #[error("retries exhausted after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// A backend operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A document body could not be serialized or deserialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl Error {
    /// Creates a not-found error for a typed document.
    #[must_use]
    pub fn not_found(kind: DocumentKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.as_str(),
            id: id.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an invariant-violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Serialization { message } => Self::Serialization { message },
            CoreError::PreconditionFailed { message } => Self::PreconditionFailed { message },
            other => Self::Storage {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}
