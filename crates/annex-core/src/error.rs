//! Error taxonomy shared across the pipeline.
//!
//! # Design
//! - Constant messages with structured context fields; callers match on the
//!   kind, logs carry the detail.
//! - `AwaitingInput` situations are step outcomes, not errors, and have no
//!   variant here.

use std::error::Error;

use thiserror::Error;

/// Convenience alias for results produced by core components.
pub type CoreResult<T> = Result<T, CoreError>;

/// Primary error type for pipeline operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A referenced entity does not exist.
    #[error("entity not found")]
    NotFound {
        /// Entity table or type name.
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },
    /// The current state does not permit the requested operation.
    #[error("operation not permitted in current state")]
    Precondition {
        /// Operation that was rejected.
        operation: &'static str,
        /// Human-readable reason for the rejection.
        reason: String,
    },
    /// An external collaborator (indexer, torrent client, encoder pool,
    /// transport, scanner) failed or was unreachable.
    #[error("external service unavailable")]
    External {
        /// Collaborator identifier (e.g. `indexer`, `torrent_client`).
        service: &'static str,
        /// Operation that was attempted.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Persistence layer failure.
    #[error("storage failure")]
    Storage {
        /// Operation that was attempted.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The system is misconfigured in a way the user must fix (no default
    /// template, no encoders, no profile for a target).
    #[error("fatal misconfiguration")]
    Misconfigured {
        /// Subject of the misconfiguration.
        subject: &'static str,
        /// Human-readable reason.
        reason: String,
    },
    /// Input validation failure on a command or config payload.
    #[error("invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Cooperative cancellation; never logged as an error.
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Build a [`CoreError::NotFound`] for the given entity and identifier.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Build a [`CoreError::Precondition`] with a formatted reason.
    pub fn precondition(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Precondition {
            operation,
            reason: reason.into(),
        }
    }

    /// Wrap a collaborator failure as [`CoreError::External`].
    pub fn external(
        service: &'static str,
        operation: &'static str,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            service,
            operation,
            source: Box::new(source),
        }
    }

    /// Wrap a persistence failure as [`CoreError::Storage`].
    pub fn storage(operation: &'static str, source: impl Error + Send + Sync + 'static) -> Self {
        Self::Storage {
            operation,
            source: Box::new(source),
        }
    }

    /// Build a [`CoreError::Misconfigured`] with a formatted reason.
    pub fn misconfigured(subject: &'static str, reason: impl Into<String>) -> Self {
        Self::Misconfigured {
            subject,
            reason: reason.into(),
        }
    }

    /// Whether the error is a cooperative cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the error came from an external collaborator and is therefore
    /// retryable by policy.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn helpers_build_expected_variants() {
        let err = CoreError::not_found("request", "42");
        assert!(matches!(err, CoreError::NotFound { entity: "request", .. }));

        let err = CoreError::external("indexer", "search_movie", io::Error::other("down"));
        assert!(err.is_external());
        assert!(std::error::Error::source(&err).is_some());

        let err = CoreError::storage("insert_request", io::Error::other("conn reset"));
        assert!(matches!(err, CoreError::Storage { operation: "insert_request", .. }));

        assert!(CoreError::Cancelled.is_cancelled());
        assert!(!CoreError::Cancelled.is_external());
    }
}
