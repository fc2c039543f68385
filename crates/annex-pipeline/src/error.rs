//! Error types for the pipeline executor and steps.

use annex_core::CoreError;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors produced by the executor and step implementations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A core operation (store access, collaborator call) failed.
    #[error("pipeline core operation failed")]
    Core(#[from] CoreError),
    /// A template referenced a step kind the registry does not know.
    #[error("unknown step kind")]
    UnknownStepKind {
        /// The unresolvable kind string.
        kind: String,
    },
    /// A step configuration payload failed validation.
    #[error("invalid step configuration")]
    InvalidConfig {
        /// Step name carrying the bad configuration.
        step: String,
        /// Human-readable validation detail.
        reason: String,
    },
    /// A required step failed, aborting its branch.
    #[error("step failed")]
    StepFailed {
        /// Step name that failed.
        step: String,
        /// Failure detail recorded on the item.
        message: String,
    },
}

impl PipelineError {
    /// Whether this error represents cooperative cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Core(CoreError::Cancelled))
    }

    /// Compact message suitable for an item's `last_error` column.
    #[must_use]
    pub fn item_message(&self) -> String {
        match self {
            Self::Core(err) => err.to_string(),
            Self::UnknownStepKind { kind } => format!("unknown step kind '{kind}'"),
            Self::InvalidConfig { step, reason } => {
                format!("invalid configuration for step '{step}': {reason}")
            }
            Self::StepFailed { message, .. } => message.clone(),
        }
    }
}
