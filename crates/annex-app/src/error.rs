//! Application-level errors for bootstrap and command handling.

use annex_config::ConfigError;
use annex_core::CoreError;
use annex_pipeline::PipelineError;
use thiserror::Error;

/// Result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced by the application layer.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading or validation failed.
    #[error("configuration failure")]
    Config(#[from] ConfigError),
    /// A core operation failed.
    #[error("core operation failed")]
    Core(#[from] CoreError),
    /// A pipeline operation failed.
    #[error("pipeline operation failed")]
    Pipeline(#[from] PipelineError),
}

impl AppError {
    /// Whether the error represents a missing entity, for API mapping.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Core(CoreError::NotFound { .. })
                | Self::Pipeline(PipelineError::Core(CoreError::NotFound { .. }))
        )
    }
}
