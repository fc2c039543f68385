//! Manual approval gate: pauses the execution once, then passes through
//! after a resume.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use annex_core::{CancelSignal, CoreError, ProgressSink, StepContext};

use crate::error::{PipelineError, PipelineResult};
use crate::step::{PipelineDeps, Step, StepOutput};

/// Configuration for the approval step.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ApprovalConfig {
    /// Message shown as the pause reason.
    message: Option<String>,
}

/// The `approval` step.
pub struct ApprovalStep {
    deps: Arc<PipelineDeps>,
}

impl ApprovalStep {
    /// Build the step over the shared dependencies.
    #[must_use]
    pub const fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Step for ApprovalStep {
    fn kind(&self) -> &'static str {
        "approval"
    }

    fn validate_config(&self, config: &Value) -> PipelineResult<()> {
        if config.is_null() {
            return Ok(());
        }
        serde_json::from_value::<ApprovalConfig>(config.clone())
            .map(|_| ())
            .map_err(|err| PipelineError::InvalidConfig {
                step: "approval".to_owned(),
                reason: err.to_string(),
            })
    }

    async fn execute(
        &self,
        context: &StepContext,
        config: &Value,
        _progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> PipelineResult<StepOutput> {
        cancel.ensure_active()?;
        let item_id = context.processing_item_id()?;
        let marker = format!("approval:{item_id}");
        if context.has_marker(&marker) {
            // The gate was already passed in a prior run; resumes fall
            // through.
            return Ok(StepOutput::skip());
        }

        // Record the passage before pausing so the post-resume re-run skips
        // the gate.
        let item = self
            .deps
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| CoreError::not_found("processing_item", item_id))?;
        let mut item_context = item.step_context;
        item_context.add_marker(&marker);
        self.deps
            .store
            .set_item_context(item_id, &item_context)
            .await?;

        let config: ApprovalConfig = if config.is_null() {
            ApprovalConfig::default()
        } else {
            serde_json::from_value(config.clone()).unwrap_or_default()
        };
        Ok(StepOutput::pause(
            config
                .message
                .unwrap_or_else(|| "awaiting approval".to_owned()),
        ))
    }
}
