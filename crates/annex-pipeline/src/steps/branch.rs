//! The `branch` step definition: per-episode child executions.
//!
//! Branching is handled structurally by the executor, which creates one
//! child execution per episode item and joins them; this type exists so the
//! registry can validate branch configurations in templates.

use async_trait::async_trait;
use serde_json::{Map, Value};

use annex_core::{CancelSignal, ProgressSink, StepContext};

use crate::error::{PipelineError, PipelineResult};
use crate::step::{Step, StepOutput};

/// The `branch` step.
pub struct BranchStep;

#[async_trait]
impl Step for BranchStep {
    fn kind(&self) -> &'static str {
        "branch"
    }

    fn validate_config(&self, config: &Value) -> PipelineResult<()> {
        if config.is_null() || config.as_object().is_some_and(Map::is_empty) {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig {
                step: "branch".to_owned(),
                reason: "step takes no configuration".to_owned(),
            })
        }
    }

    async fn execute(
        &self,
        _context: &StepContext,
        _config: &Value,
        _progress: &dyn ProgressSink,
        _cancel: &CancelSignal,
    ) -> PipelineResult<StepOutput> {
        // The executor intercepts branch steps before dispatch; reaching
        // this body means the template placed a branch below another branch,
        // which degenerates to a no-op passthrough.
        Ok(StepOutput::skip())
    }
}
