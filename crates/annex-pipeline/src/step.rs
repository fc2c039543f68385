//! Step contract, shared dependencies and the step registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use annex_config::Settings;
use annex_core::{
    CancelSignal, CoreError, EncoderPool, IndexerClient, LibraryScanner, MetadataProvider,
    ProgressSink, StepContext, StepDefinition, Store, TorrentClient, Transport, TransportKind,
};
use annex_events::EventBus;

use crate::error::{PipelineError, PipelineResult};
use crate::steps;

/// Step kind handled structurally by the executor: one child execution per
/// episode item.
pub const BRANCH_KIND: &str = "branch";

/// Shared dependencies every step implementation works through.
pub struct PipelineDeps {
    /// Durable persistence.
    pub store: Arc<dyn Store>,
    /// Title and episode metadata lookup.
    pub metadata: Arc<dyn MetadataProvider>,
    /// Release search across indexers.
    pub indexer: Arc<dyn IndexerClient>,
    /// External BitTorrent client.
    pub torrents: Arc<dyn TorrentClient>,
    /// Remote encoder worker pool.
    pub encoders: Arc<dyn EncoderPool>,
    /// Transports keyed by protocol.
    pub transports: HashMap<TransportKind, Arc<dyn Transport>>,
    /// Media-server scan trigger.
    pub scanner: Arc<dyn LibraryScanner>,
    /// Event bus for progress and activity.
    pub events: EventBus,
    /// Runtime settings.
    pub settings: Settings,
}

impl PipelineDeps {
    /// Resolve the transport for a protocol.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Misconfigured`] when no transport is registered
    /// for the protocol.
    pub fn transport_for(&self, kind: TransportKind) -> Result<Arc<dyn Transport>, CoreError> {
        self.transports.get(&kind).cloned().ok_or_else(|| {
            CoreError::misconfigured(
                "transport",
                format!("no transport registered for protocol '{}'", kind.as_str()),
            )
        })
    }

    /// Publish an event and mirror it into the request's activity log.
    pub async fn emit(&self, request_id: uuid::Uuid, event: annex_events::Event, message: &str) {
        let details = event.details();
        let kind = event.kind();
        let _ = self.events.publish(event);
        if let Err(err) = self
            .store
            .append_activity(request_id, kind, message, details)
            .await
        {
            tracing::warn!(error = %err, request_id = %request_id, "failed to append activity entry");
        }
    }
}

/// What the executor does after a successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Descend into the step's children.
    Continue,
    /// Stop this branch; the step finished its subtree's work.
    Stop,
}

/// Tagged result of one step execution.
#[derive(Debug)]
pub enum StepOutput {
    /// The step succeeded; `data` is merged into the context.
    Success {
        /// Context keys produced by the step; core fields are stripped
        /// before merging.
        data: Map<String, Value>,
        /// Whether to continue into children.
        next: NextAction,
    },
    /// The step declined to run; context unchanged, children still execute.
    Skip,
    /// Suspend the execution; a resume command continues the tree.
    Pause {
        /// Reason recorded on the execution.
        reason: String,
    },
    /// Complete the execution gracefully; the item keeps the waiting status
    /// the step set and the scheduler reactivates it later.
    RetryLater {
        /// Reason recorded in the log.
        reason: String,
    },
    /// The step failed; `required`/`continue_on_error` decide the
    /// consequences.
    Failure {
        /// Failure detail recorded on the item.
        message: String,
    },
}

impl StepOutput {
    /// Successful output continuing into children.
    #[must_use]
    pub const fn success(data: Map<String, Value>) -> Self {
        Self::Success {
            data,
            next: NextAction::Continue,
        }
    }

    /// Successful output terminating the branch.
    #[must_use]
    pub const fn success_stop(data: Map<String, Value>) -> Self {
        Self::Success {
            data,
            next: NextAction::Stop,
        }
    }

    /// Declining output.
    #[must_use]
    pub const fn skip() -> Self {
        Self::Skip
    }

    /// Pausing output with a reason.
    #[must_use]
    pub fn pause(reason: impl Into<String>) -> Self {
        Self::Pause {
            reason: reason.into(),
        }
    }

    /// Graceful retry-later output with a reason.
    #[must_use]
    pub fn retry_later(reason: impl Into<String>) -> Self {
        Self::RetryLater {
            reason: reason.into(),
        }
    }

    /// Failing output with a message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }
}

/// One addressable unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    /// Kind string the registry resolves this step by.
    fn kind(&self) -> &'static str;

    /// Validate a template's configuration payload for this kind.
    fn validate_config(&self, config: &Value) -> PipelineResult<()>;

    /// Whether the step should run for the given context. The default
    /// implementation understands `{"exists": "key"}` and
    /// `{"key": "...", "equals": value}` conditions and accepts everything
    /// else.
    fn evaluate_condition(&self, context: &StepContext, condition: Option<&Value>) -> bool {
        condition.is_none_or(|condition| condition_holds(context, condition))
    }

    /// Execute the step. Implementations are idempotent: when the effect is
    /// already present in the context they short-circuit with
    /// [`StepOutput::Skip`].
    async fn execute(
        &self,
        context: &StepContext,
        config: &Value,
        progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> PipelineResult<StepOutput>;
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("kind", &self.kind()).finish()
    }
}

fn condition_holds(context: &StepContext, condition: &Value) -> bool {
    if let Some(key) = condition.get("exists").and_then(Value::as_str) {
        return context.get(key).is_some();
    }
    if let (Some(key), Some(expected)) = (
        condition.get("key").and_then(Value::as_str),
        condition.get("equals"),
    ) {
        return context.get(key) == Some(expected);
    }
    true
}

/// Maps step kinds to implementations and validates template trees.
pub struct StepRegistry {
    entries: HashMap<&'static str, Arc<dyn Step>>,
}

impl StepRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a step implementation under its kind.
    pub fn register(&mut self, step: Arc<dyn Step>) {
        self.entries.insert(step.kind(), step);
    }

    /// Resolve a step implementation by kind.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownStepKind`] for unregistered kinds.
    pub fn get(&self, kind: &str) -> PipelineResult<Arc<dyn Step>> {
        self.entries
            .get(kind)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownStepKind {
                kind: kind.to_owned(),
            })
    }

    /// Validate every step definition in a tree: kinds must resolve and
    /// configurations must pass per-kind validation.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure encountered.
    pub fn validate_tree(&self, steps: &[StepDefinition]) -> PipelineResult<()> {
        for definition in steps {
            let step = self.get(&definition.kind)?;
            step.validate_config(&definition.config)
                .map_err(|err| match err {
                    PipelineError::InvalidConfig { reason, .. } => PipelineError::InvalidConfig {
                        step: definition.name.clone(),
                        reason,
                    },
                    other => other,
                })?;
            self.validate_tree(&definition.children)?;
        }
        Ok(())
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the registry with every required step kind wired to the shared
/// dependencies.
#[must_use]
pub fn standard_registry(deps: &Arc<PipelineDeps>) -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register(Arc::new(steps::search::SearchStep::new(Arc::clone(deps))));
    registry.register(Arc::new(steps::download::DownloadStartStep::new(
        Arc::clone(deps),
    )));
    registry.register(Arc::new(steps::download::DownloadMonitorStep::new(
        Arc::clone(deps),
    )));
    registry.register(Arc::new(steps::map_files::MapFilesStep::new(Arc::clone(
        deps,
    ))));
    registry.register(Arc::new(steps::encode::EncodeStep::new(Arc::clone(deps))));
    registry.register(Arc::new(steps::deliver::DeliverStep::new(Arc::clone(
        deps,
    ))));
    registry.register(Arc::new(steps::approval::ApprovalStep::new(Arc::clone(
        deps,
    ))));
    registry.register(Arc::new(steps::branch::BranchStep));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conditions_evaluate_against_context() {
        let mut context = StepContext::new();
        context.set("release", json!({"title": "x"}));
        context.set("mode", json!("fast"));

        assert!(condition_holds(&context, &json!({"exists": "release"})));
        assert!(!condition_holds(&context, &json!({"exists": "missing"})));
        assert!(condition_holds(
            &context,
            &json!({"key": "mode", "equals": "fast"})
        ));
        assert!(!condition_holds(
            &context,
            &json!({"key": "mode", "equals": "slow"})
        ));
        // Unrecognised condition shapes never veto execution.
        assert!(condition_holds(&context, &json!("free-form")));
    }

    #[test]
    fn unknown_kind_is_reported() {
        let registry = StepRegistry::new();
        let err = registry.get("warp").expect_err("unknown kind");
        assert!(matches!(err, PipelineError::UnknownStepKind { kind } if kind == "warp"));
    }
}
