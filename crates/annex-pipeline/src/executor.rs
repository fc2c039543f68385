//! The tree-structured pipeline executor.
//!
//! # Design
//! - An execution snapshots its template's step tree; the executor walks the
//!   tree depth-first, running siblings at the same level concurrently and
//!   merging their contexts last-writer-wins at the join.
//! - Pause, graceful retry-later exits and cancellation are control flow,
//!   not errors; a required step failure marks the owning item failed and
//!   the execution failed, never the request directly.
//! - `branch` steps are handled structurally: one child execution per
//!   episode item, joined before the parent proceeds.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use annex_core::{
    CancelSignal, CoreError, Execution, ExecutionStatus, ItemStatus, StepContext, StepDefinition,
};
use annex_events::Event;

use crate::error::{PipelineError, PipelineResult};
use crate::progress::ItemProgressSink;
use crate::step::{BRANCH_KIND, NextAction, PipelineDeps, StepOutput, StepRegistry};

/// How a subtree finished.
enum TreeFlow {
    /// The subtree ran to completion with this context.
    Done(StepContext),
    /// A step paused the execution; stop sibling work and unwind.
    Paused,
    /// A step exited gracefully (retry later); the execution is already
    /// marked completed.
    Exited,
}

type TreeFuture = Pin<Box<dyn Future<Output = PipelineResult<TreeFlow>> + Send>>;

/// Drives step trees bound to requests through the state machine.
pub struct PipelineExecutor {
    deps: Arc<PipelineDeps>,
    registry: Arc<StepRegistry>,
    active: Mutex<HashMap<Uuid, CancelSignal>>,
}

impl PipelineExecutor {
    /// Build an executor over shared dependencies and a step registry.
    #[must_use]
    pub fn new(deps: Arc<PipelineDeps>, registry: Arc<StepRegistry>) -> Self {
        Self {
            deps,
            registry,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, execution_id: Uuid, signal: CancelSignal) {
        if let Ok(mut active) = self.active.lock() {
            active.insert(execution_id, signal);
        }
    }

    fn unregister(&self, execution_id: Uuid) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&execution_id);
        }
    }

    fn signal_for(&self, execution_id: Uuid) -> Option<CancelSignal> {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.get(&execution_id).cloned())
    }

    /// Activate a template against a request: snapshot the step tree, clean
    /// up stale state and create a running execution.
    ///
    /// # Errors
    ///
    /// Fails when the request or template is missing, when no default
    /// template exists for the media kind, or when the template tree does
    /// not validate.
    pub async fn start(
        &self,
        request_id: Uuid,
        template_id: Option<Uuid>,
    ) -> PipelineResult<Uuid> {
        let request = self
            .deps
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("request", request_id))?;
        let template = match template_id {
            Some(id) => self
                .deps
                .store
                .get_template(id)
                .await?
                .ok_or_else(|| CoreError::not_found("pipeline_template", id))?,
            None => self
                .deps
                .store
                .default_template(request.kind)
                .await?
                .ok_or_else(|| {
                    CoreError::misconfigured(
                        "pipeline_template",
                        format!("no default template for kind '{}'", request.kind.as_str()),
                    )
                })?,
        };
        self.registry.validate_tree(&template.steps)?;

        // Stale-state cleanup: prior executions go away, items lose their
        // error strings, orphaned encoder assignments are cancelled.
        self.deps
            .store
            .delete_executions_for_request(request_id)
            .await?;
        self.deps.store.clear_item_errors(request_id).await?;
        for assignment in self
            .deps
            .store
            .active_assignments_for_request(request_id)
            .await?
        {
            let _ = self
                .deps
                .store
                .transition_assignment(
                    assignment.job_id,
                    &[
                        annex_core::AssignmentStatus::Pending,
                        annex_core::AssignmentStatus::Assigned,
                        annex_core::AssignmentStatus::Encoding,
                    ],
                    annex_core::AssignmentStatus::Cancelled,
                    Some("superseded by new execution"),
                )
                .await?;
            let _ = self
                .deps
                .encoders
                .cancel(assignment.job_id, "superseded by new execution")
                .await;
        }

        let items = self.deps.store.items_for_request(request_id).await?;
        let representative = items.first().ok_or_else(|| {
            CoreError::precondition("start_execution", "request has no processing items")
        })?;
        let context = StepContext::for_item(&request, representative);

        let execution = Execution {
            id: Uuid::new_v4(),
            request_id,
            template_id: template.id,
            steps: template.steps,
            status: ExecutionStatus::Running,
            current_step: None,
            parent_execution_id: None,
            episode_item_id: None,
            context,
            pause_reason: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.deps.store.insert_execution(&execution).await?;
        self.deps
            .emit(
                request_id,
                Event::ExecutionStarted {
                    execution_id: execution.id,
                    request_id,
                },
                "pipeline execution started",
            )
            .await;
        Ok(execution.id)
    }

    /// Drive an execution in a background task.
    pub fn spawn_run(self: &Arc<Self>, execution_id: Uuid) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = executor.run(execution_id).await {
                error!(error = %err, execution_id = %execution_id, "pipeline execution crashed");
            }
        })
    }

    /// Drive an execution to a terminal state on the current task.
    ///
    /// # Errors
    ///
    /// Fails when the execution is missing or a store operation fails while
    /// recording the terminal state; step failures are absorbed into the
    /// execution record.
    pub async fn run(self: &Arc<Self>, execution_id: Uuid) -> PipelineResult<()> {
        let execution = self
            .deps
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| CoreError::not_found("execution", execution_id))?;
        if execution.status != ExecutionStatus::Running {
            return Ok(());
        }
        let signal = CancelSignal::new();
        self.register(execution_id, signal.clone());
        let outcome = self.drive(&execution, signal).await;
        self.unregister(execution_id);
        self.finish(&execution, outcome).await
    }

    async fn drive(
        self: &Arc<Self>,
        execution: &Execution,
        signal: CancelSignal,
    ) -> PipelineResult<TreeFlow> {
        // The owning item's persisted context is authoritative on resume;
        // the execution's embedded context is only the seed.
        let mut context = execution.context.clone();
        if let Ok(item_id) = context.processing_item_id()
            && let Some(item) = self.deps.store.get_item(item_id).await?
        {
            context.overlay(&item.step_context);
        }
        self.execute_tree(execution.id, execution.steps.clone(), context, signal)
            .await
    }

    async fn finish(
        self: &Arc<Self>,
        execution: &Execution,
        outcome: PipelineResult<TreeFlow>,
    ) -> PipelineResult<()> {
        let request_id = execution.request_id;
        match outcome {
            Ok(TreeFlow::Done(_)) => {
                self.deps
                    .store
                    .transition_execution(
                        execution.id,
                        &[ExecutionStatus::Running],
                        ExecutionStatus::Completed,
                        None,
                    )
                    .await?;
                self.deps
                    .emit(
                        request_id,
                        Event::ExecutionCompleted {
                            execution_id: execution.id,
                        },
                        "pipeline execution completed",
                    )
                    .await;
                self.finalize_request(request_id).await?;
            }
            Ok(TreeFlow::Paused | TreeFlow::Exited) => {
                // The pausing or exiting branch already recorded the state.
                self.deps.store.touch_request(request_id).await?;
            }
            Err(err) if err.is_cancelled() => {
                self.deps
                    .store
                    .transition_execution(
                        execution.id,
                        &[ExecutionStatus::Running, ExecutionStatus::Paused],
                        ExecutionStatus::Cancelled,
                        None,
                    )
                    .await?;
                self.deps
                    .emit(
                        request_id,
                        Event::ExecutionCancelled {
                            execution_id: execution.id,
                        },
                        "pipeline execution cancelled",
                    )
                    .await;
            }
            Err(err) => {
                let message = err.item_message();
                self.deps
                    .store
                    .transition_execution(
                        execution.id,
                        &[ExecutionStatus::Running],
                        ExecutionStatus::Failed,
                        Some(&message),
                    )
                    .await?;
                self.deps
                    .emit(
                        request_id,
                        Event::ExecutionFailed {
                            execution_id: execution.id,
                            message,
                        },
                        "pipeline execution failed",
                    )
                    .await;
                self.deps.store.touch_request(request_id).await?;
            }
        }
        Ok(())
    }

    async fn finalize_request(&self, request_id: Uuid) -> PipelineResult<()> {
        let items = self.deps.store.items_for_request(request_id).await?;
        let aggregated = crate::status::aggregate(&items);
        if aggregated.status == annex_core::RequestStatus::Completed {
            self.deps
                .store
                .set_request_completed(request_id, Some(Utc::now()))
                .await?;
            self.deps
                .emit(
                    request_id,
                    Event::RequestCompleted { request_id },
                    "request completed",
                )
                .await;
        } else {
            self.deps.store.touch_request(request_id).await?;
        }
        Ok(())
    }

    /// Resume a paused execution. Steps are idempotent, so the whole tree is
    /// re-run; completed steps short-circuit on their recorded effects.
    ///
    /// # Errors
    ///
    /// Fails when the execution is missing or not paused.
    pub async fn resume(self: &Arc<Self>, execution_id: Uuid) -> PipelineResult<()> {
        let applied = self
            .deps
            .store
            .transition_execution(
                execution_id,
                &[ExecutionStatus::Paused],
                ExecutionStatus::Running,
                None,
            )
            .await?;
        if !applied {
            return Err(CoreError::precondition(
                "resume_execution",
                "execution is not paused",
            )
            .into());
        }
        self.spawn_run(execution_id);
        Ok(())
    }

    /// Cancel an execution and its branch children, cascading to active
    /// encoder assignments of the request.
    ///
    /// # Errors
    ///
    /// Fails when a store operation fails while recording the cancellation.
    pub async fn cancel(&self, execution_id: Uuid) -> PipelineResult<()> {
        if let Some(signal) = self.signal_for(execution_id) {
            signal.cancel();
        }
        let Some(execution) = self.deps.store.get_execution(execution_id).await? else {
            return Ok(());
        };
        let transitioned = self
            .deps
            .store
            .transition_execution(
                execution_id,
                &[ExecutionStatus::Running, ExecutionStatus::Paused],
                ExecutionStatus::Cancelled,
                None,
            )
            .await?;
        if transitioned {
            self.deps
                .emit(
                    execution.request_id,
                    Event::ExecutionCancelled { execution_id },
                    "execution cancelled",
                )
                .await;
        }
        for child in self.deps.store.child_executions(execution_id).await? {
            if let Some(signal) = self.signal_for(child.id) {
                signal.cancel();
            }
            let _ = self
                .deps
                .store
                .transition_execution(
                    child.id,
                    &[ExecutionStatus::Running, ExecutionStatus::Paused],
                    ExecutionStatus::Cancelled,
                    None,
                )
                .await?;
        }
        for assignment in self
            .deps
            .store
            .active_assignments_for_request(execution.request_id)
            .await?
        {
            let _ = self
                .deps
                .encoders
                .cancel(assignment.job_id, "cancelled by user")
                .await;
            let _ = self
                .deps
                .store
                .transition_assignment(
                    assignment.job_id,
                    &[
                        annex_core::AssignmentStatus::Pending,
                        annex_core::AssignmentStatus::Assigned,
                        annex_core::AssignmentStatus::Encoding,
                    ],
                    annex_core::AssignmentStatus::Cancelled,
                    Some("cancelled by user"),
                )
                .await?;
        }
        Ok(())
    }

    fn execute_tree(
        self: &Arc<Self>,
        execution_id: Uuid,
        steps: Vec<StepDefinition>,
        context: StepContext,
        signal: CancelSignal,
    ) -> TreeFuture {
        let this = Arc::clone(self);
        Box::pin(async move {
            if steps.is_empty() {
                return Ok(TreeFlow::Done(context));
            }
            if steps.len() == 1 {
                let step = steps.into_iter().next().unwrap_or_else(|| unreachable!());
                return this
                    .execute_step(execution_id, step, context, signal)
                    .await;
            }

            // Sibling steps run concurrently; a pause or graceful exit in
            // one branch stops the others cooperatively.
            let group_signal = signal.child();
            let mut set: JoinSet<PipelineResult<TreeFlow>> = JoinSet::new();
            for step in steps {
                let branch = Arc::clone(&this);
                let branch_context = context.clone();
                let branch_signal = group_signal.clone();
                set.spawn(async move {
                    branch
                        .execute_step(execution_id, step, branch_context, branch_signal)
                        .await
                });
            }

            let mut merged = context;
            let mut paused = false;
            let mut exited = false;
            let mut saw_cancelled = false;
            let mut first_error: Option<PipelineError> = None;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(TreeFlow::Done(branch_context))) => merged.overlay(&branch_context),
                    Ok(Ok(TreeFlow::Paused)) => {
                        paused = true;
                        group_signal.cancel();
                    }
                    Ok(Ok(TreeFlow::Exited)) => {
                        exited = true;
                        group_signal.cancel();
                    }
                    Ok(Err(err)) if err.is_cancelled() => saw_cancelled = true,
                    Ok(Err(err)) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                        group_signal.cancel();
                    }
                    Err(join_err) if join_err.is_cancelled() => {}
                    Err(join_err) => {
                        if first_error.is_none() {
                            first_error = Some(PipelineError::StepFailed {
                                step: "sibling".to_owned(),
                                message: join_err.to_string(),
                            });
                        }
                        group_signal.cancel();
                    }
                }
            }

            if let Some(err) = first_error {
                return Err(err);
            }
            if paused {
                return Ok(TreeFlow::Paused);
            }
            if exited {
                return Ok(TreeFlow::Exited);
            }
            if saw_cancelled {
                // Cancellation arrived from outside the sibling group.
                return Err(CoreError::Cancelled.into());
            }
            let _ = this
                .deps
                .store
                .set_execution_context(execution_id, &merged)
                .await?;
            Ok(TreeFlow::Done(merged))
        })
    }

    fn execute_step(
        self: &Arc<Self>,
        execution_id: Uuid,
        step: StepDefinition,
        mut context: StepContext,
        signal: CancelSignal,
    ) -> TreeFuture {
        let this = Arc::clone(self);
        Box::pin(async move {
            // A paused or cancelled execution stops this branch with the
            // context unchanged.
            let execution = this
                .deps
                .store
                .get_execution(execution_id)
                .await?
                .ok_or_else(|| CoreError::not_found("execution", execution_id))?;
            if execution.status != ExecutionStatus::Running {
                return Ok(TreeFlow::Done(context));
            }

            if step.kind == BRANCH_KIND {
                return this.run_branch_step(&execution, &step, context, signal).await;
            }

            let step_impl = this.registry.get(&step.kind)?;
            if !step_impl.evaluate_condition(&context, step.condition.as_ref()) {
                info!(step = %step.name, "condition not met; skipping step");
                return this
                    .execute_tree(execution_id, step.children, context, signal)
                    .await;
            }

            let item_id = context.processing_item_id()?;
            this.deps
                .store
                .set_execution_current_step(execution_id, &step.name)
                .await?;
            this.deps.store.set_item_step(item_id, &step.name).await?;

            let sink = ItemProgressSink::new(Arc::clone(&this.deps.store), item_id);
            let executed = match step.timeout_secs {
                Some(secs) => {
                    match tokio::time::timeout(
                        Duration::from_secs(secs),
                        step_impl.execute(&context, &step.config, &sink, &signal),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Ok(StepOutput::failure(format!(
                            "step timed out after {secs}s"
                        ))),
                    }
                }
                None => step_impl.execute(&context, &step.config, &sink, &signal).await,
            };

            let output = match executed {
                Ok(output) => output,
                Err(err) if err.is_cancelled() => return Err(err),
                // Step errors follow the same required/continue-on-error
                // policy as explicit failure outputs.
                Err(err) => StepOutput::failure(err.item_message()),
            };

            match output {
                StepOutput::Pause { reason } => {
                    this.deps
                        .store
                        .transition_execution(
                            execution_id,
                            &[ExecutionStatus::Running],
                            ExecutionStatus::Paused,
                            Some(&reason),
                        )
                        .await?;
                    this.deps
                        .emit(
                            execution.request_id,
                            Event::ExecutionPaused {
                                execution_id,
                                reason,
                            },
                            "execution paused",
                        )
                        .await;
                    Ok(TreeFlow::Paused)
                }
                StepOutput::RetryLater { reason } => {
                    this.deps
                        .store
                        .transition_execution(
                            execution_id,
                            &[ExecutionStatus::Running],
                            ExecutionStatus::Completed,
                            None,
                        )
                        .await?;
                    this.deps
                        .emit(
                            execution.request_id,
                            Event::ExecutionCompleted { execution_id },
                            &format!("execution completed; waiting: {reason}"),
                        )
                        .await;
                    Ok(TreeFlow::Exited)
                }
                StepOutput::Skip => {
                    this.execute_tree(execution_id, step.children, context, signal)
                        .await
                }
                StepOutput::Failure { message } => {
                    if step.continue_on_error {
                        warn!(step = %step.name, message = %message, "step failed; continuing on error");
                        this.execute_tree(execution_id, step.children, context, signal)
                            .await
                    } else if step.required {
                        this.deps.store.set_item_failed(item_id, &message).await?;
                        Err(PipelineError::StepFailed {
                            step: step.name,
                            message,
                        })
                    } else {
                        warn!(step = %step.name, message = %message, "optional step failed; continuing");
                        this.execute_tree(execution_id, step.children, context, signal)
                            .await
                    }
                }
                StepOutput::Success { data, next } => {
                    let stripped = context.merge(data);
                    if !stripped.is_empty() {
                        warn!(
                            step = %step.name,
                            keys = ?stripped,
                            "step output tried to overwrite core context fields"
                        );
                    }
                    this.deps.store.set_item_context(item_id, &context).await?;
                    match next {
                        NextAction::Stop => Ok(TreeFlow::Done(context)),
                        NextAction::Continue => {
                            this.execute_tree(execution_id, step.children, context, signal)
                                .await
                        }
                    }
                }
            }
        })
    }

    async fn run_branch_step(
        self: &Arc<Self>,
        execution: &Execution,
        step: &StepDefinition,
        context: StepContext,
        signal: CancelSignal,
    ) -> PipelineResult<TreeFlow> {
        let items = self
            .deps
            .store
            .items_for_request(execution.request_id)
            .await?;
        let branch_items: Vec<_> = items
            .into_iter()
            .filter(|item| {
                matches!(
                    item.status,
                    ItemStatus::Downloaded
                        | ItemStatus::Encoding
                        | ItemStatus::Encoded
                        | ItemStatus::Delivering
                )
            })
            .collect();
        if branch_items.is_empty() {
            return Ok(TreeFlow::Done(context));
        }

        let mut set: JoinSet<()> = JoinSet::new();
        for item in branch_items {
            let mut child_context = context.scoped_to_item(item.id);
            child_context.overlay(&item.step_context);
            let child = Execution {
                id: Uuid::new_v4(),
                request_id: execution.request_id,
                template_id: execution.template_id,
                steps: step.children.clone(),
                status: ExecutionStatus::Running,
                current_step: None,
                parent_execution_id: Some(execution.id),
                episode_item_id: Some(item.id),
                context: child_context,
                pause_reason: None,
                error: None,
                started_at: Utc::now(),
                finished_at: None,
            };
            self.deps.store.insert_execution(&child).await?;

            let this = Arc::clone(self);
            let child_signal = signal.child();
            this.register(child.id, child_signal.clone());
            set.spawn(async move {
                let child_id = child.id;
                let outcome = this.drive(&child, child_signal).await;
                this.unregister(child_id);
                if let Err(err) = this.finish(&child, outcome).await {
                    error!(error = %err, execution_id = %child_id, "branch execution bookkeeping failed");
                }
            });
        }

        // Branch children settle independently; the parent only waits here
        // before moving past the branch step.
        while set.join_next().await.is_some() {}
        Ok(TreeFlow::Done(context))
    }
}
