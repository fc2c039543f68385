//! Periodic sweeps: retry waiting items, reap stuck executions, check
//! download health and watch for newly aired episodes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use annex_core::{AssignmentStatus, ExecutionStatus, ItemStatus};
use annex_events::Event;
use annex_pipeline::{PipelineDeps, PipelineExecutor};

use crate::error::AppResult;

/// Background sweep driver.
pub struct Scheduler {
    deps: Arc<PipelineDeps>,
    executor: Arc<PipelineExecutor>,
}

impl Scheduler {
    /// Build the scheduler over shared dependencies and the executor.
    #[must_use]
    pub const fn new(deps: Arc<PipelineDeps>, executor: Arc<PipelineExecutor>) -> Self {
        Self { deps, executor }
    }

    /// Spawn every periodic sweep on its own task. The handles run until the
    /// process exits.
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let cadences = self.deps.settings.scheduler;
        vec![
            self.spawn_loop(Duration::from_secs(cadences.retry_sweep_secs), |s| {
                Box::pin(async move { s.retry_sweep().await })
            }),
            self.spawn_loop(Duration::from_secs(cadences.stuck_sweep_secs), |s| {
                Box::pin(async move { s.stuck_sweep().await })
            }),
            self.spawn_loop(Duration::from_secs(cadences.download_health_secs), |s| {
                Box::pin(async move { s.download_health_sweep().await })
            }),
            self.spawn_loop(Duration::from_secs(cadences.new_episode_sweep_secs), |s| {
                Box::pin(async move { s.new_episode_sweep().await })
            }),
        ]
    }

    fn spawn_loop<F>(self: &Arc<Self>, period: Duration, sweep: F) -> JoinHandle<()>
    where
        F: for<'a> Fn(
                &'a Arc<Self>,
            )
                -> std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<()>> + Send + 'a>>
            + Send
            + Sync
            + 'static,
    {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = sweep(&scheduler).await {
                    warn!(error = %err, "scheduler sweep failed");
                }
            }
        })
    }

    async fn request_has_active_execution(&self, request_id: Uuid) -> AppResult<bool> {
        Ok(self
            .deps
            .store
            .latest_execution_for_request(request_id)
            .await?
            .is_some_and(|execution| {
                matches!(
                    execution.status,
                    ExecutionStatus::Running | ExecutionStatus::Paused
                )
            }))
    }

    async fn rearm_request(&self, request_id: Uuid) -> AppResult<()> {
        if self.request_has_active_execution(request_id).await? {
            return Ok(());
        }
        let execution_id = self.executor.start(request_id, None).await?;
        self.executor.spawn_run(execution_id);
        Ok(())
    }

    /// Move waiting items whose retry time elapsed back to pending and
    /// reactivate their requests. Public so operators can trigger the sweep
    /// on demand.
    ///
    /// # Errors
    ///
    /// Fails when the store is unreachable.
    pub async fn retry_sweep(self: &Arc<Self>) -> AppResult<()> {
        let due = self.deps.store.due_retry_items(Utc::now()).await?;
        if due.is_empty() {
            return Ok(());
        }
        let mut requests: HashSet<Uuid> = HashSet::new();
        for item in due {
            self.deps
                .store
                .transition_item(
                    item.id,
                    &[ItemStatus::Awaiting, ItemStatus::QualityUnavailable],
                    ItemStatus::Pending,
                )
                .await?;
            self.deps.store.set_item_retry_at(item.id, None).await?;
            requests.insert(item.request_id);
        }
        info!(requests = requests.len(), "retry sweep re-arming requests");
        for request_id in requests {
            if let Err(err) = self.rearm_request(request_id).await {
                warn!(error = %err, request_id = %request_id, "failed to re-arm request");
            }
        }
        Ok(())
    }

    /// Reap executions with no observable progress inside the stuck window.
    ///
    /// # Errors
    ///
    /// Fails when the store is unreachable.
    pub async fn stuck_sweep(self: &Arc<Self>) -> AppResult<()> {
        let threshold = i64::try_from(self.deps.settings.scheduler.stuck_threshold_secs)
            .unwrap_or(3_600);
        let cutoff = Utc::now() - ChronoDuration::seconds(threshold);

        // Encoder assignments that stopped reporting.
        for assignment in self.deps.store.stale_assignments(cutoff).await? {
            warn!(
                job_id = %assignment.job_id,
                item_id = %assignment.item_id,
                "encode assignment made no progress inside the stuck window"
            );
            self.deps
                .store
                .transition_assignment(
                    assignment.job_id,
                    &[
                        AssignmentStatus::Pending,
                        AssignmentStatus::Assigned,
                        AssignmentStatus::Encoding,
                    ],
                    AssignmentStatus::Failed,
                    Some("no progress for over 1 hour"),
                )
                .await?;
            let _ = self
                .deps
                .encoders
                .cancel(assignment.job_id, "no progress for over 1 hour")
                .await;
            self.reap_request(assignment.request_id).await?;
        }

        // Requests whose executions run without any state movement.
        for execution in self.deps.store.running_executions().await? {
            let Some(request) = self.deps.store.get_request(execution.request_id).await? else {
                continue;
            };
            if request.updated_at < cutoff {
                self.reap_request(request.id).await?;
            }
        }
        Ok(())
    }

    async fn reap_request(&self, request_id: Uuid) -> AppResult<()> {
        let Some(execution) = self
            .deps
            .store
            .latest_execution_for_request(request_id)
            .await?
        else {
            return Ok(());
        };
        let reaped = self
            .deps
            .store
            .transition_execution(
                execution.id,
                &[ExecutionStatus::Running],
                ExecutionStatus::Failed,
                Some("no progress for over 1 hour"),
            )
            .await?;
        if !reaped {
            return Ok(());
        }
        self.deps
            .emit(
                request_id,
                Event::StuckExecutionReaped {
                    execution_id: execution.id,
                },
                "stuck execution reaped",
            )
            .await;
        for item in self.deps.store.items_for_request(request_id).await? {
            if !item.status.is_terminal() {
                self.deps
                    .store
                    .set_item_failed(item.id, "no progress for over 1 hour")
                    .await?;
            }
        }
        Ok(())
    }

    /// Re-arm monitoring for downloads that lost their execution.
    ///
    /// # Errors
    ///
    /// Fails when the store is unreachable.
    pub async fn download_health_sweep(self: &Arc<Self>) -> AppResult<()> {
        let stall_window = i64::try_from(self.deps.settings.download.stall_window_secs)
            .unwrap_or(1_800);
        let cutoff = Utc::now() - ChronoDuration::seconds(stall_window);
        for download in self.deps.store.active_downloads().await? {
            if download.updated_at >= cutoff {
                continue;
            }
            if self
                .request_has_active_execution(download.request_id)
                .await?
            {
                continue;
            }
            info!(
                download_id = %download.id,
                request_id = %download.request_id,
                "active download has no monitor; re-arming its request"
            );
            if let Err(err) = self.rearm_request(download.request_id).await {
                warn!(error = %err, request_id = %download.request_id, "failed to re-arm download monitor");
            }
        }
        Ok(())
    }

    /// Transition awaiting episodes whose air date passed and refresh their
    /// requests.
    ///
    /// # Errors
    ///
    /// Fails when the store or metadata provider is unreachable.
    pub async fn new_episode_sweep(self: &Arc<Self>) -> AppResult<()> {
        let today = Utc::now().date_naive();
        for request in self.deps.store.subscribed_tv_requests().await? {
            let items = self.deps.store.items_for_request(request.id).await?;
            let mut aired_any = false;
            for item in &items {
                if item.status == ItemStatus::Awaiting
                    && item.air_date.is_some_and(|air| air <= today)
                {
                    self.deps
                        .store
                        .transition_item(item.id, &[ItemStatus::Awaiting], ItemStatus::Pending)
                        .await?;
                    self.deps.store.set_item_retry_at(item.id, None).await?;
                    aired_any = true;
                }
            }
            if aired_any {
                info!(request_id = %request.id, "newly aired episodes moved to pending");
                if let Err(err) = self.rearm_request(request.id).await {
                    warn!(error = %err, request_id = %request.id, "failed to re-arm tv request");
                }
            }
        }
        Ok(())
    }
}
