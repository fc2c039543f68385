//! Persistence trait every component commits state transitions through.
//!
//! # Design
//! - Conditional transitions (`transition_*`) take the set of expected
//!   current states and report whether the write applied, so the executor,
//!   the API facade and the scheduler stay safe under concurrent mutation.
//! - Deletes cascade top-down from the request inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::context::StepContext;
use crate::error::CoreResult;
use crate::model::{
    ActivityEntry, AssignmentStatus, Download, DownloadStatus, EncodeAssignment, EncodeProfile,
    Execution, ExecutionStatus, ItemStatus, MediaKind, PipelineTemplate, ProcessingItem, Release,
    Request, Resolution, ServerConfig,
};

/// Durable persistence of requests, items, downloads, executions, templates,
/// assignments, activity and the library cache.
#[async_trait]
pub trait Store: Send + Sync {
    // --- requests ---

    /// Insert a new request row.
    async fn insert_request(&self, request: &Request) -> CoreResult<()>;

    /// Fetch a request by id.
    async fn get_request(&self, id: Uuid) -> CoreResult<Option<Request>>;

    /// List requests sorted by creation time, newest first.
    async fn list_requests(&self, limit: i64) -> CoreResult<Vec<Request>>;

    /// Delete a request, cascading to items, downloads, executions,
    /// assignments and activity. Returns whether a row was removed.
    async fn delete_request(&self, id: Uuid) -> CoreResult<bool>;

    /// Pin or clear the selected release on a request.
    async fn pin_release(&self, id: Uuid, release: Option<&Release>) -> CoreResult<()>;

    /// Replace the stored below-quality candidates on a request.
    async fn set_available_releases(&self, id: Uuid, releases: &[Release]) -> CoreResult<()>;

    /// Record the derived required resolution on a request.
    async fn set_required_resolution(&self, id: Uuid, resolution: Resolution) -> CoreResult<()>;

    /// Bump a request's `updated_at` without other changes.
    async fn touch_request(&self, id: Uuid) -> CoreResult<()>;

    /// Set or clear a request's completion timestamp.
    async fn set_request_completed(&self, id: Uuid, at: Option<DateTime<Utc>>) -> CoreResult<()>;

    /// List TV requests the scheduler watches for new episodes.
    async fn subscribed_tv_requests(&self) -> CoreResult<Vec<Request>>;

    // --- processing items ---

    /// Insert a batch of processing items.
    async fn insert_items(&self, items: &[ProcessingItem]) -> CoreResult<()>;

    /// Fetch an item by id.
    async fn get_item(&self, id: Uuid) -> CoreResult<Option<ProcessingItem>>;

    /// List the items of a request, oldest first.
    async fn items_for_request(&self, request_id: Uuid) -> CoreResult<Vec<ProcessingItem>>;

    /// List the items fed by a download.
    async fn items_for_download(&self, download_id: Uuid) -> CoreResult<Vec<ProcessingItem>>;

    /// Move an item from one of the expected states into `to`. Returns
    /// whether the transition applied.
    async fn transition_item(
        &self,
        id: Uuid,
        from: &[ItemStatus],
        to: ItemStatus,
    ) -> CoreResult<bool>;

    /// Mark an item failed with a compact error string, bumping attempts.
    async fn set_item_failed(&self, id: Uuid, error: &str) -> CoreResult<()>;

    /// Update an item's display progress.
    async fn set_item_progress(&self, id: Uuid, progress: u8) -> CoreResult<()>;

    /// Record the step currently owning an item.
    async fn set_item_step(&self, id: Uuid, step: &str) -> CoreResult<()>;

    /// Persist an item's accreted step context.
    async fn set_item_context(&self, id: Uuid, context: &StepContext) -> CoreResult<()>;

    /// Attach or detach the download feeding an item.
    async fn link_item_download(&self, id: Uuid, download_id: Option<Uuid>) -> CoreResult<()>;

    /// Attach or detach the encode job running for an item.
    async fn link_item_encode_job(&self, id: Uuid, job_id: Option<Uuid>) -> CoreResult<()>;

    /// Set or clear the earliest retry time for an awaiting item.
    async fn set_item_retry_at(&self, id: Uuid, at: Option<DateTime<Utc>>) -> CoreResult<()>;

    /// Clear `last_error` on every item of a request.
    async fn clear_item_errors(&self, request_id: Uuid) -> CoreResult<()>;

    /// Reset an item to `pending` for an explicit retry, clearing error,
    /// retry time and progress while keeping the step context for resume.
    async fn reset_item_for_retry(&self, id: Uuid) -> CoreResult<()>;

    /// List items due for a scheduler retry: awaiting or quality-unavailable
    /// items whose retry time elapsed, plus pending items explicitly
    /// re-armed with a retry time (exhausted downloads).
    async fn due_retry_items(&self, now: DateTime<Utc>) -> CoreResult<Vec<ProcessingItem>>;

    // --- downloads ---

    /// Insert a new download row. Fails when the torrent hash exists.
    async fn insert_download(&self, download: &Download) -> CoreResult<()>;

    /// Fetch a download by id.
    async fn get_download(&self, id: Uuid) -> CoreResult<Option<Download>>;

    /// Fetch a download by torrent hash.
    async fn get_download_by_hash(&self, hash: &str) -> CoreResult<Option<Download>>;

    /// List the downloads of a request.
    async fn downloads_for_request(&self, request_id: Uuid) -> CoreResult<Vec<Download>>;

    /// List downloads still transferring, across all requests.
    async fn active_downloads(&self) -> CoreResult<Vec<Download>>;

    /// Move a download from one of the expected states into `to`. Returns
    /// whether the transition applied.
    async fn transition_download(
        &self,
        id: Uuid,
        from: &[DownloadStatus],
        to: DownloadStatus,
    ) -> CoreResult<bool>;

    /// Update transfer telemetry on a download.
    async fn update_download_transfer(
        &self,
        id: Uuid,
        progress: f64,
        seeders: i32,
        peers: i32,
    ) -> CoreResult<()>;

    /// Record the client-reported save and content paths.
    async fn set_download_paths(
        &self,
        id: Uuid,
        save_path: Option<&str>,
        content_path: Option<&str>,
    ) -> CoreResult<()>;

    /// Replace the ordered alternative releases on a download.
    async fn set_download_alternatives(&self, id: Uuid, releases: &[Release]) -> CoreResult<()>;

    /// Point a download at a replacement torrent after alternative rotation,
    /// resetting transfer state to pending.
    async fn replace_download_torrent(
        &self,
        id: Uuid,
        torrent_hash: &str,
        name: &str,
    ) -> CoreResult<()>;

    /// Delete a download row.
    async fn delete_download(&self, id: Uuid) -> CoreResult<()>;

    // --- executions ---

    /// Insert a new execution row.
    async fn insert_execution(&self, execution: &Execution) -> CoreResult<()>;

    /// Fetch an execution by id.
    async fn get_execution(&self, id: Uuid) -> CoreResult<Option<Execution>>;

    /// Fetch the most recently started execution of a request.
    async fn latest_execution_for_request(&self, request_id: Uuid)
    -> CoreResult<Option<Execution>>;

    /// Move an execution from one of the expected states into `to`,
    /// recording `note` as pause reason or error depending on the target
    /// state. Returns whether the transition applied.
    async fn transition_execution(
        &self,
        id: Uuid,
        from: &[ExecutionStatus],
        to: ExecutionStatus,
        note: Option<&str>,
    ) -> CoreResult<bool>;

    /// Persist the merged context onto an execution, only while it is still
    /// running. Returns whether the write applied.
    async fn set_execution_context(&self, id: Uuid, context: &StepContext) -> CoreResult<bool>;

    /// Record the step an execution most recently entered.
    async fn set_execution_current_step(&self, id: Uuid, step: &str) -> CoreResult<()>;

    /// Delete all executions of a request (stale-state cleanup).
    async fn delete_executions_for_request(&self, request_id: Uuid) -> CoreResult<()>;

    /// List executions currently in the running state.
    async fn running_executions(&self) -> CoreResult<Vec<Execution>>;

    /// List the branch executions spawned under a parent execution.
    async fn child_executions(&self, parent_id: Uuid) -> CoreResult<Vec<Execution>>;

    // --- activity log ---

    /// Append an activity entry for a request.
    async fn append_activity(
        &self,
        request_id: Uuid,
        kind: &str,
        message: &str,
        details: Value,
    ) -> CoreResult<()>;

    /// List the newest activity entries of a request.
    async fn activity_for_request(
        &self,
        request_id: Uuid,
        limit: i64,
    ) -> CoreResult<Vec<ActivityEntry>>;

    // --- library cache ---

    /// Record that a server's library holds the given title.
    async fn upsert_library_entry(
        &self,
        tmdb_id: i64,
        kind: MediaKind,
        server_id: Uuid,
        path: &str,
    ) -> CoreResult<()>;

    /// Whether a server's library already holds the given title.
    async fn has_library_entry(
        &self,
        tmdb_id: i64,
        kind: MediaKind,
        server_id: Uuid,
    ) -> CoreResult<bool>;

    /// Record that a server's library holds the given episode.
    async fn upsert_episode_entry(
        &self,
        tmdb_id: i64,
        season: i32,
        episode: i32,
        server_id: Uuid,
    ) -> CoreResult<()>;

    /// Whether a server's library already holds the given episode.
    async fn has_episode_entry(
        &self,
        tmdb_id: i64,
        season: i32,
        episode: i32,
        server_id: Uuid,
    ) -> CoreResult<bool>;

    // --- pipeline templates ---

    /// Insert a template.
    async fn insert_template(&self, template: &PipelineTemplate) -> CoreResult<()>;

    /// Fetch a template by id.
    async fn get_template(&self, id: Uuid) -> CoreResult<Option<PipelineTemplate>>;

    /// Fetch the default template for a media kind.
    async fn default_template(&self, kind: MediaKind) -> CoreResult<Option<PipelineTemplate>>;

    /// List all templates.
    async fn list_templates(&self) -> CoreResult<Vec<PipelineTemplate>>;

    // --- encode assignments ---

    /// Create an assignment unless one exists for the job id. Returns
    /// whether a row was created.
    async fn create_assignment_if_absent(&self, assignment: &EncodeAssignment)
    -> CoreResult<bool>;

    /// Fetch an assignment by job id.
    async fn get_assignment(&self, job_id: Uuid) -> CoreResult<Option<EncodeAssignment>>;

    /// Move an assignment from one of the expected states into `to`,
    /// recording an error detail when provided. Returns whether the
    /// transition applied.
    async fn transition_assignment(
        &self,
        job_id: Uuid,
        from: &[AssignmentStatus],
        to: AssignmentStatus,
        error: Option<&str>,
    ) -> CoreResult<bool>;

    /// Mirror pool-reported progress onto an assignment, bumping its
    /// `updated_at`.
    async fn set_assignment_progress(&self, job_id: Uuid, progress: f64) -> CoreResult<()>;

    /// List assignments of a request that can still make progress.
    async fn active_assignments_for_request(
        &self,
        request_id: Uuid,
    ) -> CoreResult<Vec<EncodeAssignment>>;

    /// List active assignments whose last update is older than `cutoff`.
    async fn stale_assignments(
        &self,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<EncodeAssignment>>;

    // --- servers and profiles ---

    /// Insert or update a storage server.
    async fn upsert_server(&self, server: &ServerConfig) -> CoreResult<()>;

    /// Fetch a storage server by id.
    async fn get_server(&self, id: Uuid) -> CoreResult<Option<ServerConfig>>;

    /// List all storage servers.
    async fn list_servers(&self) -> CoreResult<Vec<ServerConfig>>;

    /// Insert or update an encode profile.
    async fn upsert_profile(&self, profile: &EncodeProfile) -> CoreResult<()>;

    /// Fetch an encode profile by id.
    async fn get_profile(&self, id: Uuid) -> CoreResult<Option<EncodeProfile>>;

    /// Fetch the system default encode profile, when one is configured.
    async fn default_profile(&self) -> CoreResult<Option<EncodeProfile>>;
}
