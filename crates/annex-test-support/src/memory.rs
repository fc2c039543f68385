//! In-memory [`Store`] implementation with the same conditional-write
//! semantics as the Postgres store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use annex_core::{
    ActivityEntry, AssignmentStatus, CoreResult, Download, DownloadStatus, EncodeAssignment,
    EncodeProfile, Execution, ExecutionStatus, ItemStatus, MediaKind, PipelineTemplate,
    ProcessingItem, Release, Request, Resolution, ServerConfig, StepContext, Store,
};

#[derive(Default)]
struct Inner {
    requests: HashMap<Uuid, Request>,
    items: HashMap<Uuid, ProcessingItem>,
    downloads: HashMap<Uuid, Download>,
    executions: HashMap<Uuid, Execution>,
    activity: Vec<ActivityEntry>,
    activity_seq: i64,
    library: HashMap<(i64, String, Uuid), String>,
    episodes: HashMap<(i64, i32, i32, Uuid), ()>,
    templates: HashMap<Uuid, PipelineTemplate>,
    assignments: HashMap<Uuid, EncodeAssignment>,
    servers: HashMap<Uuid, ServerConfig>,
    profiles: HashMap<Uuid, EncodeProfile>,
}

/// In-memory store used by unit and scenario tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Build an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn sort_items(mut items: Vec<ProcessingItem>) -> Vec<ProcessingItem> {
    items.sort_by_key(|item| (item.season, item.episode, item.created_at));
    items
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_request(&self, request: &Request) -> CoreResult<()> {
        self.lock().requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> CoreResult<Option<Request>> {
        Ok(self.lock().requests.get(&id).cloned())
    }

    async fn list_requests(&self, limit: i64) -> CoreResult<Vec<Request>> {
        let mut requests: Vec<Request> = self.lock().requests.values().cloned().collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(requests)
    }

    async fn delete_request(&self, id: Uuid) -> CoreResult<bool> {
        let mut inner = self.lock();
        let existed = inner.requests.remove(&id).is_some();
        inner.items.retain(|_, item| item.request_id != id);
        inner.downloads.retain(|_, download| download.request_id != id);
        inner
            .executions
            .retain(|_, execution| execution.request_id != id);
        inner.activity.retain(|entry| entry.request_id != id);
        inner
            .assignments
            .retain(|_, assignment| assignment.request_id != id);
        Ok(existed)
    }

    async fn pin_release(&self, id: Uuid, release: Option<&Release>) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(request) = inner.requests.get_mut(&id) {
            request.selected_release = release.cloned();
            request.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_available_releases(&self, id: Uuid, releases: &[Release]) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(request) = inner.requests.get_mut(&id) {
            request.available_releases = releases.to_vec();
            request.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_required_resolution(&self, id: Uuid, resolution: Resolution) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(request) = inner.requests.get_mut(&id) {
            request.required_resolution = Some(resolution);
            request.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch_request(&self, id: Uuid) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(request) = inner.requests.get_mut(&id) {
            request.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_request_completed(&self, id: Uuid, at: Option<DateTime<Utc>>) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(request) = inner.requests.get_mut(&id) {
            request.completed_at = at;
            request.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn subscribed_tv_requests(&self) -> CoreResult<Vec<Request>> {
        let mut requests: Vec<Request> = self
            .lock()
            .requests
            .values()
            .filter(|request| request.kind == MediaKind::Tv && request.subscribed)
            .cloned()
            .collect();
        requests.sort_by_key(|request| request.created_at);
        Ok(requests)
    }

    async fn insert_items(&self, items: &[ProcessingItem]) -> CoreResult<()> {
        let mut inner = self.lock();
        for item in items {
            inner.items.insert(item.id, item.clone());
        }
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> CoreResult<Option<ProcessingItem>> {
        Ok(self.lock().items.get(&id).cloned())
    }

    async fn items_for_request(&self, request_id: Uuid) -> CoreResult<Vec<ProcessingItem>> {
        let items: Vec<ProcessingItem> = self
            .lock()
            .items
            .values()
            .filter(|item| item.request_id == request_id)
            .cloned()
            .collect();
        Ok(sort_items(items))
    }

    async fn items_for_download(&self, download_id: Uuid) -> CoreResult<Vec<ProcessingItem>> {
        let items: Vec<ProcessingItem> = self
            .lock()
            .items
            .values()
            .filter(|item| item.download_id == Some(download_id))
            .cloned()
            .collect();
        Ok(sort_items(items))
    }

    async fn transition_item(
        &self,
        id: Uuid,
        from: &[ItemStatus],
        to: ItemStatus,
    ) -> CoreResult<bool> {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&id)
            && from.contains(&item.status)
        {
            item.status = to;
            item.updated_at = Utc::now();
            return Ok(true);
        }
        Ok(false)
    }

    async fn set_item_failed(&self, id: Uuid, error: &str) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&id) {
            item.status = ItemStatus::Failed;
            item.last_error = Some(error.to_owned());
            item.attempts += 1;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_item_progress(&self, id: Uuid, progress: u8) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&id) {
            item.progress = progress.min(100);
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_item_step(&self, id: Uuid, step: &str) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&id) {
            item.current_step = Some(step.to_owned());
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_item_context(&self, id: Uuid, context: &StepContext) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&id) {
            item.step_context = context.clone();
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn link_item_download(&self, id: Uuid, download_id: Option<Uuid>) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&id) {
            item.download_id = download_id;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn link_item_encode_job(&self, id: Uuid, job_id: Option<Uuid>) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&id) {
            item.encode_job_id = job_id;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_item_retry_at(&self, id: Uuid, at: Option<DateTime<Utc>>) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&id) {
            item.next_retry_at = at;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn clear_item_errors(&self, request_id: Uuid) -> CoreResult<()> {
        let mut inner = self.lock();
        for item in inner
            .items
            .values_mut()
            .filter(|item| item.request_id == request_id)
        {
            item.last_error = None;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reset_item_for_retry(&self, id: Uuid) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&id) {
            item.status = ItemStatus::Pending;
            item.last_error = None;
            item.next_retry_at = None;
            item.progress = 0;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn due_retry_items(&self, now: DateTime<Utc>) -> CoreResult<Vec<ProcessingItem>> {
        let items: Vec<ProcessingItem> = self
            .lock()
            .items
            .values()
            .filter(|item| match item.status {
                ItemStatus::Awaiting | ItemStatus::QualityUnavailable => {
                    item.next_retry_at.is_none_or(|at| at <= now)
                }
                ItemStatus::Pending => item.next_retry_at.is_some_and(|at| at <= now),
                _ => false,
            })
            .cloned()
            .collect();
        Ok(sort_items(items))
    }

    async fn insert_download(&self, download: &Download) -> CoreResult<()> {
        self.lock().downloads.insert(download.id, download.clone());
        Ok(())
    }

    async fn get_download(&self, id: Uuid) -> CoreResult<Option<Download>> {
        Ok(self.lock().downloads.get(&id).cloned())
    }

    async fn get_download_by_hash(&self, hash: &str) -> CoreResult<Option<Download>> {
        Ok(self
            .lock()
            .downloads
            .values()
            .find(|download| download.torrent_hash == hash)
            .cloned())
    }

    async fn downloads_for_request(&self, request_id: Uuid) -> CoreResult<Vec<Download>> {
        let mut downloads: Vec<Download> = self
            .lock()
            .downloads
            .values()
            .filter(|download| download.request_id == request_id)
            .cloned()
            .collect();
        downloads.sort_by_key(|download| download.created_at);
        Ok(downloads)
    }

    async fn active_downloads(&self) -> CoreResult<Vec<Download>> {
        Ok(self
            .lock()
            .downloads
            .values()
            .filter(|download| download.status.is_active())
            .cloned()
            .collect())
    }

    async fn transition_download(
        &self,
        id: Uuid,
        from: &[DownloadStatus],
        to: DownloadStatus,
    ) -> CoreResult<bool> {
        let mut inner = self.lock();
        if let Some(download) = inner.downloads.get_mut(&id)
            && from.contains(&download.status)
        {
            download.status = to;
            download.updated_at = Utc::now();
            return Ok(true);
        }
        Ok(false)
    }

    async fn update_download_transfer(
        &self,
        id: Uuid,
        progress: f64,
        seeders: i32,
        peers: i32,
    ) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(download) = inner.downloads.get_mut(&id) {
            download.progress = progress.clamp(0.0, 100.0);
            download.seeders = seeders;
            download.peers = peers;
            download.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_download_paths(
        &self,
        id: Uuid,
        save_path: Option<&str>,
        content_path: Option<&str>,
    ) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(download) = inner.downloads.get_mut(&id) {
            if let Some(save) = save_path {
                download.save_path = Some(save.to_owned());
            }
            if let Some(content) = content_path {
                download.content_path = Some(content.to_owned());
            }
            download.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_download_alternatives(&self, id: Uuid, releases: &[Release]) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(download) = inner.downloads.get_mut(&id) {
            download.alternatives = releases.to_vec();
            download.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn replace_download_torrent(
        &self,
        id: Uuid,
        torrent_hash: &str,
        name: &str,
    ) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(download) = inner.downloads.get_mut(&id) {
            download.torrent_hash = torrent_hash.to_owned();
            download.name = name.to_owned();
            download.status = DownloadStatus::Pending;
            download.progress = 0.0;
            download.seeders = 0;
            download.peers = 0;
            download.save_path = None;
            download.content_path = None;
            download.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_download(&self, id: Uuid) -> CoreResult<()> {
        self.lock().downloads.remove(&id);
        Ok(())
    }

    async fn insert_execution(&self, execution: &Execution) -> CoreResult<()> {
        self.lock()
            .executions
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> CoreResult<Option<Execution>> {
        Ok(self.lock().executions.get(&id).cloned())
    }

    async fn latest_execution_for_request(
        &self,
        request_id: Uuid,
    ) -> CoreResult<Option<Execution>> {
        Ok(self
            .lock()
            .executions
            .values()
            .filter(|execution| execution.request_id == request_id)
            .max_by_key(|execution| execution.started_at)
            .cloned())
    }

    async fn transition_execution(
        &self,
        id: Uuid,
        from: &[ExecutionStatus],
        to: ExecutionStatus,
        note: Option<&str>,
    ) -> CoreResult<bool> {
        let mut inner = self.lock();
        if let Some(execution) = inner.executions.get_mut(&id)
            && from.contains(&execution.status)
        {
            execution.status = to;
            match to {
                ExecutionStatus::Paused => {
                    execution.pause_reason = note.map(ToOwned::to_owned);
                }
                ExecutionStatus::Failed => {
                    execution.error = note.map(ToOwned::to_owned);
                    execution.finished_at = Some(Utc::now());
                }
                ExecutionStatus::Completed | ExecutionStatus::Cancelled => {
                    execution.finished_at = Some(Utc::now());
                }
                ExecutionStatus::Running => {}
            }
            return Ok(true);
        }
        Ok(false)
    }

    async fn set_execution_context(&self, id: Uuid, context: &StepContext) -> CoreResult<bool> {
        let mut inner = self.lock();
        if let Some(execution) = inner.executions.get_mut(&id)
            && execution.status == ExecutionStatus::Running
        {
            execution.context = context.clone();
            return Ok(true);
        }
        Ok(false)
    }

    async fn set_execution_current_step(&self, id: Uuid, step: &str) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(execution) = inner.executions.get_mut(&id) {
            execution.current_step = Some(step.to_owned());
        }
        Ok(())
    }

    async fn delete_executions_for_request(&self, request_id: Uuid) -> CoreResult<()> {
        self.lock()
            .executions
            .retain(|_, execution| execution.request_id != request_id);
        Ok(())
    }

    async fn running_executions(&self) -> CoreResult<Vec<Execution>> {
        Ok(self
            .lock()
            .executions
            .values()
            .filter(|execution| execution.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }

    async fn child_executions(&self, parent_id: Uuid) -> CoreResult<Vec<Execution>> {
        let mut children: Vec<Execution> = self
            .lock()
            .executions
            .values()
            .filter(|execution| execution.parent_execution_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|execution| execution.started_at);
        Ok(children)
    }

    async fn append_activity(
        &self,
        request_id: Uuid,
        kind: &str,
        message: &str,
        details: Value,
    ) -> CoreResult<()> {
        let mut inner = self.lock();
        inner.activity_seq += 1;
        let entry = ActivityEntry {
            seq: inner.activity_seq,
            request_id,
            kind: kind.to_owned(),
            message: message.to_owned(),
            details,
            at: Utc::now(),
        };
        inner.activity.push(entry);
        Ok(())
    }

    async fn activity_for_request(
        &self,
        request_id: Uuid,
        limit: i64,
    ) -> CoreResult<Vec<ActivityEntry>> {
        let mut entries: Vec<ActivityEntry> = self
            .lock()
            .activity
            .iter()
            .filter(|entry| entry.request_id == request_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(entries)
    }

    async fn upsert_library_entry(
        &self,
        tmdb_id: i64,
        kind: MediaKind,
        server_id: Uuid,
        path: &str,
    ) -> CoreResult<()> {
        self.lock()
            .library
            .insert((tmdb_id, kind.as_str().to_owned(), server_id), path.to_owned());
        Ok(())
    }

    async fn has_library_entry(
        &self,
        tmdb_id: i64,
        kind: MediaKind,
        server_id: Uuid,
    ) -> CoreResult<bool> {
        Ok(self
            .lock()
            .library
            .contains_key(&(tmdb_id, kind.as_str().to_owned(), server_id)))
    }

    async fn upsert_episode_entry(
        &self,
        tmdb_id: i64,
        season: i32,
        episode: i32,
        server_id: Uuid,
    ) -> CoreResult<()> {
        self.lock()
            .episodes
            .insert((tmdb_id, season, episode, server_id), ());
        Ok(())
    }

    async fn has_episode_entry(
        &self,
        tmdb_id: i64,
        season: i32,
        episode: i32,
        server_id: Uuid,
    ) -> CoreResult<bool> {
        Ok(self
            .lock()
            .episodes
            .contains_key(&(tmdb_id, season, episode, server_id)))
    }

    async fn insert_template(&self, template: &PipelineTemplate) -> CoreResult<()> {
        self.lock().templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> CoreResult<Option<PipelineTemplate>> {
        Ok(self.lock().templates.get(&id).cloned())
    }

    async fn default_template(&self, kind: MediaKind) -> CoreResult<Option<PipelineTemplate>> {
        Ok(self
            .lock()
            .templates
            .values()
            .filter(|template| template.media_kind == kind && template.is_default)
            .max_by_key(|template| template.version)
            .cloned())
    }

    async fn list_templates(&self) -> CoreResult<Vec<PipelineTemplate>> {
        let mut templates: Vec<PipelineTemplate> =
            self.lock().templates.values().cloned().collect();
        templates.sort_by_key(|template| template.created_at);
        Ok(templates)
    }

    async fn create_assignment_if_absent(
        &self,
        assignment: &EncodeAssignment,
    ) -> CoreResult<bool> {
        let mut inner = self.lock();
        if inner.assignments.contains_key(&assignment.job_id) {
            return Ok(false);
        }
        inner
            .assignments
            .insert(assignment.job_id, assignment.clone());
        Ok(true)
    }

    async fn get_assignment(&self, job_id: Uuid) -> CoreResult<Option<EncodeAssignment>> {
        Ok(self.lock().assignments.get(&job_id).cloned())
    }

    async fn transition_assignment(
        &self,
        job_id: Uuid,
        from: &[AssignmentStatus],
        to: AssignmentStatus,
        error: Option<&str>,
    ) -> CoreResult<bool> {
        let mut inner = self.lock();
        if let Some(assignment) = inner.assignments.get_mut(&job_id)
            && from.contains(&assignment.status)
        {
            assignment.status = to;
            if let Some(error) = error {
                assignment.error = Some(error.to_owned());
            }
            assignment.updated_at = Utc::now();
            return Ok(true);
        }
        Ok(false)
    }

    async fn set_assignment_progress(&self, job_id: Uuid, progress: f64) -> CoreResult<()> {
        let mut inner = self.lock();
        if let Some(assignment) = inner.assignments.get_mut(&job_id) {
            assignment.progress = progress.clamp(0.0, 100.0);
            assignment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn active_assignments_for_request(
        &self,
        request_id: Uuid,
    ) -> CoreResult<Vec<EncodeAssignment>> {
        Ok(self
            .lock()
            .assignments
            .values()
            .filter(|assignment| {
                assignment.request_id == request_id && assignment.status.is_active()
            })
            .cloned()
            .collect())
    }

    async fn stale_assignments(
        &self,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<EncodeAssignment>> {
        Ok(self
            .lock()
            .assignments
            .values()
            .filter(|assignment| assignment.status.is_active() && assignment.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn upsert_server(&self, server: &ServerConfig) -> CoreResult<()> {
        self.lock().servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn get_server(&self, id: Uuid) -> CoreResult<Option<ServerConfig>> {
        Ok(self.lock().servers.get(&id).cloned())
    }

    async fn list_servers(&self) -> CoreResult<Vec<ServerConfig>> {
        let mut servers: Vec<ServerConfig> = self.lock().servers.values().cloned().collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(servers)
    }

    async fn upsert_profile(&self, profile: &EncodeProfile) -> CoreResult<()> {
        self.lock().profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn get_profile(&self, id: Uuid) -> CoreResult<Option<EncodeProfile>> {
        Ok(self.lock().profiles.get(&id).cloned())
    }

    async fn default_profile(&self) -> CoreResult<Option<EncodeProfile>> {
        Ok(self
            .lock()
            .profiles
            .values()
            .find(|profile| profile.is_default)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn conditional_item_transitions_are_guarded() {
        let store = MemoryStore::new();
        let request = fixtures::movie_request("Fight Club", 1999);
        let item = fixtures::movie_item(&request);
        store.insert_request(&request).await.expect("insert request");
        store.insert_items(&[item.clone()]).await.expect("insert item");

        assert!(
            store
                .transition_item(item.id, &[ItemStatus::Pending], ItemStatus::Searching)
                .await
                .expect("transition")
        );
        assert!(
            !store
                .transition_item(item.id, &[ItemStatus::Pending], ItemStatus::Searching)
                .await
                .expect("transition")
        );
    }

    #[tokio::test]
    async fn delete_request_cascades() {
        let store = MemoryStore::new();
        let request = fixtures::movie_request("Fight Club", 1999);
        let item = fixtures::movie_item(&request);
        store.insert_request(&request).await.expect("insert");
        store.insert_items(&[item]).await.expect("insert");
        store
            .append_activity(request.id, "request_created", "created", Value::Null)
            .await
            .expect("append");

        assert!(store.delete_request(request.id).await.expect("delete"));
        assert!(store.get_request(request.id).await.expect("get").is_none());
        assert!(
            store
                .items_for_request(request.id)
                .await
                .expect("items")
                .is_empty()
        );
        assert!(
            store
                .activity_for_request(request.id, 10)
                .await
                .expect("activity")
                .is_empty()
        );
    }
}
