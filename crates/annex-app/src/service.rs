//! Transport-agnostic command facade: one method per user operation,
//! delegating to the store, the quality engine and the pipeline executor.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use annex_core::{
    ActivityEntry, CoreError, ItemKind, ItemStatus, MediaKind, ProcessingItem, Release, Request,
    RequestStatus, StepContext, Target,
};
use annex_events::Event;
use annex_pipeline::{AggregatedStatus, PipelineDeps, PipelineExecutor, aggregate};

use crate::error::AppResult;

/// Hard ceiling on list sizes.
const MAX_LIST_LIMIT: i64 = 100;

/// Inputs for creating a movie request.
#[derive(Debug, Clone)]
pub struct MovieRequestInput {
    /// External catalog identifier.
    pub tmdb_id: i64,
    /// Movie title.
    pub title: String,
    /// Release year.
    pub year: Option<i32>,
    /// Ordered delivery targets.
    pub targets: Vec<Target>,
    /// Optional pinned release.
    pub selected_release: Option<Release>,
    /// Optional template override.
    pub template_id: Option<Uuid>,
}

/// Inputs for creating a TV request.
#[derive(Debug, Clone)]
pub struct TvRequestInput {
    /// External catalog identifier.
    pub tmdb_id: i64,
    /// Show title.
    pub title: String,
    /// First-air year.
    pub year: Option<i32>,
    /// Ordered delivery targets.
    pub targets: Vec<Target>,
    /// Requested seasons; defaults to every known season.
    pub seasons: Option<Vec<i32>>,
    /// Requested episode numbers within the requested season.
    pub episodes: Option<Vec<i32>>,
    /// Optional pinned release.
    pub selected_release: Option<Release>,
    /// Optional template override.
    pub template_id: Option<Uuid>,
    /// Whether the scheduler watches for newly aired episodes.
    pub subscribe: bool,
}

/// Full view of a request with its aggregated status.
#[derive(Debug, Clone)]
pub struct RequestDetail {
    /// The request row.
    pub request: Request,
    /// Status derived from the items.
    pub status: AggregatedStatus,
    /// The request's processing items.
    pub items: Vec<ProcessingItem>,
}

/// Live status of one episode.
#[derive(Debug, Clone)]
pub struct EpisodeStatusRow {
    /// Season number.
    pub season: i32,
    /// Episode number.
    pub episode: i32,
    /// Episode title, when known.
    pub title: Option<String>,
    /// Item status label.
    pub status: ItemStatus,
    /// Item progress, 0-100.
    pub progress: u8,
    /// Last failure detail, when present.
    pub error: Option<String>,
}

/// Per-season grouping of episode statuses.
#[derive(Debug, Clone)]
pub struct SeasonStatuses {
    /// Season number.
    pub season: i32,
    /// Episodes of the season in order.
    pub episodes: Vec<EpisodeStatusRow>,
}

/// The command facade.
pub struct AnnexService {
    deps: Arc<PipelineDeps>,
    executor: Arc<PipelineExecutor>,
}

impl AnnexService {
    /// Build the facade over shared dependencies and the executor.
    #[must_use]
    pub const fn new(deps: Arc<PipelineDeps>, executor: Arc<PipelineExecutor>) -> Self {
        Self { deps, executor }
    }

    async fn derive_required_resolution(
        &self,
        targets: &[Target],
    ) -> AppResult<annex_core::Resolution> {
        if targets.is_empty() {
            return Err(CoreError::InvalidInput {
                field: "targets",
                reason: "at least one delivery target is required",
                value: None,
            }
            .into());
        }
        let mut servers = Vec::with_capacity(targets.len());
        for target in targets {
            let server = self
                .deps
                .store
                .get_server(target.server_id)
                .await?
                .ok_or_else(|| CoreError::not_found("server", target.server_id))?;
            servers.push(server);
        }
        annex_quality::derive_required_resolution(&servers)
            .ok_or_else(|| {
                CoreError::misconfigured("targets", "no resolvable target servers").into()
            })
    }

    async fn activate(&self, request_id: Uuid, template_id: Option<Uuid>) -> AppResult<()> {
        let execution_id = self.executor.start(request_id, template_id).await?;
        self.executor.spawn_run(execution_id);
        Ok(())
    }

    /// Create a movie request and start its pipeline.
    ///
    /// # Errors
    ///
    /// Fails on empty targets, unknown servers or a missing template.
    pub async fn create_movie_request(&self, input: MovieRequestInput) -> AppResult<Uuid> {
        let required = self.derive_required_resolution(&input.targets).await?;
        let now = Utc::now();
        let request = Request {
            id: Uuid::new_v4(),
            kind: MediaKind::Movie,
            tmdb_id: input.tmdb_id,
            title: input.title,
            year: input.year,
            seasons: None,
            episodes: None,
            targets: input.targets,
            selected_release: input.selected_release,
            available_releases: Vec::new(),
            required_resolution: Some(required),
            subscribed: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.deps
            .store
            .insert_request(&request)
            .await?;

        let item = ProcessingItem {
            id: Uuid::new_v4(),
            request_id: request.id,
            kind: ItemKind::Movie,
            season: None,
            episode: None,
            air_date: None,
            title: None,
            status: ItemStatus::Pending,
            current_step: None,
            step_context: StepContext::new(),
            progress: 0,
            attempts: 0,
            max_attempts: self.deps.settings.pipeline.max_attempts,
            last_error: None,
            next_retry_at: None,
            download_id: None,
            encode_job_id: None,
            created_at: now,
            updated_at: now,
        };
        self.deps
            .store
            .insert_items(std::slice::from_ref(&item))
            .await?;
        self.deps
            .emit(
                request.id,
                Event::RequestCreated {
                    request_id: request.id,
                    media_kind: request.kind.as_str().to_owned(),
                    title: request.title.clone(),
                    items: 1,
                },
                "movie request created",
            )
            .await;
        info!(request_id = %request.id, title = %request.title, "movie request created");

        self.activate(request.id, input.template_id).await?;
        Ok(request.id)
    }

    /// Create a TV request with one item per episode and start its pipeline.
    /// Episodes a target library already holds are initialised completed;
    /// unaired episodes start awaiting until their air date passes.
    ///
    /// # Errors
    ///
    /// Fails on empty targets, unknown servers, metadata lookup failure or a
    /// missing template.
    pub async fn create_tv_request(&self, input: TvRequestInput) -> AppResult<Uuid> {
        let required = self.derive_required_resolution(&input.targets).await?;
        let seasons = match &input.seasons {
            Some(seasons) if !seasons.is_empty() => seasons.clone(),
            _ => {
                self.deps
                    .metadata
                    .get_show(input.tmdb_id)
                    .await?
                    .seasons
            }
        };

        let now = Utc::now();
        let request = Request {
            id: Uuid::new_v4(),
            kind: MediaKind::Tv,
            tmdb_id: input.tmdb_id,
            title: input.title,
            year: input.year,
            seasons: Some(seasons.clone()),
            episodes: input.episodes.clone(),
            targets: input.targets.clone(),
            selected_release: input.selected_release,
            available_releases: Vec::new(),
            required_resolution: Some(required),
            subscribed: input.subscribe,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.deps
            .store
            .insert_request(&request)
            .await?;

        let today = now.date_naive();
        let mut items = Vec::new();
        for season in &seasons {
            let listing = self
                .deps
                .metadata
                .get_season(input.tmdb_id, *season)
                .await?;
            for episode in listing.episodes {
                if let Some(wanted) = &input.episodes
                    && !wanted.contains(&episode.episode)
                {
                    continue;
                }

                let mut in_every_library = true;
                for target in &input.targets {
                    let present = self
                        .deps
                        .store
                        .has_episode_entry(
                            input.tmdb_id,
                            episode.season,
                            episode.episode,
                            target.server_id,
                        )
                        .await?;
                    if !present {
                        in_every_library = false;
                        break;
                    }
                }
                let unaired = episode.air_date.is_none_or(|air| air > today);
                let (status, progress) = if in_every_library {
                    (ItemStatus::Completed, 100)
                } else if unaired {
                    (ItemStatus::Awaiting, 0)
                } else {
                    (ItemStatus::Pending, 0)
                };

                items.push(ProcessingItem {
                    id: Uuid::new_v4(),
                    request_id: request.id,
                    kind: ItemKind::Episode,
                    season: Some(episode.season),
                    episode: Some(episode.episode),
                    air_date: episode.air_date,
                    title: episode.title,
                    status,
                    current_step: None,
                    step_context: StepContext::new(),
                    progress,
                    attempts: 0,
                    max_attempts: self.deps.settings.pipeline.max_attempts,
                    last_error: None,
                    next_retry_at: (status == ItemStatus::Awaiting)
                        .then(|| episode.air_date)
                        .flatten()
                        .and_then(|air| air.and_hms_opt(0, 0, 0))
                        .map(|naive| naive.and_utc()),
                    download_id: None,
                    encode_job_id: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }
        if items.is_empty() {
            self.deps
                .store
                .delete_request(request.id)
                .await?;
            return Err(CoreError::InvalidInput {
                field: "episodes",
                reason: "no matching episodes found for the request",
                value: None,
            }
            .into());
        }
        self.deps
            .store
            .insert_items(&items)
            .await?;
        self.deps
            .emit(
                request.id,
                Event::RequestCreated {
                    request_id: request.id,
                    media_kind: request.kind.as_str().to_owned(),
                    title: request.title.clone(),
                    items: items.len(),
                },
                "tv request created",
            )
            .await;
        info!(request_id = %request.id, title = %request.title, episodes = items.len(), "tv request created");

        self.activate(request.id, input.template_id).await?;
        Ok(request.id)
    }

    /// List requests with derived statuses, newest first.
    ///
    /// # Errors
    ///
    /// Fails when the store is unreachable.
    pub async fn list(
        &self,
        limit: i64,
        status: Option<RequestStatus>,
    ) -> AppResult<Vec<RequestDetail>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let requests = self
            .deps
            .store
            .list_requests(limit)
            .await?;
        let mut details = Vec::with_capacity(requests.len());
        for request in requests {
            let items = self
                .deps
                .store
                .items_for_request(request.id)
                .await?;
            let aggregated = aggregate(&items);
            if status.is_none_or(|wanted| aggregated.status == wanted) {
                details.push(RequestDetail {
                    request,
                    status: aggregated,
                    items,
                });
            }
        }
        Ok(details)
    }

    /// Fetch one request with aggregated status and items.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the request does not exist.
    pub async fn get(&self, request_id: Uuid) -> AppResult<RequestDetail> {
        let request = self
            .deps
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("request", request_id))?;
        let items = self
            .deps
            .store
            .items_for_request(request_id)
            .await?;
        let status = aggregate(&items);
        Ok(RequestDetail {
            request,
            status,
            items,
        })
    }

    /// Cancel a request: every non-terminal item is cancelled, active
    /// encoder assignments are torn down and the execution stops
    /// cooperatively.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the request does not exist.
    pub async fn cancel(&self, request_id: Uuid) -> AppResult<()> {
        let detail = self.get(request_id).await?;
        for item in &detail.items {
            if !item.status.is_terminal() {
                self.deps
                    .store
                    .transition_item(
                        item.id,
                        &[
                            ItemStatus::Pending,
                            ItemStatus::Searching,
                            ItemStatus::Awaiting,
                            ItemStatus::QualityUnavailable,
                            ItemStatus::Downloading,
                            ItemStatus::Downloaded,
                            ItemStatus::Encoding,
                            ItemStatus::Encoded,
                            ItemStatus::Delivering,
                        ],
                        ItemStatus::Cancelled,
                    )
                    .await?;
            }
        }
        if let Some(execution) = self
            .deps
            .store
            .latest_execution_for_request(request_id)
            .await?
        {
            self.executor.cancel(execution.id).await?;
        }
        self.deps
            .emit(
                request_id,
                Event::RequestCancelled { request_id },
                "request cancelled by user",
            )
            .await;
        Ok(())
    }

    /// Retry a request: cancelled, failed and waiting items re-enter at
    /// pending (completed items stay completed) and the pipeline
    /// reactivates.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the request does not exist.
    pub async fn retry(&self, request_id: Uuid) -> AppResult<()> {
        let detail = self.get(request_id).await?;
        let mut reset_any = false;
        for item in &detail.items {
            if item.status != ItemStatus::Completed {
                self.deps
                    .store
                    .reset_item_for_retry(item.id)
                    .await?;
                reset_any = true;
            }
        }
        if !reset_any {
            return Err(CoreError::precondition(
                "retry_request",
                "every item already completed",
            )
            .into());
        }
        self.activate(request_id, None).await
    }

    /// Delete a request and everything it owns.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the request does not exist.
    pub async fn delete(&self, request_id: Uuid) -> AppResult<()> {
        // Stop in-flight work before the rows disappear.
        if let Some(execution) = self
            .deps
            .store
            .latest_execution_for_request(request_id)
            .await?
        {
            self.executor.cancel(execution.id).await?;
        }
        let removed = self
            .deps
            .store
            .delete_request(request_id)
            .await?;
        if !removed {
            return Err(CoreError::not_found("request", request_id).into());
        }
        info!(request_id = %request_id, "request deleted");
        Ok(())
    }

    /// Accept a below-quality release by index: pin it and re-enter the
    /// pipeline.
    ///
    /// # Errors
    ///
    /// Fails when the request is not quality-unavailable or the index is out
    /// of range.
    pub async fn accept_lower_quality(
        &self,
        request_id: Uuid,
        release_index: usize,
    ) -> AppResult<()> {
        let detail = self.get(request_id).await?;
        if detail.status.status != RequestStatus::QualityUnavailable {
            return Err(CoreError::precondition(
                "accept_lower_quality",
                "request is not waiting on a quality decision",
            )
            .into());
        }
        let release = detail
            .request
            .available_releases
            .get(release_index)
            .cloned()
            .ok_or(CoreError::InvalidInput {
                field: "release_index",
                reason: "no stored release at that index",
                value: Some(release_index.to_string()),
            })?;
        self.deps
            .store
            .pin_release(request_id, Some(&release))
            .await?;
        for item in &detail.items {
            if item.status == ItemStatus::QualityUnavailable {
                self.deps
                    .store
                    .reset_item_for_retry(item.id)
                    .await?;
            }
        }
        self.deps
            .emit(
                request_id,
                Event::ReleaseSelected {
                    request_id,
                    release_title: release.title.clone(),
                    alternatives: 0,
                },
                "below-quality release accepted",
            )
            .await;
        self.activate(request_id, None).await
    }

    /// Clear stored below-quality candidates and search again.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the request does not exist.
    pub async fn refresh_quality_search(&self, request_id: Uuid) -> AppResult<()> {
        let detail = self.get(request_id).await?;
        self.deps
            .store
            .set_available_releases(request_id, &[])
            .await?;
        self.deps
            .store
            .pin_release(request_id, None)
            .await?;
        for item in &detail.items {
            if matches!(
                item.status,
                ItemStatus::QualityUnavailable | ItemStatus::Awaiting
            ) {
                self.deps
                    .store
                    .reset_item_for_retry(item.id)
                    .await?;
            }
        }
        self.activate(request_id, None).await
    }

    /// Re-run encode and delivery from the mapped source files without
    /// re-downloading.
    ///
    /// # Errors
    ///
    /// Fails when no item still has a mapped source file.
    pub async fn reprocess(&self, request_id: Uuid) -> AppResult<()> {
        let detail = self.get(request_id).await?;
        let mut reset_any = false;
        for item in &detail.items {
            if item.step_context.source_file_path().is_none() {
                continue;
            }
            let mut context = item.step_context.clone();
            context.clear("encoded");
            context.clear("delivery");
            self.deps
                .store
                .set_item_context(item.id, &context)
                .await?;
            self.deps
                .store
                .reset_item_for_retry(item.id)
                .await?;
            reset_any = true;
        }
        if !reset_any {
            return Err(CoreError::precondition(
                "reprocess_request",
                "no item has a mapped source file; use retry instead",
            )
            .into());
        }
        self.activate(request_id, None).await
    }

    /// Per-season grouped list of episode statuses.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the request does not exist.
    pub async fn episode_statuses(&self, request_id: Uuid) -> AppResult<Vec<SeasonStatuses>> {
        let detail = self.get(request_id).await?;
        let mut seasons: Vec<SeasonStatuses> = Vec::new();
        for item in detail
            .items
            .iter()
            .filter(|item| item.kind == ItemKind::Episode)
        {
            let (Some(season), Some(episode)) = (item.season, item.episode) else {
                continue;
            };
            let row = EpisodeStatusRow {
                season,
                episode,
                title: item.title.clone(),
                status: item.status,
                progress: item.progress,
                error: item.last_error.clone(),
            };
            match seasons.iter_mut().find(|entry| entry.season == season) {
                Some(entry) => entry.episodes.push(row),
                None => seasons.push(SeasonStatuses {
                    season,
                    episodes: vec![row],
                }),
            }
        }
        Ok(seasons)
    }

    /// Stored below-quality releases for the accept-lower-quality flow.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` when the request does not exist.
    pub async fn alternatives(&self, request_id: Uuid) -> AppResult<Vec<Release>> {
        let detail = self.get(request_id).await?;
        Ok(detail.request.available_releases)
    }

    /// User-visible activity history, newest first.
    ///
    /// # Errors
    ///
    /// Fails when the store is unreachable.
    pub async fn activity(&self, request_id: Uuid, limit: i64) -> AppResult<Vec<ActivityEntry>> {
        Ok(self
            .deps
            .store
            .activity_for_request(request_id, limit.clamp(1, MAX_LIST_LIMIT))
            .await?)
    }
}
