//! Release selection: query indexers, filter by title and quality, pick a
//! primary release plus ordered alternatives.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use annex_core::{
    CancelSignal, CoreError, ItemStatus, MediaKind, ProcessingItem, ProgressSink, Release,
    Request, Resolution, SearchQuery, StepContext,
};
use annex_events::Event;
use annex_quality::{parse_name, rank};

use crate::error::{PipelineError, PipelineResult};
use crate::step::{PipelineDeps, Step, StepOutput};

/// Optional configuration for the search step.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SearchConfig {
    /// Releases with fewer seeders than this are dropped before ranking.
    min_seeders: u32,
}

/// The `search` step.
pub struct SearchStep {
    deps: Arc<PipelineDeps>,
}

impl SearchStep {
    /// Build the step over the shared dependencies.
    #[must_use]
    pub const fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    async fn required_resolution(&self, request: &Request) -> PipelineResult<Resolution> {
        if let Some(resolution) = request.required_resolution {
            return Ok(resolution);
        }
        // Derive lazily for requests created before targets were resolvable.
        let mut servers = Vec::with_capacity(request.targets.len());
        for target in &request.targets {
            if let Some(server) = self.deps.store.get_server(target.server_id).await? {
                servers.push(server);
            }
        }
        let resolution =
            annex_quality::derive_required_resolution(&servers).ok_or_else(|| {
                CoreError::misconfigured(
                    "targets",
                    "request has no resolvable target servers".to_string(),
                )
            })?;
        self.deps
            .store
            .set_required_resolution(request.id, resolution)
            .await?;
        Ok(resolution)
    }

    async fn park_items(
        &self,
        items: &[&ProcessingItem],
        status: ItemStatus,
    ) -> PipelineResult<()> {
        let retry_at =
            Utc::now() + ChronoDuration::seconds(
                i64::try_from(self.deps.settings.scheduler.retry_backoff_secs).unwrap_or(1_800),
            );
        for item in items {
            self.deps
                .store
                .transition_item(
                    item.id,
                    &[ItemStatus::Pending, ItemStatus::Searching],
                    status,
                )
                .await?;
            self.deps
                .store
                .set_item_retry_at(item.id, Some(retry_at))
                .await?;
        }
        Ok(())
    }

    fn release_query(request: &Request) -> SearchQuery {
        SearchQuery {
            title: request.title.clone(),
            year: request.year,
            tmdb_id: Some(request.tmdb_id),
            imdb_id: None,
        }
    }

    fn title_filter(request: &Request, releases: Vec<Release>, min_seeders: u32) -> Vec<Release> {
        releases
            .into_iter()
            .filter(|release| release.seeders >= min_seeders)
            .filter(|release| {
                let parsed = parse_name(&release.title);
                annex_quality::titles_match(&request.title, &parsed.normalized_title)
            })
            .collect()
    }
}

#[async_trait]
impl Step for SearchStep {
    fn kind(&self) -> &'static str {
        "search"
    }

    fn validate_config(&self, config: &Value) -> PipelineResult<()> {
        if config.is_null() {
            return Ok(());
        }
        serde_json::from_value::<SearchConfig>(config.clone())
            .map(|_| ())
            .map_err(|err| PipelineError::InvalidConfig {
                step: "search".to_owned(),
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
        let config: SearchConfig = if config.is_null() {
            SearchConfig::default()
        } else {
            serde_json::from_value(config.clone()).unwrap_or_default()
        };

        // A prior run already picked releases; resumes skip the indexers.
        if context.get("release").is_some() || context.get("season_releases").is_some() {
            return Ok(StepOutput::skip());
        }

        let request_id = context.request_id()?;
        let request = self
            .deps
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("request", request_id))?;
        let items = self.deps.store.items_for_request(request_id).await?;
        let pending: Vec<&ProcessingItem> = items
            .iter()
            .filter(|item| {
                matches!(item.status, ItemStatus::Pending | ItemStatus::Searching)
            })
            // An item with a mapped source resumes downstream; it does not
            // need another release.
            .filter(|item| item.step_context.source_file_path().is_none())
            .collect();
        if pending.is_empty() {
            return Ok(StepOutput::skip());
        }
        for item in &pending {
            self.deps
                .store
                .transition_item(item.id, &[ItemStatus::Pending], ItemStatus::Searching)
                .await?;
        }

        let required = self.required_resolution(&request).await?;
        let top_n = self.deps.settings.pipeline.alternatives_stored;

        // Manual selection bypass: a pinned release skips the indexers.
        if let Some(selected) = request.selected_release.clone() {
            info!(request_id = %request_id, release = %selected.title, "using pinned release");
            let mut data = Map::new();
            data.insert("release".into(), json!(selected));
            data.insert("alternatives".into(), json!([]));
            return Ok(StepOutput::success(data));
        }

        let query = Self::release_query(&request);
        match request.kind {
            MediaKind::Movie => {
                let response = self
                    .deps
                    .indexer
                    .search_movie(&query)
                    .await
                    .map_err(|err| PipelineError::StepFailed {
                        step: "search".to_owned(),
                        message: err.to_string(),
                    })?;
                if response.indexers_failed > 0 {
                    warn!(
                        failed = response.indexers_failed,
                        queried = response.indexers_queried,
                        "some indexers failed during movie search"
                    );
                }
                let candidates = Self::title_filter(&request, response.releases, config.min_seeders);
                let ranked = rank(candidates, required, top_n);

                if ranked.matching.is_empty() && !ranked.below_quality.is_empty() {
                    self.deps
                        .store
                        .set_available_releases(request_id, &ranked.below_quality)
                        .await?;
                    self.park_items(&pending, ItemStatus::QualityUnavailable)
                        .await?;
                    self.deps
                        .emit(
                            request_id,
                            Event::QualityUnavailable {
                                request_id,
                                below_quality: ranked.below_quality.len(),
                            },
                            "only below-quality releases found",
                        )
                        .await;
                    return Ok(StepOutput::retry_later("no release meets quality"));
                }
                if ranked.matching.is_empty() {
                    self.park_items(&pending, ItemStatus::Awaiting).await?;
                    self.deps
                        .emit(
                            request_id,
                            Event::SearchEmpty { request_id },
                            "no releases found",
                        )
                        .await;
                    return Ok(StepOutput::retry_later("no releases found"));
                }

                let mut matching = ranked.matching;
                let primary = matching.remove(0);
                matching.truncate(top_n.saturating_sub(1));
                self.deps
                    .emit(
                        request_id,
                        Event::ReleaseSelected {
                            request_id,
                            release_title: primary.title.clone(),
                            alternatives: matching.len(),
                        },
                        "release selected",
                    )
                    .await;
                let mut data = Map::new();
                data.insert("release".into(), json!(primary));
                data.insert("alternatives".into(), json!(matching));
                Ok(StepOutput::success(data))
            }
            MediaKind::Tv => {
                let seasons: BTreeSet<i32> =
                    pending.iter().filter_map(|item| item.season).collect();
                let mut season_entries = Vec::new();
                let mut below_count = 0_usize;

                for season in seasons {
                    cancel.ensure_active()?;
                    let season_items: Vec<&ProcessingItem> = pending
                        .iter()
                        .copied()
                        .filter(|item| item.season == Some(season))
                        .collect();
                    let response = self
                        .deps
                        .indexer
                        .search_season(&query, season)
                        .await
                        .map_err(|err| PipelineError::StepFailed {
                            step: "search".to_owned(),
                            message: err.to_string(),
                        })?;
                    let candidates: Vec<Release> =
                        Self::title_filter(&request, response.releases, config.min_seeders)
                            .into_iter()
                            .filter(|release| {
                                // Season packs only: a parsed episode number
                                // means a single-episode torrent masquerading
                                // as a pack.
                                let parsed = parse_name(&release.title);
                                parsed.season == Some(season) && parsed.episode.is_none()
                            })
                            .collect();
                    let ranked = rank(candidates, required, top_n);

                    if ranked.matching.is_empty() {
                        if ranked.below_quality.is_empty() {
                            self.park_items(&season_items, ItemStatus::Awaiting).await?;
                        } else {
                            below_count += ranked.below_quality.len();
                            self.deps
                                .store
                                .set_available_releases(request_id, &ranked.below_quality)
                                .await?;
                            self.park_items(&season_items, ItemStatus::QualityUnavailable)
                                .await?;
                        }
                        continue;
                    }

                    let mut matching = ranked.matching;
                    let primary = matching.remove(0);
                    matching.truncate(top_n.saturating_sub(1));
                    self.deps
                        .emit(
                            request_id,
                            Event::ReleaseSelected {
                                request_id,
                                release_title: primary.title.clone(),
                                alternatives: matching.len(),
                            },
                            "season pack selected",
                        )
                        .await;
                    season_entries.push(json!({
                        "season": season,
                        "release": primary,
                        "alternatives": matching,
                    }));
                }

                if season_entries.is_empty() {
                    let (event, message, reason) = if below_count > 0 {
                        (
                            Event::QualityUnavailable {
                                request_id,
                                below_quality: below_count,
                            },
                            "only below-quality season packs found",
                            "no season pack meets quality",
                        )
                    } else {
                        (
                            Event::SearchEmpty { request_id },
                            "no season packs found",
                            "no releases found",
                        )
                    };
                    self.deps.emit(request_id, event, message).await;
                    return Ok(StepOutput::retry_later(reason));
                }

                let mut data = Map::new();
                data.insert("season_releases".into(), Value::Array(season_entries));
                Ok(StepOutput::success(data))
            }
        }
    }
}
