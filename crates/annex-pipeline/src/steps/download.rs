//! Download reconciliation: reuse pre-existing torrents when they meet
//! quality, otherwise submit the selected release, then monitor transfers
//! and rotate through alternatives on stalls.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use annex_core::{
    CancelSignal, CoreError, Download, DownloadStatus, ItemStatus, MediaKind, ProcessingItem,
    ProgressSink, Release, Request, Resolution, StepContext, TorrentClientState, TorrentSummary,
};
use annex_events::Event;
use annex_quality::{parse_name, titles_match};

use crate::error::{PipelineError, PipelineResult};
use crate::step::{PipelineDeps, Step, StepOutput};

/// One planned acquisition: a release plus the items it feeds.
struct DownloadPlan {
    release: Release,
    alternatives: Vec<Release>,
    season: Option<i32>,
}

fn external(message: impl Into<String>) -> PipelineError {
    PipelineError::StepFailed {
        step: "download_start".to_owned(),
        message: message.into(),
    }
}

fn plans_from_context(context: &StepContext) -> Vec<DownloadPlan> {
    let mut plans = Vec::new();
    if let Some(entries) = context.get("season_releases").and_then(Value::as_array) {
        for entry in entries {
            let Some(release) = entry
                .get("release")
                .and_then(|value| serde_json::from_value::<Release>(value.clone()).ok())
            else {
                continue;
            };
            let alternatives = entry
                .get("alternatives")
                .and_then(|value| serde_json::from_value::<Vec<Release>>(value.clone()).ok())
                .unwrap_or_default();
            plans.push(DownloadPlan {
                release,
                alternatives,
                season: entry
                    .get("season")
                    .and_then(Value::as_i64)
                    .and_then(|season| i32::try_from(season).ok()),
            });
        }
        return plans;
    }
    if let Some(release) = context
        .get("release")
        .and_then(|value| serde_json::from_value::<Release>(value.clone()).ok())
    {
        let alternatives = context
            .get("alternatives")
            .and_then(|value| serde_json::from_value::<Vec<Release>>(value.clone()).ok())
            .unwrap_or_default();
        plans.push(DownloadPlan {
            release,
            alternatives,
            season: None,
        });
    }
    plans
}

/// Whether an existing torrent satisfies a plan: same normalized title, the
/// right season shape for packs, and a resolution meeting the requirement.
fn torrent_matches(
    summary: &TorrentSummary,
    request: &Request,
    season: Option<i32>,
    required: Option<Resolution>,
) -> bool {
    let parsed = parse_name(&summary.name);
    if !titles_match(&request.title, &parsed.normalized_title) {
        return false;
    }
    if let Some(season) = season {
        if parsed.season != Some(season) || parsed.episode.is_some() {
            return false;
        }
    }
    match (required, parsed.resolution) {
        (Some(required), Some(found)) => found >= required,
        (Some(_), None) => false,
        (None, _) => true,
    }
}

/// The `download_start` step: the reconciliation half of the download
/// pipeline.
pub struct DownloadStartStep {
    deps: Arc<PipelineDeps>,
}

impl DownloadStartStep {
    /// Build the step over the shared dependencies.
    #[must_use]
    pub const fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    async fn attach_or_create(
        &self,
        request: &Request,
        plan: &DownloadPlan,
        existing: &[TorrentSummary],
    ) -> PipelineResult<Download> {
        let required = request.required_resolution;
        if let Some(summary) = existing
            .iter()
            .find(|summary| torrent_matches(summary, request, plan.season, required))
        {
            if let Some(download) = self
                .deps
                .store
                .get_download_by_hash(&summary.hash)
                .await?
            {
                return Ok(download);
            }
            let status = if summary.state == TorrentClientState::Completed {
                DownloadStatus::Completed
            } else {
                DownloadStatus::Downloading
            };
            let download = Download {
                id: Uuid::new_v4(),
                request_id: request.id,
                torrent_hash: summary.hash.clone(),
                name: summary.name.clone(),
                save_path: summary.save_path.clone(),
                content_path: summary.content_path.clone(),
                status,
                progress: summary.progress,
                seeders: summary.seeders,
                peers: summary.peers,
                size_bytes: summary.size_bytes,
                alternatives: plan.alternatives.clone(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.deps.store.insert_download(&download).await?;
            self.deps
                .emit(
                    request.id,
                    Event::DownloadAttached {
                        request_id: request.id,
                        download_id: download.id,
                        torrent_hash: download.torrent_hash.clone(),
                        reused: true,
                    },
                    "attached to existing torrent",
                )
                .await;
            info!(request_id = %request.id, hash = %download.torrent_hash, "reusing existing torrent");
            return Ok(download);
        }

        let hash = self
            .deps
            .torrents
            .add_torrent(&plan.release.download_url, None)
            .await
            .map_err(|err| external(err.to_string()))?;
        if let Some(download) = self.deps.store.get_download_by_hash(&hash).await? {
            return Ok(download);
        }
        let download = Download {
            id: Uuid::new_v4(),
            request_id: request.id,
            torrent_hash: hash,
            name: plan.release.title.clone(),
            save_path: None,
            content_path: None,
            status: DownloadStatus::Pending,
            progress: 0.0,
            seeders: plan.release.seeders.try_into().unwrap_or(0),
            peers: 0,
            size_bytes: plan.release.size_bytes.try_into().unwrap_or(0),
            alternatives: plan.alternatives.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.deps.store.insert_download(&download).await?;
        self.deps
            .emit(
                request.id,
                Event::DownloadAttached {
                    request_id: request.id,
                    download_id: download.id,
                    torrent_hash: download.torrent_hash.clone(),
                    reused: false,
                },
                "torrent submitted",
            )
            .await;
        Ok(download)
    }
}

#[async_trait]
impl Step for DownloadStartStep {
    fn kind(&self) -> &'static str {
        "download_start"
    }

    fn validate_config(&self, config: &Value) -> PipelineResult<()> {
        if config.is_null() || config.as_object().is_some_and(Map::is_empty) {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig {
                step: "download_start".to_owned(),
                reason: "step takes no configuration".to_owned(),
            })
        }
    }

    async fn execute(
        &self,
        context: &StepContext,
        _config: &Value,
        _progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> PipelineResult<StepOutput> {
        cancel.ensure_active()?;
        let request_id = context.request_id()?;
        let request = self
            .deps
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("request", request_id))?;
        let items = self.deps.store.items_for_request(request_id).await?;

        let plans = plans_from_context(context);
        if plans.is_empty() {
            return Ok(StepOutput::skip());
        }

        // Items already fed by a download are a resume; only unlinked ones
        // need reconciliation.
        let unlinked: Vec<&ProcessingItem> = items
            .iter()
            .filter(|item| item.download_id.is_none() && !item.status.is_terminal())
            .filter(|item| {
                !matches!(item.status, ItemStatus::Awaiting | ItemStatus::QualityUnavailable)
            })
            .filter(|item| item.step_context.source_file_path().is_none())
            .collect();
        if unlinked.is_empty() {
            return Ok(StepOutput::skip());
        }

        let existing = self
            .deps
            .torrents
            .list_torrents()
            .await
            .map_err(|err| external(err.to_string()))?;

        let mut recorded = Vec::new();
        for plan in &plans {
            cancel.ensure_active()?;
            let fed: Vec<&ProcessingItem> = unlinked
                .iter()
                .copied()
                .filter(|item| match request.kind {
                    MediaKind::Movie => true,
                    MediaKind::Tv => plan.season.is_none() || item.season == plan.season,
                })
                .collect();
            if fed.is_empty() {
                continue;
            }

            let download = self.attach_or_create(&request, plan, &existing).await?;
            for item in fed {
                self.deps
                    .store
                    .link_item_download(item.id, Some(download.id))
                    .await?;
                self.deps
                    .store
                    .transition_item(
                        item.id,
                        &[ItemStatus::Pending, ItemStatus::Searching],
                        ItemStatus::Downloading,
                    )
                    .await?;
            }
            recorded.push(json!({
                "id": download.id,
                "torrent_hash": download.torrent_hash,
                "season": plan.season,
            }));
        }

        if recorded.is_empty() {
            return Ok(StepOutput::skip());
        }
        let mut data = Map::new();
        if recorded.len() == 1 && request.kind == MediaKind::Movie {
            data.insert("download".into(), recorded.remove(0));
        } else {
            data.insert("downloads".into(), Value::Array(recorded));
        }
        Ok(StepOutput::success(data))
    }
}

/// Stall bookkeeping per torrent hash.
struct StallClock {
    last_percent: f64,
    since: Instant,
    errors: u32,
}

/// The `download_monitor` step: polls transfers, rotates alternatives on
/// stalls and failures, re-arms the search when alternatives run out.
pub struct DownloadMonitorStep {
    deps: Arc<PipelineDeps>,
}

impl DownloadMonitorStep {
    /// Build the step over the shared dependencies.
    #[must_use]
    pub const fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    /// Rotate a stalled or failed download to its next alternative. Returns
    /// `false` when no alternatives remain and the download was failed.
    async fn rotate(&self, download: &Download, reason: &str) -> PipelineResult<bool> {
        let request_id = download.request_id;
        warn!(
            download_id = %download.id,
            hash = %download.torrent_hash,
            reason,
            "rotating download to next alternative"
        );
        self.deps
            .emit(
                request_id,
                Event::DownloadStalled {
                    download_id: download.id,
                    torrent_hash: download.torrent_hash.clone(),
                },
                reason,
            )
            .await;

        if let Err(err) = self
            .deps
            .torrents
            .delete_torrent(&download.torrent_hash, true)
            .await
        {
            warn!(error = %err, hash = %download.torrent_hash, "failed to delete stalled torrent");
        }

        let mut alternatives = download.alternatives.clone();
        if alternatives.is_empty() {
            self.deps
                .store
                .transition_download(
                    download.id,
                    &[DownloadStatus::Pending, DownloadStatus::Downloading],
                    DownloadStatus::Failed,
                )
                .await?;
            let items = self.deps.store.items_for_download(download.id).await?;
            for item in items {
                // Re-arm the search: back to pending with the link cleared;
                // the scheduler sweep picks the item up.
                self.deps.store.link_item_download(item.id, None).await?;
                self.deps
                    .store
                    .transition_item(
                        item.id,
                        &[ItemStatus::Downloading, ItemStatus::Downloaded],
                        ItemStatus::Pending,
                    )
                    .await?;
                self.deps
                    .store
                    .set_item_retry_at(item.id, Some(Utc::now()))
                    .await?;
            }
            self.deps
                .emit(
                    request_id,
                    Event::DownloadFailed {
                        download_id: download.id,
                        message: "no alternatives remain".to_owned(),
                    },
                    "download failed; search re-armed",
                )
                .await;
            return Ok(false);
        }

        let next = alternatives.remove(0);
        let hash = self
            .deps
            .torrents
            .add_torrent(&next.download_url, None)
            .await
            .map_err(|err| PipelineError::StepFailed {
                step: "download_monitor".to_owned(),
                message: err.to_string(),
            })?;
        self.deps
            .store
            .replace_download_torrent(download.id, &hash, &next.title)
            .await?;
        self.deps
            .store
            .set_download_alternatives(download.id, &alternatives)
            .await?;
        self.deps
            .emit(
                request_id,
                Event::AlternativeSelected {
                    download_id: download.id,
                    release_title: next.title.clone(),
                },
                "switched to alternative release",
            )
            .await;
        Ok(true)
    }

    async fn mirror_progress(&self, download: &Download, percent: f64) -> PipelineResult<()> {
        let items = self.deps.store.items_for_download(download.id).await?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let display = percent.clamp(0.0, 100.0) as u8;
        for item in items {
            if item.status == ItemStatus::Downloading {
                self.deps.store.set_item_progress(item.id, display).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Step for DownloadMonitorStep {
    fn kind(&self) -> &'static str {
        "download_monitor"
    }

    fn validate_config(&self, config: &Value) -> PipelineResult<()> {
        if config.is_null() || config.as_object().is_some_and(Map::is_empty) {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig {
                step: "download_monitor".to_owned(),
                reason: "step takes no configuration".to_owned(),
            })
        }
    }

    async fn execute(
        &self,
        context: &StepContext,
        _config: &Value,
        _progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> PipelineResult<StepOutput> {
        let request_id = context.request_id()?;
        let request = self
            .deps
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("request", request_id))?;
        let settings = self.deps.settings.download;
        let timeout = settings.timeout_for(request.kind == MediaKind::Tv);
        let stall_window = settings.stall_window();
        let poll = settings.poll_interval();

        if self
            .deps
            .store
            .downloads_for_request(request_id)
            .await?
            .is_empty()
        {
            // Nothing was ever reconciled for this request; resumes that
            // skipped the download stage fall through here.
            return Ok(StepOutput::skip());
        }

        let mut clocks: HashMap<Uuid, StallClock> = HashMap::new();
        let mut any_completed = false;

        loop {
            cancel.ensure_active()?;
            let downloads = self.deps.store.downloads_for_request(request_id).await?;
            let active: Vec<Download> = downloads
                .iter()
                .filter(|download| download.status.is_active())
                .cloned()
                .collect();
            any_completed |= downloads.iter().any(|download| {
                matches!(
                    download.status,
                    DownloadStatus::Completed | DownloadStatus::Importing | DownloadStatus::Processed
                )
            });
            if active.is_empty() {
                break;
            }

            for download in &active {
                cancel.ensure_active()?;

                // Overall timeout counts from submission, so resumed
                // monitors do not restart the clock.
                let age = Utc::now() - download.created_at;
                if age.to_std().unwrap_or_default() > timeout {
                    self.rotate(download, "download timed out").await?;
                    clocks.remove(&download.id);
                    continue;
                }

                let progress = match self.deps.torrents.get_progress(&download.torrent_hash).await
                {
                    Ok(progress) => progress,
                    Err(err) => {
                        let clock = clocks.entry(download.id).or_insert_with(|| StallClock {
                            last_percent: download.progress,
                            since: Instant::now(),
                            errors: 0,
                        });
                        clock.errors += 1;
                        warn!(
                            error = %err,
                            hash = %download.torrent_hash,
                            consecutive = clock.errors,
                            "torrent progress poll failed"
                        );
                        if clock.errors >= 3 {
                            self.rotate(download, "torrent client reports errors").await?;
                            clocks.remove(&download.id);
                        }
                        continue;
                    }
                };

                self.deps
                    .store
                    .update_download_transfer(
                        download.id,
                        progress.percent,
                        progress.seeders,
                        progress.peers,
                    )
                    .await?;
                if progress.content_path.is_some() {
                    self.deps
                        .store
                        .set_download_paths(download.id, None, progress.content_path.as_deref())
                        .await?;
                }
                self.mirror_progress(download, progress.percent).await?;
                let _ = self.deps.events.publish(Event::DownloadProgress {
                    download_id: download.id,
                    percent: progress.percent,
                    download_bps: progress.download_bps,
                });

                match progress.state {
                    TorrentClientState::Completed => {
                        self.deps
                            .store
                            .transition_download(
                                download.id,
                                &[DownloadStatus::Pending, DownloadStatus::Downloading],
                                DownloadStatus::Completed,
                            )
                            .await?;
                        self.deps
                            .emit(
                                request_id,
                                Event::DownloadCompleted {
                                    download_id: download.id,
                                },
                                "download completed",
                            )
                            .await;
                        clocks.remove(&download.id);
                        any_completed = true;
                        continue;
                    }
                    TorrentClientState::Errored => {
                        self.rotate(download, "torrent errored").await?;
                        clocks.remove(&download.id);
                        continue;
                    }
                    TorrentClientState::Downloading
                    | TorrentClientState::Queued
                    | TorrentClientState::Stalled => {}
                }

                let clock = clocks.entry(download.id).or_insert_with(|| StallClock {
                    last_percent: progress.percent,
                    since: Instant::now(),
                    errors: 0,
                });
                clock.errors = 0;
                let moving = progress.percent > clock.last_percent
                    || progress.download_bps >= settings.stall_speed_floor_bps;
                if moving {
                    clock.last_percent = progress.percent;
                    clock.since = Instant::now();
                } else if clock.since.elapsed() > stall_window {
                    self.rotate(download, "no progress within stall window").await?;
                    clocks.remove(&download.id);
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(CoreError::Cancelled.into()),
                () = tokio::time::sleep(poll) => {}
            }
        }

        if any_completed {
            Ok(StepOutput::success(Map::new()))
        } else {
            // Every download exhausted its alternatives; the items were
            // re-armed for search and the execution ends gracefully.
            Ok(StepOutput::retry_later("all downloads failed; search re-armed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(kind: MediaKind, title: &str, required: Option<Resolution>) -> Request {
        Request {
            id: Uuid::new_v4(),
            kind,
            tmdb_id: 1,
            title: title.to_string(),
            year: Some(2020),
            seasons: None,
            episodes: None,
            targets: Vec::new(),
            selected_release: None,
            available_releases: Vec::new(),
            required_resolution: required,
            subscribed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    fn summary(name: &str) -> TorrentSummary {
        TorrentSummary {
            hash: "abcd".to_string(),
            name: name.to_string(),
            progress: 40.0,
            state: TorrentClientState::Downloading,
            save_path: None,
            content_path: None,
            seeders: 4,
            peers: 2,
            size_bytes: 1 << 30,
            download_bps: 100_000,
        }
    }

    #[test]
    fn torrent_match_requires_title_and_quality() {
        let request = request(MediaKind::Movie, "Fight Club", Some(Resolution::Fhd1080));
        assert!(torrent_matches(
            &summary("Fight.Club.1999.1080p.BluRay.x264"),
            &request,
            None,
            request.required_resolution,
        ));
        assert!(!torrent_matches(
            &summary("Fight.Club.1999.720p.WEB-DL"),
            &request,
            None,
            request.required_resolution,
        ));
        assert!(!torrent_matches(
            &summary("Fight.Club.Extended.1999.1080p"),
            &request,
            None,
            request.required_resolution,
        ));
    }

    #[test]
    fn season_match_rejects_single_episodes() {
        let request = request(MediaKind::Tv, "Show Name", Some(Resolution::Fhd1080));
        assert!(torrent_matches(
            &summary("Show.Name.S02.1080p.WEB-DL"),
            &request,
            Some(2),
            request.required_resolution,
        ));
        assert!(!torrent_matches(
            &summary("Show.Name.S02E01.1080p.WEB-DL"),
            &request,
            Some(2),
            request.required_resolution,
        ));
        assert!(!torrent_matches(
            &summary("Show.Name.S03.1080p.WEB-DL"),
            &request,
            Some(2),
            request.required_resolution,
        ));
    }

    #[test]
    fn context_plans_prefer_season_entries() {
        let mut context = StepContext::new();
        context.set(
            "season_releases",
            json!([{
                "season": 2,
                "release": {
                    "title": "Show.S02.1080p", "indexer": "t", "resolution": null,
                    "source": null, "codec": null, "size_bytes": 100, "seeders": 5,
                    "leechers": 0, "download_url": "magnet:?a", "published_at": null,
                    "score": 10
                },
                "alternatives": []
            }]),
        );
        let plans = plans_from_context(&context);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].season, Some(2));
    }
}
