//! Delivery coordination: transfer encoded artifacts to every target server
//! of a profile group, then trigger a library scan.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use annex_core::{
    CancelSignal, CoreError, ItemKind, ItemStatus, MediaKind, ProgressSink, StepContext,
};
use annex_events::Event;
use annex_quality::{episode_artifact_path, movie_artifact_path};

use crate::error::{PipelineError, PipelineResult};
use crate::step::{PipelineDeps, Step, StepOutput};

/// The `deliver` step.
pub struct DeliverStep {
    deps: Arc<PipelineDeps>,
}

impl DeliverStep {
    /// Build the step over the shared dependencies.
    #[must_use]
    pub const fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

fn encoded_groups(context: &StepContext) -> Vec<(Uuid, String, Vec<Uuid>)> {
    let Some(encoded) = context.get("encoded").and_then(Value::as_object) else {
        return Vec::new();
    };
    encoded
        .iter()
        .filter_map(|(profile, entry)| {
            let profile_id = Uuid::parse_str(profile).ok()?;
            let path = entry.get("path").and_then(Value::as_str)?.to_owned();
            let server_ids = entry
                .get("server_ids")
                .and_then(|value| serde_json::from_value::<Vec<Uuid>>(value.clone()).ok())
                .unwrap_or_default();
            Some((profile_id, path, server_ids))
        })
        .collect()
}

#[async_trait]
impl Step for DeliverStep {
    fn kind(&self) -> &'static str {
        "deliver"
    }

    fn validate_config(&self, config: &Value) -> PipelineResult<()> {
        if config.is_null() || config.as_object().is_some_and(Map::is_empty) {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig {
                step: "deliver".to_owned(),
                reason: "step takes no configuration".to_owned(),
            })
        }
    }

    async fn execute(
        &self,
        context: &StepContext,
        _config: &Value,
        progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> PipelineResult<StepOutput> {
        cancel.ensure_active()?;
        let request_id = context.request_id()?;
        let item_id = context.processing_item_id()?;
        let item = self
            .deps
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| CoreError::not_found("processing_item", item_id))?;
        if item.status == ItemStatus::Completed {
            return Ok(StepOutput::skip());
        }
        let request = self
            .deps
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("request", request_id))?;

        // Groups can live in the step context (same execution) or in the
        // item's persisted context (resume after restart).
        let mut groups = encoded_groups(context);
        if groups.is_empty() {
            groups = encoded_groups(&item.step_context);
        }
        if groups.is_empty() {
            return Err(PipelineError::StepFailed {
                step: "deliver".to_owned(),
                message: "no encoded outputs to deliver".to_owned(),
            });
        }

        self.deps
            .store
            .transition_item(
                item_id,
                &[ItemStatus::Encoded, ItemStatus::Pending, ItemStatus::Delivering],
                ItemStatus::Delivering,
            )
            .await?;

        let mut receipts = Map::new();
        let mut failures: Vec<String> = Vec::new();
        let mut successes = 0_usize;

        for (profile_id, local_path, server_ids) in groups {
            cancel.ensure_active()?;
            let profile = self
                .deps
                .store
                .get_profile(profile_id)
                .await?
                .ok_or_else(|| CoreError::not_found("encode_profile", profile_id))?;

            for server_id in server_ids {
                cancel.ensure_active()?;
                let server = self
                    .deps
                    .store
                    .get_server(server_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("server", server_id))?;
                let remote_path = match request.kind {
                    MediaKind::Movie => movie_artifact_path(
                        &server.movie_root,
                        &request.title,
                        request.year,
                        request.required_resolution,
                        &profile.video_codec,
                        &profile.container,
                    ),
                    MediaKind::Tv => episode_artifact_path(
                        &server.tv_root,
                        &request.title,
                        item.season.unwrap_or(1),
                        item.episode.unwrap_or(1),
                        item.title.as_deref(),
                        request.required_resolution,
                        &profile.video_codec,
                        &profile.container,
                    ),
                };

                self.deps
                    .emit(
                        request_id,
                        Event::DeliveryStarted { item_id, server_id },
                        "delivery started",
                    )
                    .await;
                let transport = self.deps.transport_for(server.transport)?;
                match transport
                    .deliver(&server, Path::new(&local_path), &remote_path, progress, cancel)
                    .await
                {
                    Ok(receipt) => {
                        successes += 1;
                        receipts.insert(
                            format!("{server_id}"),
                            json!({
                                "path": remote_path,
                                "bytes": receipt.bytes_transferred,
                            }),
                        );
                        self.deps
                            .store
                            .upsert_library_entry(
                                request.tmdb_id,
                                request.kind,
                                server_id,
                                &remote_path,
                            )
                            .await?;
                        if item.kind == ItemKind::Episode
                            && let (Some(season), Some(episode)) = (item.season, item.episode)
                        {
                            self.deps
                                .store
                                .upsert_episode_entry(request.tmdb_id, season, episode, server_id)
                                .await?;
                        }
                        self.deps
                            .emit(
                                request_id,
                                Event::DeliveryCompleted {
                                    item_id,
                                    server_id,
                                    path: remote_path.clone(),
                                },
                                "delivery completed",
                            )
                            .await;
                        if let Err(err) = self.deps.scanner.scan(&server, &remote_path).await {
                            warn!(error = %err, server = %server.name, "library scan trigger failed");
                        } else {
                            self.deps
                                .emit(
                                    request_id,
                                    Event::ScanTriggered {
                                        server_id,
                                        path: remote_path.clone(),
                                    },
                                    "library scan triggered",
                                )
                                .await;
                        }
                        info!(item_id = %item_id, server = %server.name, "artifact delivered");
                    }
                    Err(CoreError::Cancelled) => return Err(CoreError::Cancelled.into()),
                    Err(err) => {
                        let message = format!("delivery to '{}' failed: {err}", server.name);
                        failures.push(message.clone());
                        self.deps
                            .emit(
                                request_id,
                                Event::DeliveryFailed {
                                    item_id,
                                    server_id,
                                    message,
                                },
                                "delivery failed",
                            )
                            .await;
                    }
                }
            }
        }

        if successes == 0 {
            // Encoded outputs stay recorded in the item context, so a retry
            // re-enters here without re-encoding.
            return Err(PipelineError::StepFailed {
                step: "deliver".to_owned(),
                message: failures.join("; "),
            });
        }

        self.deps
            .store
            .transition_item(item_id, &[ItemStatus::Delivering], ItemStatus::Completed)
            .await?;
        self.deps.store.set_item_progress(item_id, 100).await?;

        let mut data = Map::new();
        data.insert("delivery".into(), json!({ "receipts": receipts }));
        if failures.is_empty() {
            Ok(StepOutput::success_stop(data))
        } else {
            data.insert("delivery_errors".into(), json!(failures));
            Ok(StepOutput::success_stop(data))
        }
    }
}
