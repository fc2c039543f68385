//! Encode coordination: group targets by effective profile, dispatch jobs to
//! the encoder pool, mirror progress and run the track-cleanup remux.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use annex_core::{
    AssignmentStatus, CancelSignal, CoreError, EncodeAssignment, EncodeJobSpec, EncodeProfile,
    ItemStatus, ProgressSink, Request, StepContext,
};
use annex_events::Event;
use annex_quality::{encode_job_id, encode_output_path};

use crate::error::{PipelineError, PipelineResult};
use crate::step::{PipelineDeps, Step, StepOutput};

/// The `encode` step.
pub struct EncodeStep {
    deps: Arc<PipelineDeps>,
}

fn step_failed(message: impl Into<String>) -> PipelineError {
    PipelineError::StepFailed {
        step: "encode".to_owned(),
        message: message.into(),
    }
}

impl EncodeStep {
    /// Build the step over the shared dependencies.
    #[must_use]
    pub const fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    /// Resolve the effective profile per target and group the target servers
    /// by profile. Priority: target override, then server default, then
    /// system default.
    async fn profile_groups(
        &self,
        request: &Request,
    ) -> PipelineResult<BTreeMap<Uuid, Vec<Uuid>>> {
        let system_default = self.deps.store.default_profile().await?;
        let mut groups: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        for target in &request.targets {
            let server = self
                .deps
                .store
                .get_server(target.server_id)
                .await?
                .ok_or_else(|| CoreError::not_found("server", target.server_id))?;
            let profile_id = target
                .profile_id
                .or(server.default_profile_id)
                .or(system_default.as_ref().map(|profile| profile.id))
                .ok_or_else(|| {
                    step_failed(format!(
                        "no encode profile resolves for target server '{}'",
                        server.name
                    ))
                })?;
            groups.entry(profile_id).or_default().push(target.server_id);
        }
        Ok(groups)
    }

    /// Remove audio and subtitle tracks the profile does not keep. Failure
    /// leaves the original encoded file in place with a warning.
    async fn remux_track_cleanup(&self, encoded: &Path, profile: &EncodeProfile) {
        if profile.audio_languages.is_empty() && profile.subtitle_languages.is_empty() {
            return;
        }
        let cleaned: PathBuf = encoded.with_extension(format!("cleaned.{}", profile.container));
        let mut command = Command::new("ffmpeg");
        command.arg("-y").arg("-i").arg(encoded).arg("-map").arg("0:v:0");
        for language in &profile.audio_languages {
            command.arg("-map").arg(format!("0:a:m:language:{language}"));
        }
        for language in &profile.subtitle_languages {
            command
                .arg("-map")
                .arg(format!("0:s:m:language:{language}?"));
        }
        command.arg("-c").arg("copy").arg(&cleaned);

        match command.output().await {
            Ok(output) if output.status.success() => {
                if let Err(err) = tokio::fs::rename(&cleaned, encoded).await {
                    warn!(error = %err, path = %encoded.display(), "failed to swap remuxed file");
                }
            }
            Ok(output) => {
                let _ = tokio::fs::remove_file(&cleaned).await;
                warn!(
                    path = %encoded.display(),
                    status = %output.status,
                    "track-cleanup remux failed; delivering original encode"
                );
            }
            Err(err) => {
                warn!(
                    path = %encoded.display(),
                    error = %err,
                    "ffmpeg unavailable; delivering original encode"
                );
            }
        }
    }

    async fn run_job(
        &self,
        request_id: Uuid,
        job_id: Uuid,
        progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> PipelineResult<()> {
        let poll = self.deps.settings.encode.poll_interval();
        let active = [
            AssignmentStatus::Pending,
            AssignmentStatus::Assigned,
            AssignmentStatus::Encoding,
        ];
        loop {
            if cancel.is_cancelled() {
                let _ = self.deps.encoders.cancel(job_id, "cancelled by user").await;
                self.deps
                    .store
                    .transition_assignment(
                        job_id,
                        &active,
                        AssignmentStatus::Cancelled,
                        Some("cancelled by user"),
                    )
                    .await?;
                return Err(CoreError::Cancelled.into());
            }

            let update = self
                .deps
                .encoders
                .poll(job_id)
                .await
                .map_err(|err| step_failed(err.to_string()))?;
            self.deps
                .store
                .set_assignment_progress(job_id, update.progress)
                .await?;
            self.deps
                .store
                .transition_assignment(
                    job_id,
                    &[AssignmentStatus::Pending, AssignmentStatus::Assigned],
                    match update.status {
                        AssignmentStatus::Assigned => AssignmentStatus::Assigned,
                        _ => AssignmentStatus::Encoding,
                    },
                    None,
                )
                .await?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            progress.report(update.progress.clamp(0.0, 100.0) as u8, "encoding");
            let _ = self.deps.events.publish(Event::EncodeProgress {
                job_id,
                percent: update.progress,
            });

            match update.status {
                AssignmentStatus::Completed => {
                    self.deps
                        .store
                        .transition_assignment(job_id, &active, AssignmentStatus::Completed, None)
                        .await?;
                    return Ok(());
                }
                AssignmentStatus::Failed => {
                    let message = update
                        .error
                        .unwrap_or_else(|| "encode job failed".to_owned());
                    self.deps
                        .store
                        .transition_assignment(
                            job_id,
                            &active,
                            AssignmentStatus::Failed,
                            Some(&message),
                        )
                        .await?;
                    self.deps
                        .emit(
                            request_id,
                            Event::EncodeFailed {
                                job_id,
                                message: message.clone(),
                            },
                            "encode failed",
                        )
                        .await;
                    return Err(step_failed(message));
                }
                AssignmentStatus::Cancelled => {
                    return Err(CoreError::Cancelled.into());
                }
                AssignmentStatus::Pending
                | AssignmentStatus::Assigned
                | AssignmentStatus::Encoding => {}
            }

            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[async_trait]
impl Step for EncodeStep {
    fn kind(&self) -> &'static str {
        "encode"
    }

    fn validate_config(&self, config: &Value) -> PipelineResult<()> {
        if config.is_null() || config.as_object().is_some_and(Map::is_empty) {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig {
                step: "encode".to_owned(),
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
        if matches!(
            item.status,
            ItemStatus::Encoded | ItemStatus::Delivering | ItemStatus::Completed
        ) {
            return Ok(StepOutput::skip());
        }
        let request = self
            .deps
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("request", request_id))?;

        let source = item
            .step_context
            .source_file_path()
            .map(ToOwned::to_owned)
            .or_else(|| context.source_file_path().map(ToOwned::to_owned))
            .ok_or_else(|| step_failed("no source file mapped for item"))?;

        if !self.deps.encoders.has_encoders().await {
            return Err(step_failed("no encoder workers registered"));
        }

        let groups = self.profile_groups(&request).await?;
        self.deps
            .store
            .transition_item(
                item_id,
                &[ItemStatus::Downloaded, ItemStatus::Pending, ItemStatus::Encoding],
                ItemStatus::Encoding,
            )
            .await?;

        let mut encoded = Map::new();
        for (profile_id, server_ids) in groups {
            cancel.ensure_active()?;
            let profile = self
                .deps
                .store
                .get_profile(profile_id)
                .await?
                .ok_or_else(|| CoreError::not_found("encode_profile", profile_id))?;
            let job_id = encode_job_id(item_id, profile_id);
            let output =
                encode_output_path(&self.deps.settings.paths.staging_root, item_id, &profile);
            let output_string = output.to_string_lossy().into_owned();

            let already_done = self
                .deps
                .store
                .get_assignment(job_id)
                .await?
                .is_some_and(|assignment| assignment.status == AssignmentStatus::Completed);
            if already_done || item.step_context.encoded_path(profile_id).is_some() {
                encoded.insert(
                    profile_id.to_string(),
                    json!({ "path": output_string, "server_ids": server_ids }),
                );
                continue;
            }

            self.deps
                .store
                .create_assignment_if_absent(&EncodeAssignment {
                    job_id,
                    item_id,
                    request_id,
                    profile_id,
                    status: AssignmentStatus::Pending,
                    progress: 0.0,
                    output_path: output_string.clone(),
                    error: None,
                    updated_at: chrono::Utc::now(),
                })
                .await?;
            self.deps
                .encoders
                .submit(EncodeJobSpec {
                    job_id,
                    source_path: source.clone(),
                    output_path: output_string.clone(),
                    profile_id,
                })
                .await
                .map_err(|err| step_failed(err.to_string()))?;
            self.deps
                .store
                .link_item_encode_job(item_id, Some(job_id))
                .await?;
            self.deps
                .emit(
                    request_id,
                    Event::EncodeStarted {
                        item_id,
                        job_id,
                        profile_id,
                    },
                    "encode dispatched",
                )
                .await;
            info!(item_id = %item_id, job_id = %job_id, profile = %profile.name, "encode submitted");

            self.run_job(request_id, job_id, progress, cancel).await?;
            self.remux_track_cleanup(&output, &profile).await;
            self.deps
                .emit(
                    request_id,
                    Event::EncodeCompleted {
                        job_id,
                        output_path: output_string.clone(),
                    },
                    "encode completed",
                )
                .await;

            let mut item_context = self
                .deps
                .store
                .get_item(item_id)
                .await?
                .map(|fresh| fresh.step_context)
                .unwrap_or_default();
            item_context.set_encoded_path(profile_id, &output_string);
            self.deps
                .store
                .set_item_context(item_id, &item_context)
                .await?;

            encoded.insert(
                profile_id.to_string(),
                json!({ "path": output_string, "server_ids": server_ids }),
            );
        }

        self.deps
            .store
            .transition_item(item_id, &[ItemStatus::Encoding], ItemStatus::Encoded)
            .await?;
        self.deps.store.link_item_encode_job(item_id, None).await?;

        let mut data = Map::new();
        data.insert("encoded".into(), Value::Object(encoded));
        Ok(StepOutput::success(data))
    }
}
