//! Row structs and conversions between database rows and domain entities.
//!
//! # Design
//! - `FromRow` structs keep raw column types; `TryFrom` conversions parse
//!   status labels and JSON payloads into domain values.
//! - Decode failures carry the offending column so bad rows are
//!   reproducible in tests.

use annex_core::{
    ActivityEntry, AssignmentStatus, Download, DownloadStatus, EncodeAssignment, EncodeProfile,
    Execution, ExecutionStatus, ItemKind, ItemStatus, MediaKind, PipelineTemplate, ProcessingItem,
    Release, Request, Resolution, ServerConfig, StepContext, StepDefinition, Target,
    TransportKind,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// Failure while decoding a persisted row into a domain entity.
#[derive(Debug)]
pub struct DecodeError {
    /// Column the failure originated from.
    pub column: &'static str,
    /// Human-readable decode detail.
    pub detail: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to decode column {}: {}", self.column, self.detail)
    }
}

impl std::error::Error for DecodeError {}

impl DecodeError {
    fn new(column: &'static str, detail: impl Into<String>) -> Self {
        Self {
            column,
            detail: detail.into(),
        }
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &'static str,
    value: Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|err| DecodeError::new(column, err.to_string()))
}

fn decode_label<T>(
    column: &'static str,
    label: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, DecodeError> {
    parse(label).ok_or_else(|| DecodeError::new(column, format!("unknown label '{label}'")))
}

/// Clamp a persisted progress column into the 0-100 display range.
#[must_use]
pub fn progress_from_db(value: i16) -> u8 {
    value.clamp(0, 100).try_into().unwrap_or(100)
}

/// Raw `annex_request` row.
#[derive(Debug, FromRow)]
pub struct RequestRow {
    /// Primary key.
    pub id: Uuid,
    /// Media kind label.
    pub kind: String,
    /// External catalog identifier.
    pub tmdb_id: i64,
    /// Requested title.
    pub title: String,
    /// Release year.
    pub year: Option<i32>,
    /// Requested seasons payload.
    pub seasons: Option<Json<Vec<i32>>>,
    /// Requested episodes payload.
    pub episodes: Option<Json<Vec<i32>>>,
    /// Targets payload.
    pub targets: Json<Value>,
    /// Pinned release payload.
    pub selected_release: Option<Json<Value>>,
    /// Below-quality candidates payload.
    pub available_releases: Json<Value>,
    /// Required resolution label.
    pub required_resolution: Option<String>,
    /// Subscription flag.
    pub subscribed: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RequestRow> for Request {
    type Error = DecodeError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let targets: Vec<Target> = decode_json("targets", row.targets.0)?;
        let selected_release = row
            .selected_release
            .map(|json| decode_json::<Release>("selected_release", json.0))
            .transpose()?;
        let available_releases: Vec<Release> =
            decode_json("available_releases", row.available_releases.0)?;
        let required_resolution = row
            .required_resolution
            .as_deref()
            .map(|label| decode_label("required_resolution", label, Resolution::parse))
            .transpose()?;

        Ok(Self {
            id: row.id,
            kind: decode_label("kind", &row.kind, MediaKind::parse)?,
            tmdb_id: row.tmdb_id,
            title: row.title,
            year: row.year,
            seasons: row.seasons.map(|json| json.0),
            episodes: row.episodes.map(|json| json.0),
            targets,
            selected_release,
            available_releases,
            required_resolution,
            subscribed: row.subscribed,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

/// Raw `annex_processing_item` row.
#[derive(Debug, FromRow)]
pub struct ItemRow {
    /// Primary key.
    pub id: Uuid,
    /// Owning request.
    pub request_id: Uuid,
    /// Item kind label.
    pub kind: String,
    /// Season number.
    pub season: Option<i32>,
    /// Episode number.
    pub episode: Option<i32>,
    /// Air date.
    pub air_date: Option<NaiveDate>,
    /// Episode title.
    pub title: Option<String>,
    /// Status label.
    pub status: String,
    /// Last owning step.
    pub current_step: Option<String>,
    /// Step context payload.
    pub step_context: Json<Value>,
    /// Display progress.
    pub progress: i16,
    /// Attempts consumed.
    pub attempts: i32,
    /// Attempt ceiling.
    pub max_attempts: i32,
    /// Last failure detail.
    pub last_error: Option<String>,
    /// Earliest retry time.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Attached download.
    pub download_id: Option<Uuid>,
    /// Active encode job.
    pub encode_job_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for ProcessingItem {
    type Error = DecodeError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            kind: decode_label("kind", &row.kind, ItemKind::parse)?,
            season: row.season,
            episode: row.episode,
            air_date: row.air_date,
            title: row.title,
            status: decode_label("status", &row.status, ItemStatus::parse)?,
            current_step: row.current_step,
            step_context: StepContext::from_value(row.step_context.0),
            progress: progress_from_db(row.progress),
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            next_retry_at: row.next_retry_at,
            download_id: row.download_id,
            encode_job_id: row.encode_job_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Raw `annex_download` row.
#[derive(Debug, FromRow)]
pub struct DownloadRow {
    /// Primary key.
    pub id: Uuid,
    /// Owning request.
    pub request_id: Uuid,
    /// Torrent info hash.
    pub torrent_hash: String,
    /// Torrent display name.
    pub name: String,
    /// Save path.
    pub save_path: Option<String>,
    /// Content path.
    pub content_path: Option<String>,
    /// Status label.
    pub status: String,
    /// Transfer progress.
    pub progress: f64,
    /// Seeder count.
    pub seeders: i32,
    /// Peer count.
    pub peers: i32,
    /// Payload size.
    pub size_bytes: i64,
    /// Alternative releases payload.
    pub alternatives: Json<Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DownloadRow> for Download {
    type Error = DecodeError;

    fn try_from(row: DownloadRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            torrent_hash: row.torrent_hash,
            name: row.name,
            save_path: row.save_path,
            content_path: row.content_path,
            status: decode_label("status", &row.status, DownloadStatus::parse)?,
            progress: row.progress,
            seeders: row.seeders,
            peers: row.peers,
            size_bytes: row.size_bytes,
            alternatives: decode_json("alternatives", row.alternatives.0)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Raw `annex_execution` row.
#[derive(Debug, FromRow)]
pub struct ExecutionRow {
    /// Primary key.
    pub id: Uuid,
    /// Owning request.
    pub request_id: Uuid,
    /// Source template.
    pub template_id: Uuid,
    /// Snapshotted step tree payload.
    pub steps: Json<Value>,
    /// Status label.
    pub status: String,
    /// Most recently entered step.
    pub current_step: Option<String>,
    /// Parent execution for branches.
    pub parent_execution_id: Option<Uuid>,
    /// Item a branch execution is scoped to.
    pub episode_item_id: Option<Uuid>,
    /// Advisory context payload.
    pub context: Json<Value>,
    /// Pause reason.
    pub pause_reason: Option<String>,
    /// Failure detail.
    pub error: Option<String>,
    /// Activation timestamp.
    pub started_at: DateTime<Utc>,
    /// Terminal timestamp.
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = DecodeError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let steps: Vec<StepDefinition> = decode_json("steps", row.steps.0)?;
        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            template_id: row.template_id,
            steps,
            status: decode_label("status", &row.status, ExecutionStatus::parse)?,
            current_step: row.current_step,
            parent_execution_id: row.parent_execution_id,
            episode_item_id: row.episode_item_id,
            context: StepContext::from_value(row.context.0),
            pause_reason: row.pause_reason,
            error: row.error,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

/// Raw `annex_activity_log` row.
#[derive(Debug, FromRow)]
pub struct ActivityRow {
    /// Sequence number.
    pub seq: i64,
    /// Owning request.
    pub request_id: Uuid,
    /// Event kind.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details payload.
    pub details: Json<Value>,
    /// Emission timestamp.
    pub at: DateTime<Utc>,
}

impl From<ActivityRow> for ActivityEntry {
    fn from(row: ActivityRow) -> Self {
        Self {
            seq: row.seq,
            request_id: row.request_id,
            kind: row.kind,
            message: row.message,
            details: row.details.0,
            at: row.at,
        }
    }
}

/// Raw `annex_pipeline_template` row.
#[derive(Debug, FromRow)]
pub struct TemplateRow {
    /// Primary key.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Media kind label.
    pub media_kind: String,
    /// Version counter.
    pub version: i32,
    /// Default flag.
    pub is_default: bool,
    /// Step tree payload.
    pub steps: Json<Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for PipelineTemplate {
    type Error = DecodeError;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            media_kind: decode_label("media_kind", &row.media_kind, MediaKind::parse)?,
            version: row.version,
            is_default: row.is_default,
            steps: decode_json("steps", row.steps.0)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Raw `annex_encode_assignment` row.
#[derive(Debug, FromRow)]
pub struct AssignmentRow {
    /// Job identifier.
    pub job_id: Uuid,
    /// Item the encode belongs to.
    pub item_id: Uuid,
    /// Owning request.
    pub request_id: Uuid,
    /// Target profile.
    pub profile_id: Uuid,
    /// Status label.
    pub status: String,
    /// Transcode progress.
    pub progress: f64,
    /// Output artifact path.
    pub output_path: String,
    /// Failure detail.
    pub error: Option<String>,
    /// Last progress update.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AssignmentRow> for EncodeAssignment {
    type Error = DecodeError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            job_id: row.job_id,
            item_id: row.item_id,
            request_id: row.request_id,
            profile_id: row.profile_id,
            status: decode_label("status", &row.status, AssignmentStatus::parse)?,
            progress: row.progress,
            output_path: row.output_path,
            error: row.error,
            updated_at: row.updated_at,
        })
    }
}

/// Raw `annex_server` row.
#[derive(Debug, FromRow)]
pub struct ServerRow {
    /// Primary key.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Maximum playback resolution label.
    pub max_resolution: String,
    /// Movie root directory.
    pub movie_root: String,
    /// TV root directory.
    pub tv_root: String,
    /// Transport label.
    pub transport: String,
    /// Transport endpoint payload.
    pub endpoint: Json<Value>,
    /// Default encode profile.
    pub default_profile_id: Option<Uuid>,
}

impl TryFrom<ServerRow> for ServerConfig {
    type Error = DecodeError;

    fn try_from(row: ServerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            max_resolution: decode_label("max_resolution", &row.max_resolution, Resolution::parse)?,
            movie_root: row.movie_root,
            tv_root: row.tv_root,
            transport: decode_label("transport", &row.transport, TransportKind::parse)?,
            endpoint: row.endpoint.0,
            default_profile_id: row.default_profile_id,
        })
    }
}

/// Raw `annex_encode_profile` row.
#[derive(Debug, FromRow)]
pub struct ProfileRow {
    /// Primary key.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Output container.
    pub container: String,
    /// Output video codec.
    pub video_codec: String,
    /// Extra encoder arguments payload.
    pub args: Json<Vec<String>>,
    /// Kept audio languages payload.
    pub audio_languages: Json<Vec<String>>,
    /// Kept subtitle languages payload.
    pub subtitle_languages: Json<Vec<String>>,
    /// System default flag.
    pub is_default: bool,
}

impl From<ProfileRow> for EncodeProfile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            container: row.container,
            video_codec: row.video_codec,
            args: row.args.0,
            audio_languages: row.audio_languages.0,
            subtitle_languages: row.subtitle_languages.0,
            is_default: row.is_default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annex_core::Target;
    use serde_json::json;

    #[test]
    fn progress_is_clamped_into_display_range() {
        assert_eq!(progress_from_db(-5), 0);
        assert_eq!(progress_from_db(42), 42);
        assert_eq!(progress_from_db(900), 100);
    }

    #[test]
    fn release_payload_round_trips() {
        let release = Release {
            title: "Movie.2020.1080p.WEB-DL".to_string(),
            indexer: "torznab".to_string(),
            resolution: Some(Resolution::Fhd1080),
            source: Some("web-dl".to_string()),
            codec: Some("x264".to_string()),
            size_bytes: 8 << 30,
            seeders: 12,
            leechers: 3,
            download_url: "magnet:?xt=demo".to_string(),
            published_at: None,
            score: 3_400,
        };
        let value = serde_json::to_value(&release).expect("serialise");
        let decoded: Release = decode_json("selected_release", value).expect("decode");
        assert_eq!(decoded, release);
    }

    #[test]
    fn unknown_labels_are_decode_errors() {
        let err =
            decode_label("status", "warp_speed", ItemStatus::parse).expect_err("unknown label");
        assert_eq!(err.column, "status");
        assert!(err.detail.contains("warp_speed"));
    }

    #[test]
    fn step_tree_payload_round_trips() {
        let steps = vec![
            StepDefinition::of_kind("search")
                .with_child(StepDefinition::of_kind("download_start")),
        ];
        let value = serde_json::to_value(&steps).expect("serialise");
        let decoded: Vec<StepDefinition> = decode_json("steps", value).expect("decode");
        assert_eq!(decoded, steps);
    }

    #[test]
    fn malformed_targets_payload_is_reported() {
        let err = decode_json::<Vec<Target>>("targets", json!({"not": "a list"}))
            .expect_err("object is not a target list");
        assert_eq!(err.column, "targets");
    }
}
