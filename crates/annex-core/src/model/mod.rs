//! Persisted entities and value objects for the acquisition pipeline.
//!
//! # Design
//! - Pure data carriers used by the store, the executor and the command
//!   facade.
//! - Status enums round-trip through snake_case labels so database columns
//!   and API payloads share one vocabulary.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::StepContext;

/// Video resolutions the pipeline reasons about, ordered from lowest to
/// highest. The derived [`Ord`] is the quality order used for release
/// filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Standard definition, 480 vertical lines.
    #[serde(rename = "480p")]
    Sd480,
    /// 720p high definition.
    #[serde(rename = "720p")]
    Hd720,
    /// 1080p full high definition.
    #[serde(rename = "1080p")]
    Fhd1080,
    /// 2160p ultra high definition.
    #[serde(rename = "2160p")]
    Uhd2160,
}

impl Resolution {
    /// Render the resolution as its canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sd480 => "480p",
            Self::Hd720 => "720p",
            Self::Fhd1080 => "1080p",
            Self::Uhd2160 => "2160p",
        }
    }

    /// Parse a canonical label produced by [`Resolution::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "480p" => Some(Self::Sd480),
            "720p" => Some(Self::Hd720),
            "1080p" => Some(Self::Fhd1080),
            "2160p" => Some(Self::Uhd2160),
            _ => None,
        }
    }

    /// Leniently parse a resolution out of free-form text such as a release
    /// name or an indexer attribute. Matches the highest resolution whose
    /// marker appears anywhere in the input; returns `None` when no marker is
    /// present (e.g. plain `hdtv`).
    #[must_use]
    pub fn parse_loose(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        if lower.contains("2160") || lower.contains("4k") || lower.contains("uhd") {
            return Some(Self::Uhd2160);
        }
        if lower.contains("1080") {
            return Some(Self::Fhd1080);
        }
        if lower.contains("720") {
            return Some(Self::Hd720);
        }
        if lower.contains("480") || lower.contains("sd") {
            return Some(Self::Sd480);
        }
        None
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media kind of a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// A single movie.
    Movie,
    /// A television show (one or more episodes).
    Tv,
}

impl MediaKind {
    /// Render the kind as its snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Tv => "tv",
        }
    }

    /// Parse a label produced by [`MediaKind::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "movie" => Some(Self::Movie),
            "tv" => Some(Self::Tv),
            _ => None,
        }
    }
}

/// Kind of an individual processing item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// The single deliverable of a movie request.
    Movie,
    /// One episode of a TV request.
    Episode,
}

impl ItemKind {
    /// Render the kind as its snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Episode => "episode",
        }
    }

    /// Parse a label produced by [`ItemKind::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "movie" => Some(Self::Movie),
            "episode" => Some(Self::Episode),
            _ => None,
        }
    }
}

/// Lifecycle states of a [`ProcessingItem`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Created, waiting for the pipeline to pick the item up.
    Pending,
    /// A search step is querying indexers.
    Searching,
    /// No releases were found; the scheduler will retry later.
    Awaiting,
    /// Releases exist but none meet the quality requirement.
    QualityUnavailable,
    /// A torrent is downloading for this item.
    Downloading,
    /// The source file has been located and mapped to the item.
    Downloaded,
    /// An encode job is running for this item.
    Encoding,
    /// All required encodes finished.
    Encoded,
    /// Artifacts are being transferred to target servers.
    Delivering,
    /// All work finished; at least one target received the artifact.
    Completed,
    /// The item failed and requires user action.
    Failed,
    /// The item was cancelled by the user.
    Cancelled,
}

impl ItemStatus {
    /// Render the status as its snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Searching => "searching",
            Self::Awaiting => "awaiting",
            Self::QualityUnavailable => "quality_unavailable",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Encoding => "encoding",
            Self::Encoded => "encoded",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a label produced by [`ItemStatus::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "searching" => Some(Self::Searching),
            "awaiting" => Some(Self::Awaiting),
            "quality_unavailable" => Some(Self::QualityUnavailable),
            "downloading" => Some(Self::Downloading),
            "downloaded" => Some(Self::Downloaded),
            "encoding" => Some(Self::Encoding),
            "encoded" => Some(Self::Encoded),
            "delivering" => Some(Self::Delivering),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the status is terminal. Terminal items are never re-entered
    /// except through an explicit retry or reprocess command.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether the item is in an actively progressing stage.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Searching
                | Self::Downloading
                | Self::Downloaded
                | Self::Encoding
                | Self::Encoded
                | Self::Delivering
        )
    }
}

/// Aggregated status of a [`Request`], always derived from its items.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// No item has started work.
    Pending,
    /// Items are searching for releases.
    Searching,
    /// All remaining items are waiting for releases to appear.
    Awaiting,
    /// All remaining items found only below-quality releases.
    QualityUnavailable,
    /// Items are downloading.
    Downloading,
    /// Items are encoding.
    Encoding,
    /// Items are delivering.
    Delivering,
    /// Every item is done and at least one completed.
    Completed,
    /// At least one item failed with no active siblings.
    Failed,
    /// Every item was cancelled.
    Cancelled,
}

impl RequestStatus {
    /// Render the status as its snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Searching => "searching",
            Self::Awaiting => "awaiting",
            Self::QualityUnavailable => "quality_unavailable",
            Self::Downloading => "downloading",
            Self::Encoding => "encoding",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle states of a tracked [`Download`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Submitted to the torrent client but not yet transferring.
    Pending,
    /// Actively transferring payload data.
    Downloading,
    /// All bytes present on disk.
    Completed,
    /// File mapping is consuming the payload.
    Importing,
    /// Mapping finished; the payload has served its purpose.
    Processed,
    /// The torrent failed and no alternatives remain.
    Failed,
    /// The download was cancelled alongside its request.
    Cancelled,
}

impl DownloadStatus {
    /// Render the status as its snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Importing => "importing",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a label produced by [`DownloadStatus::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "completed" => Some(Self::Completed),
            "importing" => Some(Self::Importing),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the torrent still needs health monitoring.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Downloading)
    }
}

/// Lifecycle states of an [`Execution`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The executor is driving the step tree.
    Running,
    /// A step requested a pause; a resume command continues the tree.
    Paused,
    /// The tree ran to completion (including graceful retry-later exits).
    Completed,
    /// The tree aborted with an error.
    Failed,
    /// The execution was cancelled.
    Cancelled,
}

impl ExecutionStatus {
    /// Render the status as its snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a label produced by [`ExecutionStatus::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Lifecycle states of an [`EncodeAssignment`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Submitted, waiting for an encoder to claim the job.
    Pending,
    /// Claimed by an encoder, not yet transcoding.
    Assigned,
    /// Actively transcoding.
    Encoding,
    /// Finished successfully.
    Completed,
    /// Failed with an error.
    Failed,
    /// Cancelled by the coordinator.
    Cancelled,
}

impl AssignmentStatus {
    /// Render the status as its snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Encoding => "encoding",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a label produced by [`AssignmentStatus::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "encoding" => Some(Self::Encoding),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the assignment can still make progress and therefore must be
    /// cancelled when its request is torn down.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Assigned | Self::Encoding)
    }
}

/// File transfer protocol a storage server is reached through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Plain filesystem copy (server root is locally mounted).
    LocalCopy,
    /// SFTP over SSH.
    Sftp,
    /// rsync over SSH.
    Rsync,
    /// SMB/CIFS share.
    Smb,
}

impl TransportKind {
    /// Render the kind as its snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalCopy => "local_copy",
            Self::Sftp => "sftp",
            Self::Rsync => "rsync",
            Self::Smb => "smb",
        }
    }

    /// Parse a label produced by [`TransportKind::as_str`].
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "local_copy" => Some(Self::LocalCopy),
            "sftp" => Some(Self::Sftp),
            "rsync" => Some(Self::Rsync),
            "smb" => Some(Self::Smb),
            _ => None,
        }
    }
}

/// A (server, optional profile) pair identifying where output goes and how it
/// should be encoded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// Storage server receiving the encoded artifact.
    pub server_id: Uuid,
    /// Optional per-target encode profile override.
    #[serde(default)]
    pub profile_id: Option<Uuid>,
}

/// An indexer-returned candidate source. Not persisted on its own; embedded
/// in requests and downloads as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    /// Raw release title as reported by the indexer.
    pub title: String,
    /// Indexer that produced the release.
    pub indexer: String,
    /// Resolution parsed from the title, when present.
    pub resolution: Option<Resolution>,
    /// Source marker parsed from the title (e.g. `bluray`, `web-dl`).
    pub source: Option<String>,
    /// Codec marker parsed from the title (e.g. `x265`).
    pub codec: Option<String>,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// Seeder count at query time.
    pub seeders: u32,
    /// Leecher count at query time.
    pub leechers: u32,
    /// Download URL or magnet URI.
    pub download_url: String,
    /// Publish date reported by the indexer.
    pub published_at: Option<DateTime<Utc>>,
    /// Raw ranking score assigned by the quality engine.
    #[serde(default)]
    pub score: i64,
}

/// Top-level user intent: one movie or a set of TV episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Primary key.
    pub id: Uuid,
    /// Media kind of the request.
    pub kind: MediaKind,
    /// External catalog identifier (TMDB).
    pub tmdb_id: i64,
    /// Title as requested by the user.
    pub title: String,
    /// Release year, when known.
    pub year: Option<i32>,
    /// Requested season numbers for TV requests.
    pub seasons: Option<Vec<i32>>,
    /// Requested episode numbers (within a single season) for TV requests.
    pub episodes: Option<Vec<i32>>,
    /// Ordered, non-empty list of delivery targets.
    pub targets: Vec<Target>,
    /// Pinned release (manual selection or accept-lower-quality).
    pub selected_release: Option<Release>,
    /// Stored below-quality candidates for the accept-lower-quality flow.
    pub available_releases: Vec<Release>,
    /// Minimum source resolution, derived once from the targets.
    pub required_resolution: Option<Resolution>,
    /// Whether the scheduler watches this TV request for new episodes.
    pub subscribed: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Set when the aggregated status first reached completed.
    pub completed_at: Option<DateTime<Utc>>,
}

/// The pipeline's unit of work: one per movie, one per episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingItem {
    /// Primary key.
    pub id: Uuid,
    /// Owning request.
    pub request_id: Uuid,
    /// Item kind.
    pub kind: ItemKind,
    /// Season number for episode items.
    pub season: Option<i32>,
    /// Episode number for episode items.
    pub episode: Option<i32>,
    /// Air date for episode items.
    pub air_date: Option<NaiveDate>,
    /// Episode title, when known.
    pub title: Option<String>,
    /// Current lifecycle status.
    pub status: ItemStatus,
    /// Name of the last step that owned the item.
    pub current_step: Option<String>,
    /// Accreted step outputs; the source of truth for resumable state.
    pub step_context: StepContext,
    /// Display progress in percent, 0-100.
    pub progress: u8,
    /// Attempts consumed so far.
    pub attempts: i32,
    /// Attempt ceiling before the item fails permanently.
    pub max_attempts: i32,
    /// Compact error string from the last failure.
    pub last_error: Option<String>,
    /// Earliest time the scheduler may retry an awaiting item.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Download feeding this item, when one is attached.
    pub download_id: Option<Uuid>,
    /// Encode job currently running for this item, when one is active.
    pub encode_job_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A torrent the system cares about. One row per torrent hash; shared by all
/// items expecting files from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Download {
    /// Primary key.
    pub id: Uuid,
    /// Request that caused the download.
    pub request_id: Uuid,
    /// Torrent info hash (unique across the table).
    pub torrent_hash: String,
    /// Torrent display name.
    pub name: String,
    /// Save path reported by the torrent client.
    pub save_path: Option<String>,
    /// Content path reported by the torrent client.
    pub content_path: Option<String>,
    /// Current lifecycle status.
    pub status: DownloadStatus,
    /// Transfer progress in percent, 0-100.
    pub progress: f64,
    /// Seeder count from the last health check.
    pub seeders: i32,
    /// Peer count from the last health check.
    pub peers: i32,
    /// Payload size in bytes.
    pub size_bytes: i64,
    /// Ordered releases to try if this torrent stalls.
    pub alternatives: Vec<Release>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One addressable unit of work in a template tree. Interpreted, not
/// compiled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    /// Step kind resolved through the registry.
    pub kind: String,
    /// Unique name of the step within its template.
    pub name: String,
    /// Opaque per-kind configuration payload.
    #[serde(default)]
    pub config: Value,
    /// Optional condition evaluated against the context before execution.
    #[serde(default)]
    pub condition: Option<Value>,
    /// Whether a failure of this step fails the branch.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Whether a failure is logged and absorbed instead of propagated.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Whether the scheduler may re-arm this step after a graceful exit.
    #[serde(default)]
    pub retryable: bool,
    /// Optional per-step timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Child steps executed after this one succeeds.
    #[serde(default)]
    pub children: Vec<StepDefinition>,
}

const fn default_true() -> bool {
    true
}

impl StepDefinition {
    /// Build a minimal definition of the given kind, named after the kind.
    #[must_use]
    pub fn of_kind(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            name: kind.clone(),
            kind,
            config: Value::Null,
            condition: None,
            required: true,
            continue_on_error: false,
            retryable: false,
            timeout_secs: None,
            children: Vec::new(),
        }
    }

    /// Append a child step, returning the modified definition.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }
}

/// A reusable, versioned tree of step definitions keyed by media kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTemplate {
    /// Primary key.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Media kind the template applies to.
    pub media_kind: MediaKind,
    /// Monotonic version; edits bump it.
    pub version: i32,
    /// Whether this template is the default for its kind.
    pub is_default: bool,
    /// Root steps of the tree.
    pub steps: Vec<StepDefinition>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One activation of a template against a request. The steps tree is a
/// snapshot so later template edits never mutate history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Primary key.
    pub id: Uuid,
    /// Request the execution drives.
    pub request_id: Uuid,
    /// Template the steps were snapshotted from.
    pub template_id: Uuid,
    /// Snapshot of the step tree at activation time.
    pub steps: Vec<StepDefinition>,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Name of the step most recently entered.
    pub current_step: Option<String>,
    /// Parent execution for per-episode branch executions.
    pub parent_execution_id: Option<Uuid>,
    /// Processing item a branch execution is scoped to.
    pub episode_item_id: Option<Uuid>,
    /// Advisory context snapshot; items' `step_context` is authoritative.
    pub context: StepContext,
    /// Reason recorded when a step paused the execution.
    pub pause_reason: Option<String>,
    /// Error recorded when the execution failed.
    pub error: Option<String>,
    /// Activation timestamp.
    pub started_at: DateTime<Utc>,
    /// Set when the execution reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Append-only user-visible history entry for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Monotonic sequence number within the log.
    pub seq: i64,
    /// Request the entry belongs to.
    pub request_id: Uuid,
    /// Machine-friendly event kind.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Structured detail payload.
    pub details: Value,
    /// Emission timestamp.
    pub at: DateTime<Utc>,
}

/// A storage server artifacts are delivered to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Primary key.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Highest resolution the server's clients play; drives the request's
    /// required resolution.
    pub max_resolution: Resolution,
    /// Root directory for movie artifacts.
    pub movie_root: String,
    /// Root directory for TV artifacts.
    pub tv_root: String,
    /// Transport protocol used to reach the server.
    pub transport: TransportKind,
    /// Opaque transport endpoint descriptor (host, user, share, ...).
    pub endpoint: Value,
    /// Default encode profile for targets without an override.
    pub default_profile_id: Option<Uuid>,
}

/// An encode profile describing the desired output of a transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeProfile {
    /// Primary key.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Output container extension (e.g. `mkv`).
    pub container: String,
    /// Output video codec label (e.g. `hevc`).
    pub video_codec: String,
    /// Extra encoder arguments forwarded verbatim.
    pub args: Vec<String>,
    /// Audio languages kept by the track-cleanup remux.
    pub audio_languages: Vec<String>,
    /// Subtitle languages kept by the track-cleanup remux.
    pub subtitle_languages: Vec<String>,
    /// Whether this profile is the system default.
    pub is_default: bool,
}

/// Tracking row for one encode job dispatched to the encoder pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeAssignment {
    /// Encode job identifier; derived deterministically from the item.
    pub job_id: Uuid,
    /// Item the encode belongs to.
    pub item_id: Uuid,
    /// Owning request, for cascade cancellation.
    pub request_id: Uuid,
    /// Profile the job encodes to.
    pub profile_id: Uuid,
    /// Current lifecycle status; the pool is the writer while active.
    pub status: AssignmentStatus,
    /// Transcode progress in percent, 0-100.
    pub progress: f64,
    /// Output path the encoded artifact lands at.
    pub output_path: String,
    /// Error recorded when the job failed or was cancelled.
    pub error: Option<String>,
    /// Last progress update; the stuck detector reads this.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_order_matches_quality() {
        assert!(Resolution::Sd480 < Resolution::Hd720);
        assert!(Resolution::Hd720 < Resolution::Fhd1080);
        assert!(Resolution::Fhd1080 < Resolution::Uhd2160);
    }

    #[test]
    fn resolution_loose_parsing_handles_marker_soup() {
        assert_eq!(Resolution::parse_loose("UHD 4K"), Some(Resolution::Uhd2160));
        assert_eq!(
            Resolution::parse_loose("Some.Movie.2019.2160p.WEB-DL"),
            Some(Resolution::Uhd2160)
        );
        assert_eq!(
            Resolution::parse_loose("Show.S01.1080p.BluRay"),
            Some(Resolution::Fhd1080)
        );
        assert_eq!(Resolution::parse_loose("720P HDTV"), Some(Resolution::Hd720));
        assert_eq!(Resolution::parse_loose("hdtv"), None);
        assert_eq!(Resolution::parse_loose(""), None);
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            ItemStatus::Pending,
            ItemStatus::Searching,
            ItemStatus::Awaiting,
            ItemStatus::QualityUnavailable,
            ItemStatus::Downloading,
            ItemStatus::Downloaded,
            ItemStatus::Encoding,
            ItemStatus::Encoded,
            ItemStatus::Delivering,
            ItemStatus::Completed,
            ItemStatus::Failed,
            ItemStatus::Cancelled,
        ] {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ItemStatus::parse("bogus"), None);

        for status in [
            DownloadStatus::Pending,
            DownloadStatus::Downloading,
            DownloadStatus::Completed,
            DownloadStatus::Importing,
            DownloadStatus::Processed,
            DownloadStatus::Failed,
            DownloadStatus::Cancelled,
        ] {
            assert_eq!(DownloadStatus::parse(status.as_str()), Some(status));
        }

        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Paused,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }

        for status in [
            AssignmentStatus::Pending,
            AssignmentStatus::Assigned,
            AssignmentStatus::Encoding,
            AssignmentStatus::Completed,
            AssignmentStatus::Failed,
            AssignmentStatus::Cancelled,
        ] {
            assert_eq!(AssignmentStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn terminal_and_active_classification() {
        assert!(ItemStatus::Completed.is_terminal());
        assert!(ItemStatus::Cancelled.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(!ItemStatus::Awaiting.is_terminal());
        assert!(ItemStatus::Downloading.is_active());
        assert!(!ItemStatus::Awaiting.is_active());
        assert!(AssignmentStatus::Encoding.is_active());
        assert!(!AssignmentStatus::Completed.is_active());
    }

    #[test]
    fn step_definition_defaults_from_json() {
        let parsed: StepDefinition = serde_json::from_value(serde_json::json!({
            "kind": "search",
            "name": "find release",
        }))
        .expect("minimal step definition should parse");
        assert!(parsed.required);
        assert!(!parsed.continue_on_error);
        assert!(parsed.children.is_empty());
        assert_eq!(parsed.config, Value::Null);
    }
}
