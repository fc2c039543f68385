//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers used by every component that needs a timing knob.
//! - Durations are explicit second counts; validation lives in
//!   `validate.rs`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root of the settings tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Database connection settings.
    pub database: DatabaseSettings,
    /// Download monitoring settings.
    pub download: DownloadSettings,
    /// Encoder coordination settings.
    pub encode: EncodeSettings,
    /// Scheduler sweep cadences.
    pub scheduler: SchedulerSettings,
    /// Pipeline retry policy.
    pub pipeline: PipelineSettings,
    /// Filesystem locations the pipeline works in.
    pub paths: PathSettings,
    /// External collaborator endpoints.
    pub clients: ClientSettings,
}

/// External collaborator endpoints used by the bootstrap wiring.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ClientSettings {
    /// qBittorrent Web UI connection.
    pub qbittorrent: QbitSettings,
    /// TMDB API key.
    pub tmdb_api_key: String,
    /// Torznab indexer endpoints.
    pub indexers: Vec<IndexerEndpointSettings>,
    /// Encoder pool coordinator connection.
    pub encoder_pool: EncoderPoolSettings,
}

/// Encoder pool coordinator connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EncoderPoolSettings {
    /// Coordinator base URL.
    pub base_url: String,
}

impl Default for EncoderPoolSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7700/".to_owned(),
        }
    }
}

/// qBittorrent Web UI connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QbitSettings {
    /// Web UI base URL.
    pub base_url: String,
    /// Web UI username.
    pub username: String,
    /// Web UI password.
    pub password: String,
}

impl Default for QbitSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_owned(),
            username: "admin".to_owned(),
            password: String::new(),
        }
    }
}

/// One Torznab indexer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct IndexerEndpointSettings {
    /// Display name used in logs and release attribution.
    pub name: String,
    /// API base URL.
    pub base_url: String,
    /// API key.
    pub api_key: String,
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Postgres connection URL. The `DATABASE_URL` environment variable
    /// overrides the file value.
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
        }
    }
}

/// Download monitoring and stall-handling settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DownloadSettings {
    /// Seconds between torrent progress polls.
    pub poll_interval_secs: u64,
    /// Seconds without progress before a download counts as stalled.
    pub stall_window_secs: u64,
    /// Transfer rate floor in bytes per second; below this a download is
    /// considered to be making no progress.
    pub stall_speed_floor_bps: u64,
    /// Overall completion timeout for movie downloads, in seconds.
    pub movie_timeout_secs: u64,
    /// Overall completion timeout for TV downloads, in seconds.
    pub tv_timeout_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::DOWNLOAD_POLL_INTERVAL_SECS,
            stall_window_secs: defaults::DOWNLOAD_STALL_WINDOW_SECS,
            stall_speed_floor_bps: defaults::DOWNLOAD_STALL_SPEED_FLOOR_BPS,
            movie_timeout_secs: defaults::DOWNLOAD_MOVIE_TIMEOUT_SECS,
            tv_timeout_secs: defaults::DOWNLOAD_TV_TIMEOUT_SECS,
        }
    }
}

impl DownloadSettings {
    /// Poll cadence as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Stall window as a [`Duration`].
    #[must_use]
    pub const fn stall_window(&self) -> Duration {
        Duration::from_secs(self.stall_window_secs)
    }

    /// Completion timeout for the given media kind label.
    #[must_use]
    pub const fn timeout_for(&self, is_tv: bool) -> Duration {
        if is_tv {
            Duration::from_secs(self.tv_timeout_secs)
        } else {
            Duration::from_secs(self.movie_timeout_secs)
        }
    }
}

/// Encoder coordination settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EncodeSettings {
    /// Seconds between encode-job progress polls.
    pub poll_interval_secs: u64,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::ENCODE_POLL_INTERVAL_SECS,
        }
    }
}

impl EncodeSettings {
    /// Poll cadence as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Scheduler sweep cadences and thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between retry sweeps over awaiting items.
    pub retry_sweep_secs: u64,
    /// Seconds between stuck-execution sweeps.
    pub stuck_sweep_secs: u64,
    /// Seconds between download health checks.
    pub download_health_secs: u64,
    /// Seconds between new-episode checks for subscribed TV requests.
    pub new_episode_sweep_secs: u64,
    /// Seconds without progress before an execution counts as stuck.
    pub stuck_threshold_secs: u64,
    /// Seconds an awaiting item waits before the next search attempt.
    pub retry_backoff_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            retry_sweep_secs: defaults::SCHEDULER_RETRY_SWEEP_SECS,
            stuck_sweep_secs: defaults::SCHEDULER_STUCK_SWEEP_SECS,
            download_health_secs: defaults::SCHEDULER_DOWNLOAD_HEALTH_SECS,
            new_episode_sweep_secs: defaults::SCHEDULER_NEW_EPISODE_SWEEP_SECS,
            stuck_threshold_secs: defaults::SCHEDULER_STUCK_THRESHOLD_SECS,
            retry_backoff_secs: defaults::SCHEDULER_RETRY_BACKOFF_SECS,
        }
    }
}

/// Pipeline retry policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Attempt ceiling before an item fails permanently.
    pub max_attempts: i32,
    /// Number of below-quality releases stored for user review.
    pub alternatives_stored: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: defaults::PIPELINE_MAX_ATTEMPTS,
            alternatives_stored: defaults::PIPELINE_ALTERNATIVES_STORED,
        }
    }
}

/// Filesystem locations the pipeline works in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathSettings {
    /// Root directory encoded artifacts are staged under before delivery.
    pub staging_root: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from(defaults::STAGING_ROOT),
        }
    }
}
