//! Default values for every timing and policy knob.

/// Seconds between torrent progress polls.
pub const DOWNLOAD_POLL_INTERVAL_SECS: u64 = 5;
/// Seconds without progress before a download counts as stalled.
pub const DOWNLOAD_STALL_WINDOW_SECS: u64 = 1_800;
/// Transfer rate floor in bytes per second for stall detection.
pub const DOWNLOAD_STALL_SPEED_FLOOR_BPS: u64 = 10_240;
/// Completion timeout for movie downloads (24 hours).
pub const DOWNLOAD_MOVIE_TIMEOUT_SECS: u64 = 86_400;
/// Completion timeout for TV downloads (48 hours).
pub const DOWNLOAD_TV_TIMEOUT_SECS: u64 = 172_800;

/// Seconds between encode-job progress polls.
pub const ENCODE_POLL_INTERVAL_SECS: u64 = 2;

/// Seconds between retry sweeps over awaiting items (30 minutes).
pub const SCHEDULER_RETRY_SWEEP_SECS: u64 = 1_800;
/// Seconds between stuck-execution sweeps (15 minutes).
pub const SCHEDULER_STUCK_SWEEP_SECS: u64 = 900;
/// Seconds between download health checks (5 minutes).
pub const SCHEDULER_DOWNLOAD_HEALTH_SECS: u64 = 300;
/// Seconds between new-episode checks (6 hours).
pub const SCHEDULER_NEW_EPISODE_SWEEP_SECS: u64 = 21_600;
/// Seconds without progress before an execution counts as stuck (1 hour).
pub const SCHEDULER_STUCK_THRESHOLD_SECS: u64 = 3_600;
/// Seconds an awaiting item waits before the next search attempt.
pub const SCHEDULER_RETRY_BACKOFF_SECS: u64 = 1_800;

/// Attempt ceiling before an item fails permanently.
pub const PIPELINE_MAX_ATTEMPTS: i32 = 3;
/// Number of below-quality releases stored for user review.
pub const PIPELINE_ALTERNATIVES_STORED: usize = 5;

/// Root directory encoded artifacts are staged under before delivery.
pub const STAGING_ROOT: &str = "/var/lib/annex/staging";
