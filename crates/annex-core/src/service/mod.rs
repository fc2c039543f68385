//! External collaborator traits the pipeline consumes.
//!
//! # Design
//! - Narrow seams for the four classes of external service (indexer, torrent
//!   client, encoder pool, storage transport) plus metadata and library
//!   scanning; the core owns decisions and coordination, not the bytes.
//! - Every method is a preemption point; implementations must honour the
//!   supplied [`CancelSignal`] between IO calls.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::{AssignmentStatus, Release, ServerConfig, TransportKind};

/// Cooperative cancellation signal checked by steps between IO calls.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    /// Build a fresh, un-cancelled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; observers see it on their next check.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Derive a child signal that is cancelled when this one is.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Short-circuit with [`CoreError::Cancelled`] when cancellation has been
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] when the signal fired.
    pub fn ensure_active(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Receiver for step progress reports. Reified progress callback with a
/// single reporting method.
pub trait ProgressSink: Send + Sync {
    /// Report progress in percent with an optional human-readable message.
    fn report(&self, percent: u8, message: &str);
}

/// No-op sink for callers that do not surface progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _percent: u8, _message: &str) {}
}

/// Show-level metadata returned by the metadata provider.
#[derive(Debug, Clone)]
pub struct ShowMetadata {
    /// External catalog identifier.
    pub tmdb_id: i64,
    /// Canonical show title.
    pub title: String,
    /// Season numbers known to the catalog.
    pub seasons: Vec<i32>,
}

/// Season-level metadata with its episode listing.
#[derive(Debug, Clone)]
pub struct SeasonMetadata {
    /// Season number.
    pub season: i32,
    /// Episodes of the season.
    pub episodes: Vec<EpisodeMetadata>,
}

/// Episode-level metadata.
#[derive(Debug, Clone)]
pub struct EpisodeMetadata {
    /// Season number.
    pub season: i32,
    /// Episode number within the season.
    pub episode: i32,
    /// Episode title, when the catalog has one.
    pub title: Option<String>,
    /// Air date, when the catalog has one.
    pub air_date: Option<NaiveDate>,
}

/// Movie-level metadata.
#[derive(Debug, Clone)]
pub struct MovieMetadata {
    /// External catalog identifier.
    pub tmdb_id: i64,
    /// Canonical movie title.
    pub title: String,
    /// Release year, when known.
    pub year: Option<i32>,
}

/// Title and episode data lookup. Out-of-scope implementation detail; the
/// pipeline only consumes this seam.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Fetch show-level metadata.
    async fn get_show(&self, tmdb_id: i64) -> CoreResult<ShowMetadata>;

    /// Fetch all seasons with episode listings.
    async fn get_seasons(&self, tmdb_id: i64) -> CoreResult<Vec<SeasonMetadata>>;

    /// Fetch one season with its episode listing.
    async fn get_season(&self, tmdb_id: i64, season: i32) -> CoreResult<SeasonMetadata>;

    /// Fetch movie-level metadata.
    async fn get_movie(&self, tmdb_id: i64) -> CoreResult<MovieMetadata>;
}

/// Identifier payload forwarded to indexers alongside the textual query.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Title to search for.
    pub title: String,
    /// Release year, when known.
    pub year: Option<i32>,
    /// External catalog identifier, when known.
    pub tmdb_id: Option<i64>,
    /// IMDB identifier, when known.
    pub imdb_id: Option<String>,
}

/// Aggregated indexer search result.
#[derive(Debug, Clone, Default)]
pub struct IndexerResponse {
    /// Releases returned across all queried indexers.
    pub releases: Vec<Release>,
    /// Number of indexers queried.
    pub indexers_queried: u32,
    /// Number of indexers that failed.
    pub indexers_failed: u32,
}

/// Multi-indexer release search.
#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// Search for movie releases.
    async fn search_movie(&self, query: &SearchQuery) -> CoreResult<IndexerResponse>;

    /// Search for whole-season releases.
    async fn search_season(&self, query: &SearchQuery, season: i32) -> CoreResult<IndexerResponse>;

    /// Search for single-episode releases.
    async fn search_episode(
        &self,
        query: &SearchQuery,
        season: i32,
        episode: i32,
    ) -> CoreResult<IndexerResponse>;
}

/// Torrent transfer states the reconciler distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentClientState {
    /// Queued or checking; not yet transferring.
    Queued,
    /// Actively downloading payload data.
    Downloading,
    /// All bytes present on disk (downloading or seeding finished).
    Completed,
    /// No data is flowing and the client flags the torrent as stalled.
    Stalled,
    /// The client reports an unrecoverable error.
    Errored,
}

/// Summary of one torrent known to the external client.
#[derive(Debug, Clone)]
pub struct TorrentSummary {
    /// Torrent info hash.
    pub hash: String,
    /// Display name.
    pub name: String,
    /// Completion in percent, 0-100.
    pub progress: f64,
    /// Transfer state.
    pub state: TorrentClientState,
    /// Save path on the client host.
    pub save_path: Option<String>,
    /// Content path on the client host.
    pub content_path: Option<String>,
    /// Connected seeder count.
    pub seeders: i32,
    /// Connected peer count.
    pub peers: i32,
    /// Payload size in bytes.
    pub size_bytes: i64,
    /// Current download rate in bytes per second.
    pub download_bps: u64,
}

/// Point-in-time progress snapshot for a single torrent.
#[derive(Debug, Clone)]
pub struct TorrentProgress {
    /// Completion in percent, 0-100.
    pub percent: f64,
    /// Transfer state.
    pub state: TorrentClientState,
    /// Connected seeder count.
    pub seeders: i32,
    /// Connected peer count.
    pub peers: i32,
    /// Current download rate in bytes per second.
    pub download_bps: u64,
    /// Content path once the client knows it.
    pub content_path: Option<String>,
}

/// One file inside a torrent payload.
#[derive(Debug, Clone)]
pub struct TorrentFileEntry {
    /// Path relative to the torrent content root.
    pub path: String,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// The external BitTorrent client. The reconciler is the only component
/// submitting or deleting torrents.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// List all torrents currently known to the client.
    async fn list_torrents(&self) -> CoreResult<Vec<TorrentSummary>>;

    /// Submit a torrent by URL or magnet URI, returning its info hash.
    async fn add_torrent(&self, url_or_magnet: &str, save_path_hint: Option<&str>)
    -> CoreResult<String>;

    /// Remove a torrent, optionally deleting its files.
    async fn delete_torrent(&self, hash: &str, delete_files: bool) -> CoreResult<()>;

    /// Fetch a progress snapshot for a torrent.
    async fn get_progress(&self, hash: &str) -> CoreResult<TorrentProgress>;

    /// List the files of a torrent payload.
    async fn get_torrent_files(&self, hash: &str) -> CoreResult<Vec<TorrentFileEntry>>;

    /// Return the largest video file of the payload, when one exists.
    async fn get_main_video_file(&self, hash: &str) -> CoreResult<Option<TorrentFileEntry>>;

    /// Poll the torrent until completion, timeout or cancellation, invoking
    /// `on_progress` with each snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] when the signal fires,
    /// [`CoreError::External`] when the client reports a torrent error, and
    /// [`CoreError::Precondition`] when the timeout elapses.
    async fn wait_for_completion(
        &self,
        hash: &str,
        poll_interval: Duration,
        timeout: Duration,
        on_progress: &(dyn for<'a> Fn(&'a TorrentProgress) + Send + Sync),
        cancel: &CancelSignal,
    ) -> CoreResult<TorrentProgress> {
        let started = std::time::Instant::now();
        loop {
            cancel.ensure_active()?;
            let progress = self.get_progress(hash).await?;
            on_progress(&progress);
            match progress.state {
                TorrentClientState::Completed => return Ok(progress),
                TorrentClientState::Errored => {
                    return Err(CoreError::External {
                        service: "torrent_client",
                        operation: "wait_for_completion",
                        source: format!("torrent {hash} errored").into(),
                    });
                }
                _ => {}
            }
            if started.elapsed() >= timeout {
                return Err(CoreError::precondition(
                    "wait_for_completion",
                    format!("torrent {hash} did not complete within {timeout:?}"),
                ));
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(CoreError::Cancelled),
                () = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

/// Specification of one encode job submitted to the pool.
#[derive(Debug, Clone)]
pub struct EncodeJobSpec {
    /// Job identifier; a pure function of (item, profile) for idempotence.
    pub job_id: Uuid,
    /// Absolute path of the source video file.
    pub source_path: String,
    /// Absolute path the encoded artifact must land at.
    pub output_path: String,
    /// Profile the job encodes to.
    pub profile_id: Uuid,
}

/// Progress snapshot for a submitted encode job.
#[derive(Debug, Clone)]
pub struct EncodeJobUpdate {
    /// Current assignment status as reported by the pool.
    pub status: AssignmentStatus,
    /// Transcode progress in percent, 0-100.
    pub progress: f64,
    /// Error detail when the job failed.
    pub error: Option<String>,
}

/// The remote encoder worker pool.
#[async_trait]
pub trait EncoderPool: Send + Sync {
    /// Submit a job. Submitting an already-known job id is a no-op.
    async fn submit(&self, job: EncodeJobSpec) -> CoreResult<()>;

    /// Poll the status of a submitted job.
    async fn poll(&self, job_id: Uuid) -> CoreResult<EncodeJobUpdate>;

    /// Cancel a job with a reason.
    async fn cancel(&self, job_id: Uuid, reason: &str) -> CoreResult<()>;

    /// Whether any encoder worker is registered with the pool.
    async fn has_encoders(&self) -> bool;
}

/// Receipt returned by a successful delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Bytes written to the remote side.
    pub bytes_transferred: u64,
    /// Wall-clock duration of the transfer.
    pub duration: Duration,
}

/// One file transfer protocol implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Protocol this transport implements.
    fn kind(&self) -> TransportKind;

    /// Transfer a local file to `remote_path` on the server, reporting byte
    /// progress through the sink.
    async fn deliver(
        &self,
        server: &ServerConfig,
        local_path: &Path,
        remote_path: &str,
        progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> CoreResult<DeliveryReceipt>;
}

/// Media-server library scan trigger.
#[async_trait]
pub trait LibraryScanner: Send + Sync {
    /// Ask the server's media server to scan the delivered path.
    async fn scan(&self, server: &ServerConfig, delivered_path: &str) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_signal_propagates_to_children() {
        let parent = CancelSignal::new();
        let child = parent.child();
        assert!(child.ensure_active().is_ok());
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.ensure_active(), Err(CoreError::Cancelled)));
    }

    #[test]
    fn null_progress_accepts_reports() {
        NullProgress.report(50, "halfway");
    }
}
