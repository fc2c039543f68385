//! Scripted collaborator doubles in the recording style.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use annex_core::{
    AssignmentStatus, CancelSignal, CoreError, CoreResult, DeliveryReceipt, EncodeJobSpec,
    EncodeJobUpdate, EncoderPool, EpisodeMetadata, IndexerClient, IndexerResponse, LibraryScanner,
    MetadataProvider, MovieMetadata, ProgressSink, SearchQuery, SeasonMetadata, ServerConfig,
    ShowMetadata, TorrentClient, TorrentClientState, TorrentFileEntry, TorrentProgress,
    TorrentSummary, Transport, TransportKind,
};

fn external(service: &'static str, message: String) -> CoreError {
    CoreError::External {
        service,
        operation: "scripted",
        source: message.into(),
    }
}

/// Static metadata provider returning pre-seeded titles.
#[derive(Default)]
pub struct StaticMetadata {
    movies: HashMap<i64, MovieMetadata>,
    shows: HashMap<i64, (String, Vec<SeasonMetadata>)>,
}

impl StaticMetadata {
    /// Build an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a movie.
    pub fn add_movie(&mut self, tmdb_id: i64, title: &str, year: i32) {
        self.movies.insert(
            tmdb_id,
            MovieMetadata {
                tmdb_id,
                title: title.to_owned(),
                year: Some(year),
            },
        );
    }

    /// Seed a show with `episodes` episodes in each listed season, airing in
    /// the past.
    pub fn add_show(&mut self, tmdb_id: i64, title: &str, seasons: &[(i32, i32)]) {
        let listing = seasons
            .iter()
            .map(|&(season, episodes)| SeasonMetadata {
                season,
                episodes: (1..=episodes)
                    .map(|episode| EpisodeMetadata {
                        season,
                        episode,
                        title: Some(format!("Episode {episode}")),
                        air_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                    })
                    .collect(),
            })
            .collect();
        self.shows.insert(tmdb_id, (title.to_owned(), listing));
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadata {
    async fn get_show(&self, tmdb_id: i64) -> CoreResult<ShowMetadata> {
        let (title, seasons) = self
            .shows
            .get(&tmdb_id)
            .ok_or_else(|| CoreError::not_found("show", tmdb_id))?;
        Ok(ShowMetadata {
            tmdb_id,
            title: title.clone(),
            seasons: seasons.iter().map(|season| season.season).collect(),
        })
    }

    async fn get_seasons(&self, tmdb_id: i64) -> CoreResult<Vec<SeasonMetadata>> {
        Ok(self
            .shows
            .get(&tmdb_id)
            .map(|(_, seasons)| seasons.clone())
            .unwrap_or_default())
    }

    async fn get_season(&self, tmdb_id: i64, season: i32) -> CoreResult<SeasonMetadata> {
        self.get_seasons(tmdb_id)
            .await?
            .into_iter()
            .find(|entry| entry.season == season)
            .ok_or_else(|| CoreError::not_found("season", season))
    }

    async fn get_movie(&self, tmdb_id: i64) -> CoreResult<MovieMetadata> {
        self.movies
            .get(&tmdb_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("movie", tmdb_id))
    }
}

/// Indexer double returning scripted responses in order. The last queued
/// response repeats for subsequent searches.
#[derive(Default)]
pub struct ScriptedIndexer {
    movie: Mutex<VecDeque<IndexerResponse>>,
    seasons: Mutex<HashMap<i32, VecDeque<IndexerResponse>>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedIndexer {
    /// Build an indexer with no scripted responses; every search returns
    /// empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a movie search response.
    pub fn push_movie_response(&self, response: IndexerResponse) {
        self.movie.lock().expect("lock").push_back(response);
    }

    /// Queue a season search response.
    pub fn push_season_response(&self, season: i32, response: IndexerResponse) {
        self.seasons
            .lock()
            .expect("lock")
            .entry(season)
            .or_default()
            .push_back(response);
    }

    /// Queries observed so far, for assertions.
    #[must_use]
    pub fn observed_queries(&self) -> Vec<String> {
        self.queries.lock().expect("lock").clone()
    }

    fn next(queue: &mut VecDeque<IndexerResponse>) -> IndexerResponse {
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl IndexerClient for ScriptedIndexer {
    async fn search_movie(&self, query: &SearchQuery) -> CoreResult<IndexerResponse> {
        self.queries
            .lock()
            .expect("lock")
            .push(format!("movie:{}", query.title));
        Ok(Self::next(&mut self.movie.lock().expect("lock")))
    }

    async fn search_season(
        &self,
        query: &SearchQuery,
        season: i32,
    ) -> CoreResult<IndexerResponse> {
        self.queries
            .lock()
            .expect("lock")
            .push(format!("season:{}:{season}", query.title));
        let mut seasons = self.seasons.lock().expect("lock");
        Ok(seasons.get_mut(&season).map(Self::next).unwrap_or_default())
    }

    async fn search_episode(
        &self,
        query: &SearchQuery,
        season: i32,
        episode: i32,
    ) -> CoreResult<IndexerResponse> {
        self.queries
            .lock()
            .expect("lock")
            .push(format!("episode:{}:{season}:{episode}", query.title));
        Ok(IndexerResponse::default())
    }
}

/// Scripted behaviour of one fake torrent.
#[derive(Debug, Clone)]
pub struct TorrentScript {
    /// Hash assigned when the torrent is added.
    pub hash: String,
    /// Display name reported by the client.
    pub name: String,
    /// Progress polls until completion; 0 completes on the first poll.
    pub polls_to_complete: u32,
    /// Content path reported once known.
    pub content_path: Option<String>,
    /// Payload file listing.
    pub files: Vec<TorrentFileEntry>,
    /// Stop progressing at this percentage, simulating a stall.
    pub stall_at: Option<f64>,
}

impl TorrentScript {
    /// Script a torrent that completes after `polls_to_complete` polls.
    #[must_use]
    pub fn completing(hash: &str, name: &str, polls_to_complete: u32) -> Self {
        Self {
            hash: hash.to_owned(),
            name: name.to_owned(),
            polls_to_complete,
            content_path: None,
            files: Vec::new(),
            stall_at: None,
        }
    }

    /// Attach the content path the client reports.
    #[must_use]
    pub fn with_content_path(mut self, path: &str) -> Self {
        self.content_path = Some(path.to_owned());
        self
    }

    /// Script a stall at the given percentage.
    #[must_use]
    pub const fn stalling_at(mut self, percent: f64) -> Self {
        self.stall_at = Some(percent);
        self
    }
}

struct ActiveTorrent {
    script: TorrentScript,
    polls: u32,
}

/// Torrent client double with scripted per-URL behaviour.
#[derive(Default)]
pub struct FakeTorrentClient {
    scripts: Mutex<HashMap<String, VecDeque<TorrentScript>>>,
    active: Mutex<HashMap<String, ActiveTorrent>>,
    existing: Mutex<Vec<TorrentSummary>>,
    deleted: Mutex<Vec<(String, bool)>>,
}

impl FakeTorrentClient {
    /// Build an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the torrent created when `url` is added.
    pub fn script(&self, url: &str, script: TorrentScript) {
        self.scripts
            .lock()
            .expect("lock")
            .entry(url.to_owned())
            .or_default()
            .push_back(script);
    }

    /// Seed a pre-existing torrent visible to `list_torrents`.
    pub fn seed_existing(&self, summary: TorrentSummary) {
        self.existing.lock().expect("lock").push(summary);
    }

    /// Deletions observed so far as (hash, `delete_files`) pairs.
    #[must_use]
    pub fn deleted_torrents(&self) -> Vec<(String, bool)> {
        self.deleted.lock().expect("lock").clone()
    }
}

#[async_trait]
impl TorrentClient for FakeTorrentClient {
    async fn list_torrents(&self) -> CoreResult<Vec<TorrentSummary>> {
        let mut summaries = self.existing.lock().expect("lock").clone();
        let active = self.active.lock().expect("lock");
        for torrent in active.values() {
            summaries.push(TorrentSummary {
                hash: torrent.script.hash.clone(),
                name: torrent.script.name.clone(),
                progress: 0.0,
                state: TorrentClientState::Downloading,
                save_path: None,
                content_path: torrent.script.content_path.clone(),
                seeders: 5,
                peers: 2,
                size_bytes: 0,
                download_bps: 1_000_000,
            });
        }
        Ok(summaries)
    }

    async fn add_torrent(
        &self,
        url_or_magnet: &str,
        _save_path_hint: Option<&str>,
    ) -> CoreResult<String> {
        let script = self
            .scripts
            .lock()
            .expect("lock")
            .get_mut(url_or_magnet)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| {
                external(
                    "torrent_client",
                    format!("no scripted torrent for '{url_or_magnet}'"),
                )
            })?;
        let hash = script.hash.clone();
        self.active
            .lock()
            .expect("lock")
            .insert(hash.clone(), ActiveTorrent { script, polls: 0 });
        Ok(hash)
    }

    async fn delete_torrent(&self, hash: &str, delete_files: bool) -> CoreResult<()> {
        self.deleted
            .lock()
            .expect("lock")
            .push((hash.to_owned(), delete_files));
        self.active.lock().expect("lock").remove(hash);
        self.existing
            .lock()
            .expect("lock")
            .retain(|summary| summary.hash != hash);
        Ok(())
    }

    async fn get_progress(&self, hash: &str) -> CoreResult<TorrentProgress> {
        if let Some(summary) = self
            .existing
            .lock()
            .expect("lock")
            .iter()
            .find(|summary| summary.hash == hash)
        {
            return Ok(TorrentProgress {
                percent: summary.progress,
                state: summary.state,
                seeders: summary.seeders,
                peers: summary.peers,
                download_bps: summary.download_bps,
                content_path: summary.content_path.clone(),
            });
        }

        let mut active = self.active.lock().expect("lock");
        let torrent = active
            .get_mut(hash)
            .ok_or_else(|| external("torrent_client", format!("unknown torrent '{hash}'")))?;
        torrent.polls += 1;
        let steps = torrent.script.polls_to_complete.max(1);
        let mut percent = (f64::from(torrent.polls.min(steps)) / f64::from(steps)) * 100.0;
        let mut download_bps = 2_000_000_u64;
        if let Some(stall_at) = torrent.script.stall_at {
            if percent >= stall_at {
                percent = stall_at;
                download_bps = 0;
            }
        }
        let state = if (percent - 100.0).abs() < f64::EPSILON {
            TorrentClientState::Completed
        } else {
            TorrentClientState::Downloading
        };
        Ok(TorrentProgress {
            percent,
            state,
            seeders: 5,
            peers: 3,
            download_bps,
            content_path: torrent.script.content_path.clone(),
        })
    }

    async fn get_torrent_files(&self, hash: &str) -> CoreResult<Vec<TorrentFileEntry>> {
        Ok(self
            .active
            .lock()
            .expect("lock")
            .get(hash)
            .map(|torrent| torrent.script.files.clone())
            .unwrap_or_default())
    }

    async fn get_main_video_file(&self, hash: &str) -> CoreResult<Option<TorrentFileEntry>> {
        let files = self.get_torrent_files(hash).await?;
        Ok(files
            .into_iter()
            .max_by_key(|entry| entry.size_bytes))
    }
}

struct FakeJob {
    spec: EncodeJobSpec,
    polls: u32,
    failed: Option<String>,
    cancelled: Option<String>,
}

/// Encoder pool double that completes jobs after a scripted number of polls
/// and materialises the output file on completion.
pub struct FakeEncoderPool {
    jobs: Mutex<HashMap<Uuid, FakeJob>>,
    polls_to_complete: u32,
    has_encoders: bool,
    fail_all: Mutex<Option<String>>,
}

impl Default for FakeEncoderPool {
    fn default() -> Self {
        Self::new(2)
    }
}

impl FakeEncoderPool {
    /// Build a pool whose jobs complete after `polls_to_complete` polls.
    #[must_use]
    pub fn new(polls_to_complete: u32) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            polls_to_complete,
            has_encoders: true,
            fail_all: Mutex::new(None),
        }
    }

    /// Build a pool with no registered encoders.
    #[must_use]
    pub fn without_encoders() -> Self {
        Self {
            has_encoders: false,
            ..Self::new(1)
        }
    }

    /// Make every subsequent job fail with the given message.
    pub fn fail_jobs(&self, message: &str) {
        *self.fail_all.lock().expect("lock") = Some(message.to_owned());
    }

    /// Jobs cancelled so far with their reasons.
    #[must_use]
    pub fn cancelled_jobs(&self) -> Vec<(Uuid, String)> {
        self.jobs
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|(id, job)| job.cancelled.clone().map(|reason| (*id, reason)))
            .collect()
    }
}

#[async_trait]
impl EncoderPool for FakeEncoderPool {
    async fn submit(&self, job: EncodeJobSpec) -> CoreResult<()> {
        let mut jobs = self.jobs.lock().expect("lock");
        jobs.entry(job.job_id).or_insert(FakeJob {
            spec: job,
            polls: 0,
            failed: None,
            cancelled: None,
        });
        Ok(())
    }

    async fn poll(&self, job_id: Uuid) -> CoreResult<EncodeJobUpdate> {
        let mut jobs = self.jobs.lock().expect("lock");
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| external("encoder_pool", format!("unknown job '{job_id}'")))?;
        if let Some(reason) = &job.cancelled {
            return Ok(EncodeJobUpdate {
                status: AssignmentStatus::Cancelled,
                progress: 0.0,
                error: Some(reason.clone()),
            });
        }
        if let Some(message) = self.fail_all.lock().expect("lock").clone() {
            job.failed = Some(message.clone());
            return Ok(EncodeJobUpdate {
                status: AssignmentStatus::Failed,
                progress: 0.0,
                error: Some(message),
            });
        }
        job.polls += 1;
        let steps = self.polls_to_complete.max(1);
        let progress = (f64::from(job.polls.min(steps)) / f64::from(steps)) * 100.0;
        if job.polls >= steps {
            let output = PathBuf::from(&job.spec.output_path);
            if let Some(parent) = output.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = std::fs::write(&output, b"encoded-artifact");
            return Ok(EncodeJobUpdate {
                status: AssignmentStatus::Completed,
                progress: 100.0,
                error: None,
            });
        }
        Ok(EncodeJobUpdate {
            status: AssignmentStatus::Encoding,
            progress,
            error: None,
        })
    }

    async fn cancel(&self, job_id: Uuid, reason: &str) -> CoreResult<()> {
        if let Some(job) = self.jobs.lock().expect("lock").get_mut(&job_id) {
            job.cancelled = Some(reason.to_owned());
        }
        Ok(())
    }

    async fn has_encoders(&self) -> bool {
        self.has_encoders
    }
}

/// Transport double recording deliveries and optionally failing for chosen
/// servers.
#[derive(Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<(Uuid, PathBuf, String)>>,
    failing_servers: Mutex<Vec<Uuid>>,
}

impl RecordingTransport {
    /// Build a transport that accepts every delivery.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries to the given server fail.
    pub fn fail_for(&self, server_id: Uuid) {
        self.failing_servers.lock().expect("lock").push(server_id);
    }

    /// Deliveries observed so far as (server, local, remote) triples.
    #[must_use]
    pub fn deliveries(&self) -> Vec<(Uuid, PathBuf, String)> {
        self.deliveries.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalCopy
    }

    async fn deliver(
        &self,
        server: &ServerConfig,
        local_path: &Path,
        remote_path: &str,
        progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> CoreResult<DeliveryReceipt> {
        cancel.ensure_active()?;
        if self
            .failing_servers
            .lock()
            .expect("lock")
            .contains(&server.id)
        {
            return Err(external(
                "transport",
                format!("scripted failure for server '{}'", server.name),
            ));
        }
        let bytes = std::fs::metadata(local_path)
            .map(|meta| meta.len())
            .unwrap_or(0);
        progress.report(100, "transferred");
        self.deliveries.lock().expect("lock").push((
            server.id,
            local_path.to_path_buf(),
            remote_path.to_owned(),
        ));
        Ok(DeliveryReceipt {
            bytes_transferred: bytes,
            duration: Duration::from_millis(5),
        })
    }
}

/// Library scanner double recording scan triggers.
#[derive(Default)]
pub struct RecordingScanner {
    scans: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingScanner {
    /// Build a scanner that accepts every trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan triggers observed so far as (server, path) pairs.
    #[must_use]
    pub fn scans(&self) -> Vec<(Uuid, String)> {
        self.scans.lock().expect("lock").clone()
    }
}

#[async_trait]
impl LibraryScanner for RecordingScanner {
    async fn scan(&self, server: &ServerConfig, delivered_path: &str) -> CoreResult<()> {
        self.scans
            .lock()
            .expect("lock")
            .push((server.id, delivered_path.to_owned()));
        Ok(())
    }
}
