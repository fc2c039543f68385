//! Entity builders shared by unit and scenario tests.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use annex_core::{
    EncodeProfile, ItemKind, ItemStatus, MediaKind, ProcessingItem, Release, Request, Resolution,
    ServerConfig, StepContext, Target, TransportKind,
};

/// Build a release value from a raw title.
#[must_use]
pub fn release(title: &str, seeders: u32, size_gib: u64) -> Release {
    Release {
        title: title.to_owned(),
        indexer: "scripted".to_owned(),
        resolution: None,
        source: None,
        codec: None,
        size_bytes: size_gib << 30,
        seeders,
        leechers: 1,
        download_url: format!("magnet:?xt=urn:btih:{}", title.replace(' ', ".")),
        published_at: Some(Utc::now()),
        score: 0,
    }
}

/// Build a storage server reachable over the local-copy transport.
#[must_use]
pub fn sample_server(
    name: &str,
    max_resolution: Resolution,
    default_profile_id: Option<Uuid>,
) -> ServerConfig {
    ServerConfig {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        max_resolution,
        movie_root: "/library/movies".to_owned(),
        tv_root: "/library/tv".to_owned(),
        transport: TransportKind::LocalCopy,
        endpoint: json!({}),
        default_profile_id,
    }
}

/// Build a default 1080p HEVC profile.
#[must_use]
pub fn sample_profile(name: &str, is_default: bool) -> EncodeProfile {
    EncodeProfile {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        container: "mkv".to_owned(),
        video_codec: "hevc".to_owned(),
        args: vec!["-crf".to_owned(), "22".to_owned()],
        audio_languages: Vec::new(),
        subtitle_languages: Vec::new(),
        is_default,
    }
}

/// Build a movie request with the given targets.
#[must_use]
pub fn movie_request_with_targets(title: &str, year: i32, targets: Vec<Target>) -> Request {
    Request {
        id: Uuid::new_v4(),
        kind: MediaKind::Movie,
        tmdb_id: 550,
        title: title.to_owned(),
        year: Some(year),
        seasons: None,
        episodes: None,
        targets,
        selected_release: None,
        available_releases: Vec::new(),
        required_resolution: None,
        subscribed: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        completed_at: None,
    }
}

/// Build a minimal movie request with no targets.
#[must_use]
pub fn movie_request(title: &str, year: i32) -> Request {
    movie_request_with_targets(title, year, Vec::new())
}

/// Build the single processing item of a movie request.
#[must_use]
pub fn movie_item(request: &Request) -> ProcessingItem {
    ProcessingItem {
        id: Uuid::new_v4(),
        request_id: request.id,
        kind: ItemKind::Movie,
        season: None,
        episode: None,
        air_date: None,
        title: None,
        status: ItemStatus::Pending,
        current_step: None,
        step_context: StepContext::new(),
        progress: 0,
        attempts: 0,
        max_attempts: 3,
        last_error: None,
        next_retry_at: None,
        download_id: None,
        encode_job_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Build one episode item of a TV request.
#[must_use]
pub fn episode_item(request: &Request, season: i32, episode: i32) -> ProcessingItem {
    ProcessingItem {
        id: Uuid::new_v4(),
        request_id: request.id,
        kind: ItemKind::Episode,
        season: Some(season),
        episode: Some(episode),
        air_date: None,
        title: Some(format!("Episode {episode}")),
        status: ItemStatus::Pending,
        current_step: None,
        step_context: StepContext::new(),
        progress: 0,
        attempts: 0,
        max_attempts: 3,
        last_error: None,
        next_retry_at: None,
        download_id: None,
        encode_job_id: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
