//! End-to-end pipeline scenarios over the in-memory store and scripted
//! collaborators.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use annex_app::{AnnexService, MovieRequestInput, Scheduler, TvRequestInput};
use annex_config::Settings;
use annex_core::{
    AssignmentStatus, EncodeAssignment, EncodeProfile, Execution, ExecutionStatus, IndexerResponse,
    ItemStatus, MediaKind, Release, RequestStatus, Resolution, ServerConfig, StepContext, Store,
    Target, Transport, TransportKind,
};
use annex_pipeline::{PipelineDeps, PipelineExecutor, aggregate, standard_registry, templates};
use annex_quality::encode_job_id;
use annex_test_support::{
    FakeEncoderPool, FakeTorrentClient, MemoryStore, RecordingScanner, RecordingTransport,
    ScriptedIndexer, StaticMetadata, TorrentScript, movie_request_with_targets, release,
    sample_profile, sample_server,
};

struct Harness {
    store: Arc<MemoryStore>,
    indexer: Arc<ScriptedIndexer>,
    torrents: Arc<FakeTorrentClient>,
    encoders: Arc<FakeEncoderPool>,
    transport: Arc<RecordingTransport>,
    scanner: Arc<RecordingScanner>,
    deps: Arc<PipelineDeps>,
    executor: Arc<PipelineExecutor>,
    service: AnnexService,
    _staging: TempDir,
    content: TempDir,
}

fn test_settings(staging: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.download.poll_interval_secs = 1;
    settings.download.stall_window_secs = 30;
    settings.download.stall_speed_floor_bps = 1_000;
    settings.encode.poll_interval_secs = 1;
    settings.paths.staging_root = staging.to_path_buf();
    settings
}

impl Harness {
    async fn new(metadata: StaticMetadata, encoders: FakeEncoderPool) -> Self {
        let staging = tempfile::tempdir().expect("staging dir");
        let content = tempfile::tempdir().expect("content dir");
        let store = Arc::new(MemoryStore::new());
        let indexer = Arc::new(ScriptedIndexer::new());
        let torrents = Arc::new(FakeTorrentClient::new());
        let encoders = Arc::new(encoders);
        let transport = Arc::new(RecordingTransport::new());
        let scanner = Arc::new(RecordingScanner::new());

        for template in [
            templates::default_movie_template(),
            templates::default_tv_template(),
        ] {
            store.insert_template(&template).await.expect("seed template");
        }

        let mut transports: HashMap<TransportKind, Arc<dyn Transport>> = HashMap::new();
        let local_transport: Arc<dyn Transport> = transport.clone();
        transports.insert(TransportKind::LocalCopy, local_transport);

        let store_dyn: Arc<dyn Store> = store.clone();
        let deps = Arc::new(PipelineDeps {
            store: store_dyn,
            metadata: Arc::new(metadata),
            indexer: indexer.clone(),
            torrents: torrents.clone(),
            encoders: encoders.clone(),
            transports,
            scanner: scanner.clone(),
            events: annex_events::EventBus::new(),
            settings: test_settings(staging.path()),
        });
        let registry = Arc::new(standard_registry(&deps));
        let executor = Arc::new(PipelineExecutor::new(Arc::clone(&deps), registry));
        let service = AnnexService::new(Arc::clone(&deps), Arc::clone(&executor));

        Self {
            store,
            indexer,
            torrents,
            encoders,
            transport,
            scanner,
            deps,
            executor,
            service,
            _staging: staging,
            content,
        }
    }

    async fn seed_profile_and_server(&self) -> (EncodeProfile, ServerConfig) {
        let profile = sample_profile("hevc-default", true);
        self.store.upsert_profile(&profile).await.expect("profile");
        let server = sample_server("main", Resolution::Fhd1080, None);
        self.store.upsert_server(&server).await.expect("server");
        (profile, server)
    }

    /// Create a content directory with sparse video files for a torrent.
    fn make_content(&self, dir_name: &str, files: &[(&str, u64)]) -> String {
        let root = self.content.path().join(dir_name);
        std::fs::create_dir_all(&root).expect("content dir");
        for (name, size) in files {
            let path = root.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("parent dir");
            }
            let file = std::fs::File::create(&path).expect("create file");
            file.set_len(*size).expect("set len");
        }
        root.to_string_lossy().into_owned()
    }

    async fn wait_for_status(&self, request_id: Uuid, wanted: RequestStatus) {
        for _ in 0_u32..50_000 {
            let items = self
                .store
                .items_for_request(request_id)
                .await
                .expect("items");
            if aggregate(&items).status == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let items = self
            .store
            .items_for_request(request_id)
            .await
            .expect("items");
        let summary: Vec<_> = items
            .iter()
            .map(|item| (item.status, item.last_error.clone()))
            .collect();
        panic!("request never reached {wanted:?}; items: {summary:?}");
    }

    async fn activity_kinds(&self, request_id: Uuid) -> Vec<String> {
        self.store
            .activity_for_request(request_id, 100)
            .await
            .expect("activity")
            .into_iter()
            .map(|entry| entry.kind)
            .collect()
    }
}

const GIB: u64 = 1 << 30;

fn movie_candidates() -> Vec<Release> {
    vec![
        release("Fight.Club.1999.1080p.BluRay.x264-ALPHA", 80, 9),
        release("Fight.Club.1999.1080p.WEB-DL.x264-BETA", 50, 8),
        release("Fight.Club.1999.1080p.WEBRip.x264-GAMMA", 20, 7),
        release("Fight.Club.1999.720p.WEB-DL.x264", 90, 4),
        release("Fight.Club.1999.720p.HDTV.x264", 10, 2),
    ]
}

#[tokio::test(start_paused = true)]
async fn movie_happy_path_reaches_completed() {
    let harness = Harness::new(StaticMetadata::new(), FakeEncoderPool::new(2)).await;
    let (_profile, server) = harness.seed_profile_and_server().await;

    let candidates = movie_candidates();
    harness.indexer.push_movie_response(IndexerResponse {
        releases: candidates.clone(),
        indexers_queried: 2,
        indexers_failed: 0,
    });

    let primary = &candidates[0];
    let content = harness.make_content(
        "Fight.Club.1999.1080p.BluRay.x264-ALPHA",
        &[
            ("Fight.Club.1999.1080p.BluRay.x264.mkv", 1_400 * 1024 * 1024),
            ("Sample/fight.club.sample.mkv", 40 * 1024 * 1024),
        ],
    );
    harness.torrents.script(
        &primary.download_url,
        TorrentScript::completing("hash-alpha", &primary.title, 2).with_content_path(&content),
    );

    let request_id = harness
        .service
        .create_movie_request(MovieRequestInput {
            tmdb_id: 550,
            title: "Fight Club".to_owned(),
            year: Some(1999),
            targets: vec![Target {
                server_id: server.id,
                profile_id: None,
            }],
            selected_release: None,
            template_id: None,
        })
        .await
        .expect("request created");

    harness
        .wait_for_status(request_id, RequestStatus::Completed)
        .await;

    let detail = harness.service.get(request_id).await.expect("detail");
    assert_eq!(detail.status.progress, 100);
    assert!(detail.request.completed_at.is_some());
    assert!(
        harness
            .store
            .has_library_entry(550, MediaKind::Movie, server.id)
            .await
            .expect("library entry")
    );

    let deliveries = harness.transport.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].2.contains("Fight Club (1999)"));
    assert_eq!(harness.scanner.scans().len(), 1);

    let kinds = harness.activity_kinds(request_id).await;
    for expected in [
        "request_created",
        "release_selected",
        "download_completed",
        "files_mapped",
        "encode_completed",
        "delivery_completed",
        "request_completed",
    ] {
        assert!(kinds.iter().any(|kind| kind == expected), "missing {expected}: {kinds:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn quality_unavailable_then_accept_lower_quality() {
    let harness = Harness::new(StaticMetadata::new(), FakeEncoderPool::new(2)).await;
    let (_profile, server) = harness.seed_profile_and_server().await;

    // Only 720p releases while the target demands 1080p.
    let below: Vec<Release> = movie_candidates()
        .into_iter()
        .filter(|release| release.title.contains("720p"))
        .collect();
    harness.indexer.push_movie_response(IndexerResponse {
        releases: below,
        indexers_queried: 2,
        indexers_failed: 0,
    });

    let request_id = harness
        .service
        .create_movie_request(MovieRequestInput {
            tmdb_id: 550,
            title: "Fight Club".to_owned(),
            year: Some(1999),
            targets: vec![Target {
                server_id: server.id,
                profile_id: None,
            }],
            selected_release: None,
            template_id: None,
        })
        .await
        .expect("request created");

    harness
        .wait_for_status(request_id, RequestStatus::QualityUnavailable)
        .await;

    let alternatives = harness
        .service
        .alternatives(request_id)
        .await
        .expect("alternatives");
    assert!(!alternatives.is_empty());
    assert!(alternatives.len() <= 5);
    assert!(alternatives.windows(2).all(|pair| pair[0].score >= pair[1].score));
    // The stronger 720p candidate ranks first.
    assert!(alternatives[0].title.contains("WEB-DL"));

    let accepted = alternatives[0].clone();
    let content = harness.make_content(
        "Fight.Club.1999.720p.WEB-DL.x264",
        &[("Fight.Club.1999.720p.WEB-DL.x264.mkv", 800 * 1024 * 1024)],
    );
    harness.torrents.script(
        &accepted.download_url,
        TorrentScript::completing("hash-720", &accepted.title, 1).with_content_path(&content),
    );

    harness
        .service
        .accept_lower_quality(request_id, 0)
        .await
        .expect("accept lower quality");
    harness
        .wait_for_status(request_id, RequestStatus::Completed)
        .await;

    let detail = harness.service.get(request_id).await.expect("detail");
    assert_eq!(
        detail
            .request
            .selected_release
            .as_ref()
            .map(|release| release.title.clone()),
        Some(accepted.title)
    );
}

#[tokio::test(start_paused = true)]
async fn tv_season_pack_with_library_hits_completes_remaining_episodes() {
    let mut metadata = StaticMetadata::new();
    metadata.add_show(9_000, "Show Name", &[(2, 10)]);
    let harness = Harness::new(metadata, FakeEncoderPool::new(1)).await;
    let (_profile, server) = harness.seed_profile_and_server().await;

    // Episodes 1 and 2 already live on the target server.
    for episode in 1..=2 {
        harness
            .store
            .upsert_episode_entry(9_000, 2, episode, server.id)
            .await
            .expect("library seed");
    }

    let pack = release("Show.Name.S02.1080p.WEB-DL.x265", 60, 30);
    harness.indexer.push_season_response(
        2,
        IndexerResponse {
            releases: vec![
                pack.clone(),
                // A single episode masquerading as a pack must be rejected.
                release("Show.Name.S02E01.1080p.WEB-DL.x265", 90, 3),
            ],
            indexers_queried: 1,
            indexers_failed: 0,
        },
    );

    let episode_files: Vec<(String, u64)> = (3..=10)
        .map(|episode| (format!("Show.Name.S02E{episode:02}.1080p.mkv"), 700 * 1024 * 1024))
        .collect();
    let file_refs: Vec<(&str, u64)> = episode_files
        .iter()
        .map(|(name, size)| (name.as_str(), *size))
        .collect();
    let content = harness.make_content("Show.Name.S02.1080p.WEB-DL.x265", &file_refs);
    harness.torrents.script(
        &pack.download_url,
        TorrentScript::completing("hash-pack", &pack.title, 2).with_content_path(&content),
    );

    let request_id = harness
        .service
        .create_tv_request(TvRequestInput {
            tmdb_id: 9_000,
            title: "Show Name".to_owned(),
            year: Some(2022),
            targets: vec![Target {
                server_id: server.id,
                profile_id: None,
            }],
            seasons: Some(vec![2]),
            episodes: None,
            selected_release: None,
            template_id: None,
            subscribe: false,
        })
        .await
        .expect("request created");

    // The two library hits are done from the start.
    let items = harness
        .store
        .items_for_request(request_id)
        .await
        .expect("items");
    assert_eq!(items.len(), 10);
    assert_eq!(
        items
            .iter()
            .filter(|item| item.status == ItemStatus::Completed)
            .count(),
        2
    );

    harness
        .wait_for_status(request_id, RequestStatus::Completed)
        .await;

    let seasons = harness
        .service
        .episode_statuses(request_id)
        .await
        .expect("episode statuses");
    assert_eq!(seasons.len(), 1);
    assert_eq!(seasons[0].season, 2);
    assert_eq!(seasons[0].episodes.len(), 10);
    assert!(
        seasons[0]
            .episodes
            .iter()
            .all(|row| row.status == ItemStatus::Completed)
    );

    // One shared download fed the eight in-flight episodes.
    let downloads = harness
        .store
        .downloads_for_request(request_id)
        .await
        .expect("downloads");
    assert_eq!(downloads.len(), 1);
    assert_eq!(harness.transport.deliveries().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn stalled_download_rotates_to_alternative() {
    let harness = Harness::new(StaticMetadata::new(), FakeEncoderPool::new(1)).await;
    let (_profile, server) = harness.seed_profile_and_server().await;

    let primary = release("Movie.X.2020.1080p.WEB-DL.x264-ONE", 80, 8);
    let alternative = release("Movie.X.2020.1080p.WEBRip.x264-TWO", 40, 8);
    harness.indexer.push_movie_response(IndexerResponse {
        releases: vec![primary.clone(), alternative.clone()],
        indexers_queried: 1,
        indexers_failed: 0,
    });

    harness.torrents.script(
        &primary.download_url,
        TorrentScript::completing("hash-one", &primary.title, 10).stalling_at(40.0),
    );
    let content = harness.make_content(
        "Movie.X.2020.1080p.WEBRip.x264-TWO",
        &[("Movie.X.2020.1080p.WEBRip.x264.mkv", 6 * GIB)],
    );
    harness.torrents.script(
        &alternative.download_url,
        TorrentScript::completing("hash-two", &alternative.title, 2).with_content_path(&content),
    );

    let request_id = harness
        .service
        .create_movie_request(MovieRequestInput {
            tmdb_id: 777,
            title: "Movie X".to_owned(),
            year: Some(2020),
            targets: vec![Target {
                server_id: server.id,
                profile_id: None,
            }],
            selected_release: None,
            template_id: None,
        })
        .await
        .expect("request created");

    harness
        .wait_for_status(request_id, RequestStatus::Completed)
        .await;

    // The stalled torrent was deleted with its files before the switch.
    assert!(
        harness
            .torrents
            .deleted_torrents()
            .contains(&("hash-one".to_owned(), true))
    );
    let kinds = harness.activity_kinds(request_id).await;
    assert!(kinds.iter().any(|kind| kind == "download_stalled"));
    assert!(kinds.iter().any(|kind| kind == "alternative_selected"));

    let downloads = harness
        .store
        .downloads_for_request(request_id)
        .await
        .expect("downloads");
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].torrent_hash, "hash-two");
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_encode_stops_everything() {
    // Encodes that effectively never finish.
    let harness = Harness::new(StaticMetadata::new(), FakeEncoderPool::new(100_000)).await;
    let (_profile, server) = harness.seed_profile_and_server().await;

    let primary = release("Slow.Burn.2021.1080p.WEB-DL.x264", 50, 8);
    harness.indexer.push_movie_response(IndexerResponse {
        releases: vec![primary.clone()],
        indexers_queried: 1,
        indexers_failed: 0,
    });
    let content = harness.make_content(
        "Slow.Burn.2021.1080p.WEB-DL.x264",
        &[("Slow.Burn.2021.1080p.WEB-DL.x264.mkv", 5 * GIB)],
    );
    harness.torrents.script(
        &primary.download_url,
        TorrentScript::completing("hash-slow", &primary.title, 1).with_content_path(&content),
    );

    let request_id = harness
        .service
        .create_movie_request(MovieRequestInput {
            tmdb_id: 42,
            title: "Slow Burn".to_owned(),
            year: Some(2021),
            targets: vec![Target {
                server_id: server.id,
                profile_id: None,
            }],
            selected_release: None,
            template_id: None,
        })
        .await
        .expect("request created");

    harness
        .wait_for_status(request_id, RequestStatus::Encoding)
        .await;
    harness.service.cancel(request_id).await.expect("cancel");
    harness
        .wait_for_status(request_id, RequestStatus::Cancelled)
        .await;

    // Give the cooperative teardown a poll interval to settle.
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(!harness.encoders.cancelled_jobs().is_empty());
    assert!(
        harness
            .store
            .active_assignments_for_request(request_id)
            .await
            .expect("assignments")
            .is_empty()
    );
    assert!(harness.transport.deliveries().is_empty());
    assert!(harness.scanner.scans().is_empty());

    let execution = harness
        .store
        .latest_execution_for_request(request_id)
        .await
        .expect("execution lookup")
        .expect("execution exists");
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn stuck_execution_is_reaped_and_retry_resumes_from_encode() {
    let harness = Harness::new(StaticMetadata::new(), FakeEncoderPool::new(2)).await;
    let (profile, server) = harness.seed_profile_and_server().await;

    // A request frozen mid-encode: a mapped source, a running execution and
    // an assignment whose last progress update is over an hour old.
    let source_dir = harness.make_content(
        "Frozen.2019.1080p.BluRay.x265",
        &[("Frozen.2019.1080p.BluRay.x265.mkv", 4 * GIB)],
    );
    let source_file = Path::new(&source_dir).join("Frozen.2019.1080p.BluRay.x265.mkv");

    let mut request = movie_request_with_targets(
        "Frozen",
        2019,
        vec![Target {
            server_id: server.id,
            profile_id: None,
        }],
    );
    request.required_resolution = Some(Resolution::Fhd1080);
    harness.store.insert_request(&request).await.expect("request");

    let mut item = annex_test_support::movie_item(&request);
    item.status = ItemStatus::Encoding;
    let mut context = StepContext::for_item(&request, &item);
    context.set_source_file_path(&source_file.to_string_lossy());
    item.step_context = context.clone();
    harness
        .store
        .insert_items(std::slice::from_ref(&item))
        .await
        .expect("item");

    let template = harness
        .store
        .default_template(MediaKind::Movie)
        .await
        .expect("template lookup")
        .expect("template seeded");
    let execution = Execution {
        id: Uuid::new_v4(),
        request_id: request.id,
        template_id: template.id,
        steps: template.steps,
        status: ExecutionStatus::Running,
        current_step: Some("encode".to_owned()),
        parent_execution_id: None,
        episode_item_id: None,
        context,
        pause_reason: None,
        error: None,
        started_at: Utc::now() - ChronoDuration::hours(2),
        finished_at: None,
    };
    harness
        .store
        .insert_execution(&execution)
        .await
        .expect("execution");

    let job_id = encode_job_id(item.id, profile.id);
    harness
        .store
        .create_assignment_if_absent(&EncodeAssignment {
            job_id,
            item_id: item.id,
            request_id: request.id,
            profile_id: profile.id,
            status: AssignmentStatus::Encoding,
            progress: 12.0,
            output_path: "/tmp/out.mkv".to_owned(),
            error: None,
            updated_at: Utc::now() - ChronoDuration::minutes(61),
        })
        .await
        .expect("assignment");

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&harness.deps),
        Arc::clone(&harness.executor),
    ));
    scheduler.stuck_sweep().await.expect("stuck sweep");

    let reaped = harness
        .store
        .get_execution(execution.id)
        .await
        .expect("execution lookup")
        .expect("execution exists");
    assert_eq!(reaped.status, ExecutionStatus::Failed);
    assert_eq!(reaped.error.as_deref(), Some("no progress for over 1 hour"));

    let items = harness
        .store
        .items_for_request(request.id)
        .await
        .expect("items");
    assert_eq!(aggregate(&items).status, RequestStatus::Failed);
    assert_eq!(
        items[0].last_error.as_deref(),
        Some("no progress for over 1 hour")
    );

    // Retry resumes from the mapped source: no torrent traffic, straight to
    // encode and delivery.
    harness.service.retry(request.id).await.expect("retry");
    harness
        .wait_for_status(request.id, RequestStatus::Completed)
        .await;
    assert!(harness.torrents.deleted_torrents().is_empty());
    assert_eq!(harness.transport.deliveries().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn approval_step_pauses_until_resumed() {
    let harness = Harness::new(StaticMetadata::new(), FakeEncoderPool::new(1)).await;
    let (_profile, server) = harness.seed_profile_and_server().await;

    // A movie template with a manual gate between mapping and encoding.
    let kinds = [
        "search",
        "download_start",
        "download_monitor",
        "map_files",
        "approval",
        "encode",
        "deliver",
    ];
    let chained = kinds
        .iter()
        .rev()
        .fold(None::<annex_core::StepDefinition>, |child, kind| {
            let mut step = annex_core::StepDefinition::of_kind(*kind);
            if let Some(child) = child {
                step.children.push(child);
            }
            Some(step)
        })
        .expect("at least one step");
    let template = annex_core::PipelineTemplate {
        id: Uuid::new_v4(),
        name: "Gated Movie".to_owned(),
        media_kind: MediaKind::Movie,
        version: 1,
        is_default: false,
        steps: vec![chained],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    harness
        .store
        .insert_template(&template)
        .await
        .expect("template");

    let primary = release("Gated.Movie.2022.1080p.WEB-DL.x264", 30, 8);
    harness.indexer.push_movie_response(IndexerResponse {
        releases: vec![primary.clone()],
        indexers_queried: 1,
        indexers_failed: 0,
    });
    let content = harness.make_content(
        "Gated.Movie.2022.1080p.WEB-DL.x264",
        &[("Gated.Movie.2022.1080p.WEB-DL.x264.mkv", 4 * GIB)],
    );
    harness.torrents.script(
        &primary.download_url,
        TorrentScript::completing("hash-gated", &primary.title, 1).with_content_path(&content),
    );

    let request_id = harness
        .service
        .create_movie_request(MovieRequestInput {
            tmdb_id: 88,
            title: "Gated Movie".to_owned(),
            year: Some(2022),
            targets: vec![Target {
                server_id: server.id,
                profile_id: None,
            }],
            selected_release: None,
            template_id: Some(template.id),
        })
        .await
        .expect("request created");

    // The gate pauses the execution after mapping.
    let mut paused_execution = None;
    for _ in 0_u32..50_000 {
        if let Some(execution) = harness
            .store
            .latest_execution_for_request(request_id)
            .await
            .expect("execution lookup")
            && execution.status == ExecutionStatus::Paused
        {
            assert_eq!(execution.pause_reason.as_deref(), Some("awaiting approval"));
            paused_execution = Some(execution.id);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let execution_id = paused_execution.expect("execution should pause at the gate");
    assert!(harness.transport.deliveries().is_empty());

    harness
        .executor
        .resume(execution_id)
        .await
        .expect("resume");
    harness
        .wait_for_status(request_id, RequestStatus::Completed)
        .await;
    assert_eq!(harness.transport.deliveries().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn delete_request_cascades_to_not_found() {
    let harness = Harness::new(StaticMetadata::new(), FakeEncoderPool::new(1)).await;
    let (_profile, server) = harness.seed_profile_and_server().await;

    harness.indexer.push_movie_response(IndexerResponse::default());
    let request_id = harness
        .service
        .create_movie_request(MovieRequestInput {
            tmdb_id: 1,
            title: "Ephemeral".to_owned(),
            year: Some(2000),
            targets: vec![Target {
                server_id: server.id,
                profile_id: None,
            }],
            selected_release: None,
            template_id: None,
        })
        .await
        .expect("request created");

    // Empty search parks the item; the execution completes gracefully.
    harness
        .wait_for_status(request_id, RequestStatus::Awaiting)
        .await;

    let detail = harness.service.get(request_id).await.expect("detail");
    assert_eq!(detail.items.len(), 1);

    harness.service.delete(request_id).await.expect("delete");
    let err = harness.service.get(request_id).await.expect_err("gone");
    assert!(err.is_not_found());
}
