//! Application bootstrap: configuration, database, collaborator clients and
//! background tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use annex_adapters::{
    EncoderdClient, JellyfinScanner, LocalCopyTransport, QbitClient, RsyncTransport, TmdbClient,
    TorznabClient, TorznabEndpoint,
};
use annex_config::Settings;
use annex_core::{Store as _, Transport, TransportKind};
use annex_data::PgStore;
use annex_events::EventBus;
use annex_pipeline::{PipelineDeps, PipelineExecutor, standard_registry, templates};

use crate::error::AppResult;
use crate::scheduler::Scheduler;
use crate::service::AnnexService;

/// A fully wired application.
pub struct App {
    /// The command facade.
    pub service: Arc<AnnexService>,
    /// The pipeline executor, for resume and cancel paths.
    pub executor: Arc<PipelineExecutor>,
    /// Running scheduler sweeps.
    pub scheduler_handles: Vec<tokio::task::JoinHandle<()>>,
}

/// Wire the application from loaded settings.
///
/// # Errors
///
/// Fails when the database is unreachable or a collaborator client cannot be
/// constructed.
pub async fn build_app(settings: Settings) -> AppResult<App> {
    let store = Arc::new(PgStore::connect(&settings.database.url).await?);

    // Default templates are seeded once; user edits create new versions.
    for template in [
        templates::default_movie_template(),
        templates::default_tv_template(),
    ] {
        if store.default_template(template.media_kind).await?.is_none() {
            info!(kind = %template.media_kind.as_str(), "seeding default pipeline template");
            store.insert_template(&template).await?;
        }
    }

    let metadata = Arc::new(TmdbClient::new(&settings.clients.tmdb_api_key)?);
    let indexer = Arc::new(TorznabClient::new(
        settings
            .clients
            .indexers
            .iter()
            .map(|endpoint| TorznabEndpoint {
                name: endpoint.name.clone(),
                base_url: endpoint.base_url.clone(),
                api_key: endpoint.api_key.clone(),
            })
            .collect(),
    )?);
    let torrents = Arc::new(QbitClient::new(
        &settings.clients.qbittorrent.base_url,
        &settings.clients.qbittorrent.username,
        &settings.clients.qbittorrent.password,
    )?);
    let encoders = Arc::new(EncoderdClient::new(&settings.clients.encoder_pool.base_url)?);
    let scanner = Arc::new(JellyfinScanner::new()?);

    let mut transports: HashMap<TransportKind, Arc<dyn Transport>> = HashMap::new();
    transports.insert(TransportKind::LocalCopy, Arc::new(LocalCopyTransport));
    // SMB shares are expected to be mounted; they ride the local-copy path.
    transports.insert(TransportKind::Smb, Arc::new(LocalCopyTransport));
    transports.insert(TransportKind::Rsync, Arc::new(RsyncTransport));
    transports.insert(TransportKind::Sftp, Arc::new(RsyncTransport));

    let deps = Arc::new(PipelineDeps {
        store,
        metadata,
        indexer,
        torrents,
        encoders,
        transports,
        scanner,
        events: EventBus::new(),
        settings,
    });
    let registry = Arc::new(standard_registry(&deps));
    let executor = Arc::new(PipelineExecutor::new(Arc::clone(&deps), registry));
    let service = Arc::new(AnnexService::new(Arc::clone(&deps), Arc::clone(&executor)));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&deps), Arc::clone(&executor)));
    let scheduler_handles = scheduler.spawn();

    Ok(App {
        service,
        executor,
        scheduler_handles,
    })
}

/// Load configuration from the environment, wire the application and park
/// until shutdown.
///
/// # Errors
///
/// Fails when configuration, database or client wiring fails.
pub async fn run_app() -> AppResult<()> {
    let settings = annex_config::load_from_env()?;
    let app = build_app(settings).await?;
    info!("annex pipeline up");
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| annex_core::CoreError::external("runtime", "ctrl_c", err))?;
    info!("shutdown requested");
    for handle in app.scheduler_handles {
        handle.abort();
    }
    Ok(())
}
