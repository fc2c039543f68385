#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Core domain types and service traits for the Annex acquisition pipeline.
//!
//! # Design
//! - Pure data carriers and trait seams; no IO beyond what implementors bring.
//! - `model` holds the persisted entities, `context` the step context map,
//!   `service` the external collaborator traits, and `store` the persistence
//!   trait every component mutates state through.

pub mod context;
pub mod error;
pub mod model;
pub mod service;
pub mod store;

pub use context::{CORE_CONTEXT_FIELDS, StepContext};
pub use error::{CoreError, CoreResult};
pub use model::{
    ActivityEntry, AssignmentStatus, Download, DownloadStatus, EncodeAssignment, EncodeProfile,
    Execution, ExecutionStatus, ItemKind, ItemStatus, MediaKind, PipelineTemplate, ProcessingItem,
    Release, Request, RequestStatus, Resolution, ServerConfig, StepDefinition, Target,
    TransportKind,
};
pub use service::{
    CancelSignal, DeliveryReceipt, EncodeJobSpec, EncodeJobUpdate, EncoderPool, EpisodeMetadata,
    IndexerClient, IndexerResponse, LibraryScanner, MetadataProvider, MovieMetadata, NullProgress,
    ProgressSink, SearchQuery, SeasonMetadata, ShowMetadata, TorrentClient, TorrentClientState,
    TorrentFileEntry, TorrentProgress, TorrentSummary, Transport,
};
pub use store::Store;
