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

//! Annex application wiring: the transport-agnostic command facade, the
//! periodic scheduler and the bootstrap entrypoint.
//!
//! Layout: `service.rs` (command facade), `scheduler.rs` (periodic sweeps),
//! `bootstrap.rs` (dependency wiring) with a thin `main.rs`.

pub mod bootstrap;
pub mod error;
pub mod scheduler;
pub mod service;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use scheduler::Scheduler;
pub use service::{
    AnnexService, EpisodeStatusRow, MovieRequestInput, RequestDetail, SeasonStatuses,
    TvRequestInput,
};
