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

//! Typed runtime configuration for the Annex pipeline.
//!
//! # Design
//! - `model` holds the settings tree, `defaults` the default timings,
//!   `validate` the invariants, `loader` the TOML + environment loading
//!   path.
//! - Every timing knob of the pipeline (poll cadences, stall windows,
//!   timeouts, sweep intervals) is a first-class field here.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_from_env, load_from_path};
pub use model::{
    ClientSettings, DatabaseSettings, DownloadSettings, EncodeSettings, EncoderPoolSettings,
    IndexerEndpointSettings, PathSettings, PipelineSettings, QbitSettings, SchedulerSettings,
    Settings,
};
