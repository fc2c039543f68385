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
#![allow(clippy::missing_panics_doc)]

//! Test doubles and fixtures for the Annex pipeline: a full in-memory
//! [`annex_core::Store`] and scripted collaborator mocks in the recording
//! style.

pub mod doubles;
pub mod fixtures;
pub mod memory;

pub use doubles::{
    FakeEncoderPool, FakeTorrentClient, RecordingScanner, RecordingTransport, ScriptedIndexer,
    StaticMetadata, TorrentScript,
};
pub use fixtures::{
    episode_item, movie_item, movie_request, movie_request_with_targets, release, sample_profile,
    sample_server,
};
pub use memory::MemoryStore;
