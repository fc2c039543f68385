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

//! Postgres persistence layer for the Annex pipeline: migrations, row
//! mapping and the [`annex_core::Store`] implementation.

pub mod rows;
pub mod store;

pub use store::PgStore;
