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

//! Concrete collaborator implementations: the qBittorrent Web API torrent
//! client, a Torznab indexer client and file transports.

pub mod encoderd;
pub mod qbit;
pub mod scanner;
pub mod tmdb;
pub mod torznab;
pub mod transport;

pub use encoderd::EncoderdClient;
pub use qbit::QbitClient;
pub use scanner::JellyfinScanner;
pub use tmdb::TmdbClient;
pub use torznab::{TorznabClient, TorznabEndpoint};
pub use transport::{LocalCopyTransport, RsyncTransport};
