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

//! Quality engine: release-name parsing, ranking, sample detection and the
//! deterministic artifact naming scheme.
//!
//! # Design
//! - Pure logic over `annex-core` types; no IO and no persistence.
//! - `parse` turns release and file names into structured facts, `rank`
//!   scores and partitions candidates, `samples` rejects junk files,
//!   `naming` produces delivery and staging paths.

pub mod naming;
pub mod parse;
pub mod rank;
pub mod samples;

pub use naming::{encode_job_id, encode_output_path, episode_artifact_path, movie_artifact_path};
pub use parse::{ParsedName, SourceTag, normalize_title, parse_name, titles_match};
pub use rank::{RankedReleases, derive_required_resolution, filter_by_resolution, rank};
pub use samples::{SAMPLE_SIZE_FLOOR_BYTES, is_sample, is_video_file};
