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

//! The request processing pipeline: step registry, tree executor, step
//! implementations and status aggregation.
//!
//! # Design
//! - `step` defines the step contract and registry; `steps/` holds the
//!   implementations; `executor` drives a snapshotted step tree against a
//!   request; `status` derives request status from its items.
//! - Every state transition commits through the [`annex_core::Store`] with
//!   conditional writes; siblings at the same tree level run concurrently
//!   and merge contexts last-writer-wins at the join.

pub mod error;
pub mod executor;
pub mod progress;
pub mod status;
pub mod step;
pub mod steps;
pub mod templates;

pub use error::{PipelineError, PipelineResult};
pub use executor::PipelineExecutor;
pub use status::{AggregatedStatus, aggregate};
pub use step::{NextAction, PipelineDeps, Step, StepOutput, StepRegistry, standard_registry};
