//! Step implementations for the required pipeline kinds.

pub mod approval;
pub mod branch;
pub mod deliver;
pub mod download;
pub mod encode;
pub mod map_files;
pub mod search;
