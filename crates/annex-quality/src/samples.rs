//! Sample and junk file detection.

use std::path::Path;
use std::sync::LazyLock;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Files smaller than this are never real deliverables.
pub const SAMPLE_SIZE_FLOOR_BYTES: u64 = 100 * 1024 * 1024;

/// Extensions the file mapper accepts as video payloads.
const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v"];

/// Directory segments that mark promotional or sample content.
const JUNK_PATTERNS: &[&str] = &[
    "**/sample/**",
    "**/samples/**",
    "**/extras/**",
    "**/proof/**",
    "**/screens/**",
];

static JUNK_GLOBS: LazyLock<GlobSet> = LazyLock::new(|| {
    let mut builder = GlobSetBuilder::new();
    for pattern in JUNK_PATTERNS {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("static glob compiles");
        builder.add(glob);
    }
    builder.build().expect("static glob set compiles")
});

/// Whether the path carries a recognised video extension.
#[must_use]
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let lower = ext.to_lowercase();
            VIDEO_EXTENSIONS.contains(&lower.as_str())
        })
}

/// Whether a candidate file is a sample: its path contains a sample
/// directory segment, its name contains a sample marker, or it is smaller
/// than the size floor.
#[must_use]
pub fn is_sample(path: &Path, size_bytes: u64) -> bool {
    if size_bytes < SAMPLE_SIZE_FLOOR_BYTES {
        return true;
    }
    if JUNK_GLOBS.is_match(path) {
        return true;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.to_lowercase().contains("sample"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIG: u64 = 4 << 30;

    #[test]
    fn video_extensions_are_case_insensitive() {
        assert!(is_video_file(Path::new("Movie.mkv")));
        assert!(is_video_file(Path::new("Movie.MP4")));
        assert!(!is_video_file(Path::new("Movie.nfo")));
        assert!(!is_video_file(Path::new("Movie")));
    }

    #[test]
    fn sample_directory_segment_is_rejected() {
        assert!(is_sample(Path::new("Movie/Sample/movie-sample.mkv"), BIG));
        assert!(is_sample(Path::new("Movie/samples/clip.mkv"), BIG));
        assert!(!is_sample(Path::new("Movie/movie.mkv"), BIG));
    }

    #[test]
    fn sample_file_name_is_rejected() {
        assert!(is_sample(Path::new("Movie/movie.sample.mkv"), BIG));
        assert!(is_sample(Path::new("Movie/SAMPLE-movie.mkv"), BIG));
    }

    #[test]
    fn small_files_are_rejected_regardless_of_name() {
        assert!(is_sample(Path::new("Movie/movie.mkv"), 50 * 1024 * 1024));
        assert!(!is_sample(Path::new("Movie/movie.mkv"), SAMPLE_SIZE_FLOOR_BYTES));
    }

    #[test]
    fn promo_directories_are_rejected() {
        assert!(is_sample(Path::new("Movie/Proof/proof.mkv"), BIG));
        assert!(is_sample(Path::new("Movie/extras/bonus.mkv"), BIG));
    }
}
