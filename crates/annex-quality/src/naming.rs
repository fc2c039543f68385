//! Deterministic artifact naming.
//!
//! Delivery paths follow the media-server convention (`Title (Year)/…` for
//! movies, `Series/Season NN/Series - SNNEMM - Title` for TV) suffixed with
//! the quality, codec and container. Staging paths and encode job ids are
//! pure functions of (item, profile) so re-runs after a crash overwrite
//! deterministically instead of duplicating work.

use std::path::{Path, PathBuf};

use annex_core::{EncodeProfile, Resolution};
use uuid::Uuid;

/// Characters stripped from titles before they become path components.
const PATH_HOSTILE: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Namespace for deterministic encode job ids.
const ENCODE_JOB_NAMESPACE: Uuid = Uuid::NAMESPACE_OID;

fn sanitize(component: &str) -> String {
    let mut out: String = component
        .chars()
        .map(|ch| if PATH_HOSTILE.contains(&ch) { ' ' } else { ch })
        .collect();
    while out.contains("  ") {
        out = out.replace("  ", " ");
    }
    out.trim().to_owned()
}

fn quality_suffix(resolution: Option<Resolution>, codec: &str, container: &str) -> String {
    resolution.map_or_else(
        || format!("{codec}.{container}"),
        |res| format!("{res}.{codec}.{container}"),
    )
}

/// Remote path for a movie artifact relative to the server's movie root:
/// `Title (Year)/Title (Year) - {quality}.{codec}.{container}`.
#[must_use]
pub fn movie_artifact_path(
    movie_root: &str,
    title: &str,
    year: Option<i32>,
    resolution: Option<Resolution>,
    codec: &str,
    container: &str,
) -> String {
    let base = year.map_or_else(
        || sanitize(title),
        |year| format!("{} ({year})", sanitize(title)),
    );
    format!(
        "{}/{base}/{base} - {}",
        movie_root.trim_end_matches('/'),
        quality_suffix(resolution, codec, container)
    )
}

/// Remote path for an episode artifact relative to the server's TV root:
/// `Series/Season NN/Series - SNNEMM - Title - {quality}.{codec}.{container}`.
#[must_use]
pub fn episode_artifact_path(
    tv_root: &str,
    series: &str,
    season: i32,
    episode: i32,
    episode_title: Option<&str>,
    resolution: Option<Resolution>,
    codec: &str,
    container: &str,
) -> String {
    let series = sanitize(series);
    let episode_part = episode_title.map_or_else(String::new, |t| format!("{} - ", sanitize(t)));
    format!(
        "{}/{series}/Season {season:02}/{series} - S{season:02}E{episode:02} - {episode_part}{}",
        tv_root.trim_end_matches('/'),
        quality_suffix(resolution, codec, container)
    )
}

/// Staging path of an encode output: a pure function of (item, profile) so
/// retries overwrite the same artifact.
#[must_use]
pub fn encode_output_path(staging_root: &Path, item_id: Uuid, profile: &EncodeProfile) -> PathBuf {
    staging_root
        .join(profile.id.to_string())
        .join(format!("{item_id}.{}", profile.container))
}

/// Deterministic encode job id for (item, profile).
#[must_use]
pub fn encode_job_id(item_id: Uuid, profile_id: Uuid) -> Uuid {
    Uuid::new_v5(
        &ENCODE_JOB_NAMESPACE,
        format!("encode:{item_id}:{profile_id}").as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> EncodeProfile {
        EncodeProfile {
            id: Uuid::new_v4(),
            name: "hevc-1080".to_string(),
            container: "mkv".to_string(),
            video_codec: "hevc".to_string(),
            args: Vec::new(),
            audio_languages: vec!["eng".to_string()],
            subtitle_languages: vec!["eng".to_string()],
            is_default: true,
        }
    }

    #[test]
    fn movie_path_includes_year_and_quality() {
        let path = movie_artifact_path(
            "/library/movies/",
            "Fight Club",
            Some(1999),
            Some(Resolution::Fhd1080),
            "x265",
            "mkv",
        );
        assert_eq!(
            path,
            "/library/movies/Fight Club (1999)/Fight Club (1999) - 1080p.x265.mkv"
        );
    }

    #[test]
    fn episode_path_is_zero_padded() {
        let path = episode_artifact_path(
            "/library/tv",
            "Show Name",
            2,
            4,
            Some("The One"),
            Some(Resolution::Hd720),
            "x264",
            "mkv",
        );
        assert_eq!(
            path,
            "/library/tv/Show Name/Season 02/Show Name - S02E04 - The One - 720p.x264.mkv"
        );
    }

    #[test]
    fn hostile_characters_are_stripped() {
        let path = movie_artifact_path(
            "/m",
            "Face/Off: Part 2",
            Some(2001),
            None,
            "x264",
            "mp4",
        );
        assert!(!path[3..].contains(':'));
        assert!(path.contains("Face Off Part 2 (2001)"));
    }

    #[test]
    fn encode_output_path_is_stable() {
        let profile = profile();
        let item = Uuid::new_v4();
        let a = encode_output_path(Path::new("/staging"), item, &profile);
        let b = encode_output_path(Path::new("/staging"), item, &profile);
        assert_eq!(a, b);
        assert!(a.starts_with("/staging"));
        assert!(a.to_string_lossy().ends_with(".mkv"));
    }

    #[test]
    fn encode_job_id_is_deterministic_and_distinct_per_profile() {
        let item = Uuid::new_v4();
        let profile_a = Uuid::new_v4();
        let profile_b = Uuid::new_v4();
        assert_eq!(encode_job_id(item, profile_a), encode_job_id(item, profile_a));
        assert_ne!(encode_job_id(item, profile_a), encode_job_id(item, profile_b));
    }
}
