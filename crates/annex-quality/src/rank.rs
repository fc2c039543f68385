//! Release scoring, filtering and ranking.

use std::cmp::Ordering;

use annex_core::{Release, Resolution, ServerConfig};

use crate::parse::{SourceTag, parse_name};

/// Score bonus bands. Resolution dominates source, source dominates codec,
/// codec dominates seeder count.
const RESOLUTION_WEIGHT: i64 = 1_000;
const SOURCE_WEIGHT: i64 = 100;
const CODEC_WEIGHT: i64 = 40;
const SEEDER_CAP: i64 = 200;
const SIZE_FIT_BONUS: i64 = 50;
/// Outweighs every positive contribution so seederless releases always rank
/// negative.
const DEAD_TORRENT_PENALTY: i64 = -10_000;

/// Result of ranking a candidate set against a quality requirement.
#[derive(Debug, Clone, Default)]
pub struct RankedReleases {
    /// Releases meeting the requirement, best first.
    pub matching: Vec<Release>,
    /// Releases below the requirement, best first.
    pub below_quality: Vec<Release>,
    /// Releases with negative scores (dead torrents), excluded from both
    /// lists.
    pub rejected: Vec<Release>,
}

/// Derive the required source resolution from the target servers: the
/// maximum of their `max_resolution`. Upscaling is useless, so the source
/// must meet the most demanding target.
#[must_use]
pub fn derive_required_resolution(servers: &[ServerConfig]) -> Option<Resolution> {
    servers.iter().map(|server| server.max_resolution).max()
}

/// Partition releases into those meeting the requirement and the rest.
/// Releases without a parseable resolution count as below quality.
#[must_use]
pub fn filter_by_resolution(
    releases: Vec<Release>,
    required: Resolution,
) -> (Vec<Release>, Vec<Release>) {
    releases
        .into_iter()
        .partition(|release| effective_resolution(release) >= Some(required))
}

/// Score and rank a candidate set. Each returned release carries its score
/// and any resolution/source/codec facts parsed out of its title. Both
/// result lists are truncated to `top_n`.
#[must_use]
pub fn rank(releases: Vec<Release>, required: Resolution, top_n: usize) -> RankedReleases {
    let mut scored: Vec<Release> = releases.into_iter().map(enrich_and_score).collect();
    scored.sort_by(compare_ranked);

    let mut ranked = RankedReleases::default();
    for release in scored {
        if release.score < 0 {
            ranked.rejected.push(release);
        } else if release.resolution >= Some(required) {
            if ranked.matching.len() < top_n {
                ranked.matching.push(release);
            }
        } else if ranked.below_quality.len() < top_n {
            ranked.below_quality.push(release);
        }
    }
    ranked
}

fn effective_resolution(release: &Release) -> Option<Resolution> {
    release
        .resolution
        .or_else(|| parse_name(&release.title).resolution)
}

fn enrich_and_score(mut release: Release) -> Release {
    let parsed = parse_name(&release.title);
    if release.resolution.is_none() {
        release.resolution = parsed.resolution;
    }
    if release.source.is_none() {
        release.source = parsed.source.map(|tag| tag.as_str().to_owned());
    }
    if release.codec.is_none() {
        release.codec = parsed.codec.clone();
    }

    let mut score = 0_i64;
    if let Some(resolution) = release.resolution {
        score += (resolution as i64 + 1) * RESOLUTION_WEIGHT;
    }
    score += source_tier(release.source.as_deref()) * SOURCE_WEIGHT;
    score += codec_tier(release.codec.as_deref()) * CODEC_WEIGHT;
    score += i64::from(release.seeders).min(SEEDER_CAP);
    if size_fits(release.resolution, release.size_bytes) {
        score += SIZE_FIT_BONUS;
    }
    if release.seeders == 0 {
        score += DEAD_TORRENT_PENALTY;
    }

    release.score = score;
    release
}

fn source_tier(source: Option<&str>) -> i64 {
    source
        .and_then(|label| {
            [
                SourceTag::Cam,
                SourceTag::Dvd,
                SourceTag::Hdtv,
                SourceTag::WebRip,
                SourceTag::WebDl,
                SourceTag::BluRay,
                SourceTag::Remux,
            ]
            .into_iter()
            .find(|tag| tag.as_str() == label)
        })
        .map_or(0, SourceTag::tier)
}

fn codec_tier(codec: Option<&str>) -> i64 {
    match codec {
        Some("x265") => 3,
        Some("av1") => 2,
        Some("x264") => 1,
        _ => 0,
    }
}

/// Plausible payload window per resolution. A release far outside it is not
/// penalised, it just misses the fit bonus; season packs legitimately exceed
/// the upper bound.
fn size_fits(resolution: Option<Resolution>, size_bytes: u64) -> bool {
    const GIB: u64 = 1 << 30;
    let (lo, hi) = match resolution {
        Some(Resolution::Sd480) => (GIB / 4, 4 * GIB),
        Some(Resolution::Hd720) => (GIB / 2, 8 * GIB),
        Some(Resolution::Fhd1080) => (GIB, 25 * GIB),
        Some(Resolution::Uhd2160) => (4 * GIB, 90 * GIB),
        None => return false,
    };
    (lo..=hi).contains(&size_bytes)
}

/// Descending order: score, then resolution, source, seeders and publish
/// date as tie-breaks.
fn compare_ranked(a: &Release, b: &Release) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.resolution.cmp(&a.resolution))
        .then_with(|| source_tier(b.source.as_deref()).cmp(&source_tier(a.source.as_deref())))
        .then_with(|| b.seeders.cmp(&a.seeders))
        .then_with(|| b.published_at.cmp(&a.published_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use annex_core::TransportKind;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn release(title: &str, seeders: u32, size_gib: u64) -> Release {
        Release {
            title: title.to_string(),
            indexer: "test".to_string(),
            resolution: None,
            source: None,
            codec: None,
            size_bytes: size_gib << 30,
            seeders,
            leechers: 0,
            download_url: format!("magnet:?xt={title}"),
            published_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            score: 0,
        }
    }

    fn server(max_resolution: Resolution) -> ServerConfig {
        ServerConfig {
            id: Uuid::new_v4(),
            name: "s".to_string(),
            max_resolution,
            movie_root: "/movies".to_string(),
            tv_root: "/tv".to_string(),
            transport: TransportKind::LocalCopy,
            endpoint: serde_json::Value::Null,
            default_profile_id: None,
        }
    }

    #[test]
    fn required_resolution_is_the_maximum_target() {
        let servers = vec![server(Resolution::Fhd1080), server(Resolution::Hd720)];
        assert_eq!(
            derive_required_resolution(&servers),
            Some(Resolution::Fhd1080)
        );
        assert_eq!(derive_required_resolution(&[]), None);
    }

    #[test]
    fn filter_partitions_on_parsed_resolution() {
        let releases = vec![
            release("Movie.2020.1080p.WEB-DL", 10, 8),
            release("Movie.2020.720p.WEB-DL", 10, 4),
            release("Movie.2020.HDTV", 10, 1),
        ];
        let (matching, below) = filter_by_resolution(releases, Resolution::Fhd1080);
        assert_eq!(matching.len(), 1);
        assert_eq!(below.len(), 2);
    }

    #[test]
    fn rank_prefers_resolution_then_source_then_seeders() {
        let releases = vec![
            release("Movie.2020.1080p.WEBRip.x264", 90, 8),
            release("Movie.2020.1080p.BluRay.x264", 40, 9),
            release("Movie.2020.2160p.WEB-DL.x265", 5, 20),
        ];
        let ranked = rank(releases, Resolution::Fhd1080, 5);
        assert_eq!(ranked.matching.len(), 3);
        assert!(ranked.matching[0].title.contains("2160p"));
        assert!(ranked.matching[1].title.contains("BluRay"));
        assert!(ranked.below_quality.is_empty());
    }

    #[test]
    fn dead_torrents_are_rejected() {
        let releases = vec![
            release("Movie.2020.1080p.WEB-DL", 0, 8),
            release("Movie.2020.1080p.WEB-DL.x264", 3, 8),
        ];
        let ranked = rank(releases, Resolution::Fhd1080, 5);
        assert_eq!(ranked.matching.len(), 1);
        assert_eq!(ranked.rejected.len(), 1);
        assert_eq!(ranked.rejected[0].seeders, 0);
    }

    #[test]
    fn below_quality_is_sorted_and_truncated() {
        let releases: Vec<Release> = (1..=8)
            .map(|i| release("Movie.2020.720p.WEB-DL", i * 10, 4))
            .collect();
        let ranked = rank(releases, Resolution::Fhd1080, 5);
        assert!(ranked.matching.is_empty());
        assert_eq!(ranked.below_quality.len(), 5);
        assert!(ranked.below_quality[0].seeders >= ranked.below_quality[4].seeders);
    }

    #[test]
    fn ranked_releases_carry_parsed_facts() {
        let ranked = rank(
            vec![release("Movie.2020.1080p.BluRay.x265", 25, 9)],
            Resolution::Fhd1080,
            5,
        );
        let best = &ranked.matching[0];
        assert_eq!(best.resolution, Some(Resolution::Fhd1080));
        assert_eq!(best.source.as_deref(), Some("bluray"));
        assert_eq!(best.codec.as_deref(), Some("x265"));
        assert!(best.score > 0);
    }
}
