//! Release and file name parsing.
//!
//! Release names arrive as separator-soup (`Show.Name.S02E04.1080p.WEB-DL`).
//! The parser walks separator-split tokens left to right: everything before
//! the first recognised marker is the title, everything after it is
//! classified or ignored.

use std::sync::LazyLock;

use annex_core::Resolution;
use regex::Regex;

/// Source markers ordered worst to best; the index is the ranking tier.
const SOURCE_TIERS: &[(&str, SourceTag)] = &[
    ("cam", SourceTag::Cam),
    ("telesync", SourceTag::Cam),
    ("dvdrip", SourceTag::Dvd),
    ("dvd", SourceTag::Dvd),
    ("hdtv", SourceTag::Hdtv),
    ("pdtv", SourceTag::Hdtv),
    ("webrip", SourceTag::WebRip),
    ("web-dl", SourceTag::WebDl),
    ("webdl", SourceTag::WebDl),
    ("web", SourceTag::WebDl),
    ("bdrip", SourceTag::BluRay),
    ("brrip", SourceTag::BluRay),
    ("bluray", SourceTag::BluRay),
    ("blu-ray", SourceTag::BluRay),
    ("remux", SourceTag::Remux),
];

/// Codec markers mapped to canonical labels.
const CODEC_LABELS: &[(&str, &str)] = &[
    ("x265", "x265"),
    ("h265", "x265"),
    ("hevc", "x265"),
    ("x264", "x264"),
    ("h264", "x264"),
    ("avc", "x264"),
    ("av1", "av1"),
    ("xvid", "xvid"),
    ("divx", "xvid"),
];

static SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^s(\d{1,2})e(\d{1,3})(?:-?e(\d{1,3}))?$").expect("static regex compiles")
});
static SEASON_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^s(?:eason)?[\s.]?(\d{1,2})$").expect("static regex compiles"));
static EPISODE_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^e(?:p)?(\d{1,3})$").expect("static regex compiles"));
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(19|20)\d{2}$").expect("static regex compiles"));

/// Source classification of a release, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceTag {
    /// Camera or telesync rip.
    Cam,
    /// DVD source.
    Dvd,
    /// Broadcast capture.
    Hdtv,
    /// Re-encoded streaming capture.
    WebRip,
    /// Untouched streaming download.
    WebDl,
    /// Blu-ray encode.
    BluRay,
    /// Untouched Blu-ray remux.
    Remux,
}

impl SourceTag {
    /// Canonical lowercase label for the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cam => "cam",
            Self::Dvd => "dvd",
            Self::Hdtv => "hdtv",
            Self::WebRip => "webrip",
            Self::WebDl => "web-dl",
            Self::BluRay => "bluray",
            Self::Remux => "remux",
        }
    }

    /// Ranking tier, higher is better.
    #[must_use]
    pub const fn tier(self) -> i64 {
        self as i64
    }
}

/// Structured facts parsed from a release or file name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedName {
    /// Normalized title portion (lowercase, punctuation stripped).
    pub normalized_title: String,
    /// Year marker, when present.
    pub year: Option<i32>,
    /// Season number, when present.
    pub season: Option<i32>,
    /// First episode number, when present.
    pub episode: Option<i32>,
    /// Last episode of a multi-episode range, when present.
    pub episode_end: Option<i32>,
    /// Resolution marker, when present.
    pub resolution: Option<Resolution>,
    /// Source marker, when present.
    pub source: Option<SourceTag>,
    /// Canonical codec label, when present.
    pub codec: Option<String>,
}

impl ParsedName {
    /// Whether the name describes a whole-season pack: a season marker with
    /// no episode number.
    #[must_use]
    pub const fn is_season_pack(&self) -> bool {
        self.season.is_some() && self.episode.is_none()
    }

    /// Whether the name spans more than one episode.
    #[must_use]
    pub const fn is_multi_episode(&self) -> bool {
        self.episode_end.is_some()
    }
}

/// Normalize a title for comparison: lowercase, punctuation stripped,
/// whitespace collapsed. `"The.Terminal_List:  Dark Wolf"` becomes
/// `"the terminal list dark wolf"`.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_space = true;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Whether a request title and a parsed release title refer to the same
/// work. Strict equality of normalized titles: `"Show Name"` never matches
/// `"Show Name: Spinoff"`.
#[must_use]
pub fn titles_match(request_title: &str, parsed_title: &str) -> bool {
    let lhs = normalize_title(request_title);
    !lhs.is_empty() && lhs == normalize_title(parsed_title)
}

/// Parse a release or video file name into structured facts.
#[must_use]
pub fn parse_name(name: &str) -> ParsedName {
    // File names keep their stem; directory components are the caller's
    // business.
    let stem = name
        .rsplit('/')
        .next()
        .map_or(name, |last| last.trim_end_matches(known_extension_suffix(last)));

    let mut parsed = ParsedName::default();
    let mut title_tokens: Vec<&str> = Vec::new();
    let mut in_title = true;

    for raw in stem.split(['.', '_', ' ', '[', ']', '(', ')']) {
        let token = raw.trim_matches(['-', ',']);
        if token.is_empty() {
            continue;
        }

        if let Some(caps) = SEASON_EPISODE.captures(token) {
            parsed.season = caps.get(1).and_then(|m| m.as_str().parse().ok());
            parsed.episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
            parsed.episode_end = caps.get(3).and_then(|m| m.as_str().parse().ok());
            in_title = false;
            continue;
        }
        if parsed.season.is_none()
            && let Some(caps) = SEASON_ONLY.captures(token)
        {
            parsed.season = caps.get(1).and_then(|m| m.as_str().parse().ok());
            in_title = false;
            continue;
        }
        if parsed.season.is_some()
            && parsed.episode.is_none()
            && let Some(caps) = EPISODE_ONLY.captures(token)
        {
            parsed.episode = caps.get(1).and_then(|m| m.as_str().parse().ok());
            continue;
        }
        if parsed.year.is_none() && YEAR.is_match(token) {
            parsed.year = token.parse().ok();
            in_title = false;
            continue;
        }
        if let Some(resolution) = resolution_token(token) {
            parsed.resolution = Some(resolution);
            in_title = false;
            continue;
        }
        if let Some(source) = source_token(token) {
            // Later markers win so `web-dl remux` ranks as remux.
            if parsed.source.is_none_or(|current| source > current) {
                parsed.source = Some(source);
            }
            in_title = false;
            continue;
        }
        if let Some(codec) = codec_token(token) {
            parsed.codec = Some(codec.to_owned());
            in_title = false;
            continue;
        }

        if in_title {
            title_tokens.push(token);
        }
    }

    parsed.normalized_title = normalize_title(&title_tokens.join(" "));
    parsed
}

fn known_extension_suffix(file_name: &str) -> &'static str {
    const EXTENSIONS: &[&str] = &[
        ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v",
    ];
    let lower = file_name.to_lowercase();
    EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(**ext))
        .copied()
        .unwrap_or("")
}

fn resolution_token(token: &str) -> Option<Resolution> {
    let lower = token.to_lowercase();
    match lower.as_str() {
        "2160p" | "2160i" | "4k" | "uhd" => Some(Resolution::Uhd2160),
        "1080p" | "1080i" => Some(Resolution::Fhd1080),
        "720p" | "720i" => Some(Resolution::Hd720),
        "480p" | "480i" | "576p" | "576i" => Some(Resolution::Sd480),
        _ => None,
    }
}

fn source_token(token: &str) -> Option<SourceTag> {
    let lower = token.to_lowercase();
    SOURCE_TIERS
        .iter()
        .find(|(marker, _)| lower == *marker)
        .map(|(_, tag)| *tag)
}

fn codec_token(token: &str) -> Option<&'static str> {
    let lower = token.to_lowercase();
    // Release group tags ride on the codec token (`x264-GROUP`), so the part
    // before the first dash is tried as well.
    let prefix = lower.split('-').next().unwrap_or("");
    CODEC_LABELS
        .iter()
        .find(|(marker, _)| lower == *marker || prefix == *marker)
        .map(|(_, label)| *label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_movie_release() {
        let parsed = parse_name("Fight.Club.1999.1080p.BluRay.x264-GROUP");
        assert_eq!(parsed.normalized_title, "fight club");
        assert_eq!(parsed.year, Some(1999));
        assert_eq!(parsed.resolution, Some(Resolution::Fhd1080));
        assert_eq!(parsed.source, Some(SourceTag::BluRay));
        assert_eq!(parsed.codec.as_deref(), Some("x264"));
        assert!(parsed.season.is_none());
    }

    #[test]
    fn parses_episode_release() {
        let parsed = parse_name("Show Name S02E04 720p WEB-DL H264");
        assert_eq!(parsed.normalized_title, "show name");
        assert_eq!(parsed.season, Some(2));
        assert_eq!(parsed.episode, Some(4));
        assert!(!parsed.is_season_pack());
        assert_eq!(parsed.source, Some(SourceTag::WebDl));
        assert_eq!(parsed.codec.as_deref(), Some("x264"));
    }

    #[test]
    fn parses_season_pack() {
        let parsed = parse_name("Show.Name.S02.2160p.WEB-DL.HEVC");
        assert_eq!(parsed.season, Some(2));
        assert!(parsed.episode.is_none());
        assert!(parsed.is_season_pack());
        assert_eq!(parsed.resolution, Some(Resolution::Uhd2160));
    }

    #[test]
    fn parses_multi_episode_range() {
        let parsed = parse_name("Show.S01E01-E03.1080p.WEBRip");
        assert_eq!(parsed.episode, Some(1));
        assert_eq!(parsed.episode_end, Some(3));
        assert!(parsed.is_multi_episode());
        assert!(!parsed.is_season_pack());
    }

    #[test]
    fn file_name_extension_is_ignored() {
        let parsed = parse_name("Show.Name.S03E09.1080p.mkv");
        assert_eq!(parsed.season, Some(3));
        assert_eq!(parsed.episode, Some(9));
        assert_eq!(parsed.normalized_title, "show name");
    }

    #[test]
    fn spinoff_title_does_not_match_base_title() {
        assert!(!titles_match(
            "the terminal list",
            "the terminal list dark wolf"
        ));
        assert!(titles_match("The Terminal List", "the.terminal.list"));
        assert!(!titles_match("", ""));
    }

    #[test]
    fn normalization_collapses_punctuation() {
        assert_eq!(
            normalize_title("The.Terminal_List:  Dark Wolf!"),
            "the terminal list dark wolf"
        );
        assert_eq!(normalize_title("Mr. Robot"), "mr robot");
    }

    #[test]
    fn remux_outranks_earlier_source_marker() {
        let parsed = parse_name("Movie.2020.1080p.BluRay.Remux.AVC");
        assert_eq!(parsed.source, Some(SourceTag::Remux));
    }
}
