//! Media classification from release names
//!
//! Pure, deterministic mapping from a staging entry's name to a verdict:
//! - "Breaking.Bad.S01E02.mkv"           -> Episode
//! - "Breaking.Bad.Season.1" (directory) -> SeasonPack
//! - "Inception.2010.1080p.BluRay.mkv"   -> Movie
//! - anything else                       -> Unknown
//!
//! TV tokens are stronger evidence than a bare year, so the episode and
//! season patterns are checked before the movie pattern. Names matching no
//! pattern stay Unknown; the organizer leaves those entries in place.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

/// Classification verdict for one staging entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaVerdict {
    Movie { title: String, year: Option<u32> },
    Episode { show: String, season: u32, episode: u32 },
    SeasonPack { show: String, season: u32 },
    Unknown,
}

static EPISODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)[\s.]*[Ss](\d{1,2})[Ee](\d{1,3})").unwrap());

static NXNN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)[\s.]*\b(\d{1,2})x(\d{2})\b").unwrap());

static SEASON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)[\s.]*\bSeason[\s.]*(\d{1,2})\b").unwrap());

static SEASON_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)[\s.]+[Ss](\d{1,2})\b").unwrap());

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());

static RELEASE_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(2160p|1080p|720p|480p|4k|uhd|bluray|blu-ray|bdrip|dvdrip|webrip|web-dl|webdl|hdtv|remux|repack|proper|x264|x265|h264|h265|hevc|av1|aac|dts|ac3|ddp)\b",
    )
    .unwrap()
});

static BRACKETS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").unwrap());

static TRAILING_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(?(19\d{2}|20\d{2})\)?\s*$").unwrap());

static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Classify an entry by name. `is_dir` gates the season-pack pattern: a
/// standalone season token on a file is not enough evidence of a pack.
pub fn classify(name: &str, is_dir: bool) -> MediaVerdict {
    // Files lose their extension before matching; directory names are taken
    // whole ("Breaking.Bad.Season.1" must keep its ".1").
    let base: &str = if is_dir {
        name
    } else {
        Path::new(name).file_stem().and_then(|s| s.to_str()).unwrap_or(name)
    };

    if let Some(caps) = EPISODE_RE.captures(base).or_else(|| NXNN_RE.captures(base)) {
        let show = clean_title(&caps[1]);
        if let (Some(season), Some(episode), false) =
            (parse_num(&caps[2]), parse_num(&caps[3]), show.is_empty())
        {
            return MediaVerdict::Episode {
                show,
                season,
                episode,
            };
        }
    }

    if is_dir {
        if let Some(caps) = SEASON_WORD_RE
            .captures(base)
            .or_else(|| SEASON_TOKEN_RE.captures(base))
        {
            let show = clean_title(&caps[1]);
            if let (Some(season), false) = (parse_num(&caps[2]), show.is_empty()) {
                return MediaVerdict::SeasonPack { show, season };
            }
        }
    }

    // Movie: a year token alone is weak evidence; require a release tag too
    if let Some(m) = YEAR_RE.find(base) {
        if RELEASE_TAG_RE.is_match(base) {
            let title = clean_title(&base[..m.start()]);
            let year = base[m.start()..m.end()].parse().ok();
            if !title.is_empty() {
                return MediaVerdict::Movie { title, year };
            }
        }
    }

    MediaVerdict::Unknown
}

/// Clean a raw title fragment: separators to spaces, bracketed junk and
/// release tags removed, trailing year dropped, whitespace collapsed.
fn clean_title(raw: &str) -> String {
    let spaced = raw.replace(['.', '_'], " ");
    let no_brackets = BRACKETS_RE.replace_all(&spaced, "");
    let no_tags = RELEASE_TAG_RE.replace_all(&no_brackets, "");
    let no_year = TRAILING_YEAR_RE.replace(&no_tags, "");
    let collapsed = SPACE_RE.replace_all(&no_year, " ");
    collapsed
        .trim()
        .trim_matches(|c: char| matches!(c, '-' | '_' | '(' | ')'))
        .trim()
        .to_string()
}

fn parse_num(s: &str) -> Option<u32> {
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_with_year_and_tags() {
        let verdict = classify("Inception.2010.1080p.BluRay.mkv", false);
        assert_eq!(
            verdict,
            MediaVerdict::Movie {
                title: "Inception".to_string(),
                year: Some(2010),
            }
        );
    }

    #[test]
    fn test_episode_sxxexx() {
        let verdict = classify("Breaking.Bad.S01E02.mkv", false);
        assert_eq!(
            verdict,
            MediaVerdict::Episode {
                show: "Breaking Bad".to_string(),
                season: 1,
                episode: 2,
            }
        );
    }

    #[test]
    fn test_episode_nxnn() {
        let verdict = classify("Corner Gas 6x12 720p HDTV.mkv", false);
        assert_eq!(
            verdict,
            MediaVerdict::Episode {
                show: "Corner Gas".to_string(),
                season: 6,
                episode: 12,
            }
        );
    }

    #[test]
    fn test_season_pack_word() {
        let verdict = classify("Breaking.Bad.Season.1", true);
        assert_eq!(
            verdict,
            MediaVerdict::SeasonPack {
                show: "Breaking Bad".to_string(),
                season: 1,
            }
        );
    }

    #[test]
    fn test_season_pack_token() {
        let verdict = classify("The.Wire.S03.1080p.BluRay", true);
        assert_eq!(
            verdict,
            MediaVerdict::SeasonPack {
                show: "The Wire".to_string(),
                season: 3,
            }
        );
    }

    #[test]
    fn test_season_token_on_file_is_not_a_pack() {
        // A loose file with only a season token matches neither TV pattern,
        // and has no year, so it stays Unknown
        assert_eq!(classify("The.Wire.S03.mkv", false), MediaVerdict::Unknown);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(classify("randomfile.mkv", false), MediaVerdict::Unknown);
        assert_eq!(classify("notes", true), MediaVerdict::Unknown);
    }

    #[test]
    fn test_year_without_tags_is_unknown() {
        assert_eq!(classify("Inception.2010.mkv", false), MediaVerdict::Unknown);
    }

    #[test]
    fn test_tv_beats_movie() {
        // Year and release tags present, but the episode token wins
        let verdict = classify("Breaking.Bad.2008.S01E02.1080p.BluRay.mkv", false);
        assert_eq!(
            verdict,
            MediaVerdict::Episode {
                show: "Breaking Bad".to_string(),
                season: 1,
                episode: 2,
            }
        );
    }

    #[test]
    fn test_season_pack_beats_movie() {
        let verdict = classify("Breaking.Bad.2008.Season.2.1080p.WEB-DL", true);
        assert_eq!(
            verdict,
            MediaVerdict::SeasonPack {
                show: "Breaking Bad".to_string(),
                season: 2,
            }
        );
    }

    #[test]
    fn test_bracketed_junk_removed() {
        let verdict = classify("[Group] Inception (2010) 2160p WEB-DL.mkv", false);
        assert_eq!(
            verdict,
            MediaVerdict::Movie {
                title: "Inception".to_string(),
                year: Some(2010),
            }
        );
    }

    #[test]
    fn test_resolution_is_not_an_episode_token() {
        let verdict = classify("Dunkirk.2017.1920x1080.BluRay.mkv", false);
        assert!(matches!(verdict, MediaVerdict::Movie { .. }));
    }
}
