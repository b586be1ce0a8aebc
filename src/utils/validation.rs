//! URL and input validation utilities

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

static YOUTUBE_URL_RE: OnceLock<Regex> = OnceLock::new();

fn youtube_url_re() -> &'static Regex {
    YOUTUBE_URL_RE.get_or_init(|| {
        Regex::new(r"^(?i)(https?://)?(www\.)?(youtube\.com|youtu\.be)/.+$")
            .expect("static regex must compile")
    })
}

/// Check whether a string looks like a YouTube video or playlist URL.
///
/// Accepts `youtube.com` and `youtu.be` hosts, with or without a scheme and
/// with or without a `www.` prefix. The check is intentionally shallow: it
/// does not verify that the URL resolves to an existing video. That is only
/// discovered when the fetcher probes it.
pub fn is_valid_youtube_url(url: &str) -> bool {
    youtube_url_re().is_match(url.trim())
}

/// Extract the video id from a YouTube URL, if one is present.
///
/// Understands `watch?v=`, `youtu.be/<id>`, `/shorts/<id>` and `/embed/<id>`
/// shapes. Used by consumers for compact display, not for validation.
pub fn extract_video_id(url: &str) -> Option<String> {
    let trimmed = url.trim();
    let normalized = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = Url::parse(&normalized).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    match host {
        "youtu.be" => parsed
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        "youtube.com" => {
            if parsed.path() == "/watch" {
                return parsed
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned());
            }

            let mut segments = parsed.path_segments()?;
            match segments.next()? {
                "shorts" | "embed" | "live" => segments
                    .next()
                    .filter(|id| !id.is_empty())
                    .map(str::to_string),
                _ => None,
            }
        }
        _ => None,
    }
}
