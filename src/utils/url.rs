use once_cell::sync::Lazy;
use regex::Regex;

static YOUTUBE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(https?://)?(www\.)?(youtube|youtu|youtube-nocookie)\.(com|be)/(watch\?v=|embed/|v/|.+\?v=)?([^&=%\?]{11})",
    )
    .expect("valid youtube url regex")
});

static VIDEO_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:youtu\.be/|[?&]v=|/embed/|/v/|/shorts/)([A-Za-z0-9_-]{11})")
        .expect("valid video id regex")
});

/// Accepts the usual YouTube URL shapes (watch, youtu.be, embed, v/).
pub fn validate_youtube_url(url: &str) -> bool {
    YOUTUBE_URL.is_match(url.trim())
}

/// Extracts the 11 character video id from a YouTube URL.
pub fn extract_video_id(url: &str) -> Option<String> {
    let url = url.trim();
    if !url.contains("youtu") {
        return None;
    }
    VIDEO_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
