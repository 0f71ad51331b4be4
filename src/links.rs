//! Link extraction and classification for proposal text

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::fetch::SafeFetcher;

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s<>"'`\[\]{}|\\^]+"#).expect("url regex should compile")
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')'];

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "rtf", "odt", "doc", "docx"];
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tif", "tiff",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "flac", "aac"];

/// Hosts whose links are documents regardless of path
pub const DEFAULT_DOCUMENT_HOSTS: &[&str] = &["docs.google.com", "drive.google.com"];

/// Social and forum hosts whose pages are never worth downloading
pub const DEFAULT_SKIP_DOMAINS: &[&str] = &[
    "twitter.com",
    "x.com",
    "t.co",
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "reddit.com",
    "discord.com",
    "discord.gg",
    "t.me",
    "telegram.me",
    "youtube.com",
    "youtu.be",
    "forum.polkadot.network",
    "polkassembly.io",
    "subsquare.io",
];

/// Attachment category of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Document,
    Image,
    Video,
    Audio,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Document,
        Category::Image,
        Category::Video,
        Category::Audio,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Document => "document",
            Category::Image => "image",
            Category::Video => "video",
            Category::Audio => "audio",
            Category::Other => "other",
        }
    }

    /// Subdirectory of a cache entry the category's files are written to
    pub fn subdir(&self) -> &'static str {
        match self {
            Category::Document => "files",
            Category::Image => "images",
            Category::Video => "video",
            Category::Audio => "audio",
            Category::Other => "other",
        }
    }

    /// Filename prefix for stored attachments
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Category::Document => "doc",
            Category::Image => "image",
            Category::Video => "video",
            Category::Audio => "audio",
            Category::Other => "file",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Find every http(s) URL in `text`, trimmed of trailing punctuation and
/// deduplicated in first-seen order.
pub fn extract_links(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for m in URL_RE.find_iter(text) {
        let link = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        if link.len() <= "https://".len() {
            continue;
        }
        if seen.insert(link.to_string()) {
            links.push(link.to_string());
        }
    }
    links
}

/// Lower-cased extension of the last path segment, if any
pub fn url_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
}

/// Categorizes links and applies the skip-list. Built once from configuration.
#[derive(Debug, Clone)]
pub struct LinkClassifier {
    document_hosts: Vec<String>,
    skip_domains: Vec<String>,
}

impl Default for LinkClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_DOCUMENT_HOSTS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_SKIP_DOMAINS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl LinkClassifier {
    pub fn new(document_hosts: Vec<String>, skip_domains: Vec<String>) -> Self {
        Self {
            document_hosts,
            skip_domains,
        }
    }

    pub fn from_config(cfg: &crate::config::FetchConfig) -> Self {
        Self::new(cfg.document_hosts.clone(), cfg.skip_domains.clone())
    }

    pub fn classify(&self, url: &str) -> Category {
        let Ok(parsed) = Url::parse(url) else {
            return Category::Other;
        };
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        if self.document_hosts.iter().any(|d| host_matches(&host, d)) {
            return Category::Document;
        }
        match url_extension(&parsed) {
            Some(ext) if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) => Category::Document,
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => Category::Image,
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => Category::Video,
            Some(ext) if AUDIO_EXTENSIONS.contains(&ext.as_str()) => Category::Audio,
            _ => Category::Other,
        }
    }

    /// Whether the link's host is on the social/forum skip-list
    pub fn is_skip_domain(&self, url: &str) -> bool {
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        else {
            return false;
        };
        self.skip_domains.iter().any(|d| host_matches(&host, d))
    }

    /// Skip-list hit or fetch-policy refusal. Refusals are logged, not raised.
    pub async fn should_skip(&self, url: &str, fetcher: &SafeFetcher) -> bool {
        if self.is_skip_domain(url) {
            debug!("Skipping {} (skip-listed domain)", url);
            return true;
        }
        if let Err(err) = fetcher.check(url).await {
            info!(url = %url, reason = %err, "Refusing link blocked by fetch policy");
            return true;
        }
        false
    }
}
