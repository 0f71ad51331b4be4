//! Governance-data adapter that supplies raw proposal text

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{GovbriefError, Result};

/// Supplies the raw text of a proposal
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_proposal(&self, network: &str, ref_id: &str) -> Result<String>;
}

/// Field names scanned, in order, when no typed shape matches
const SCAN_FIELDS: [&str; 4] = ["content", "description", "body", "text"];
const SCAN_MAX_DEPTH: usize = 6;
const BODY_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct FlatPost {
    #[serde(default)]
    title: Option<String>,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WrappedPost {
    data: FlatPost,
}

#[derive(Debug, Deserialize)]
struct PostList {
    posts: Vec<FlatPost>,
}

impl FlatPost {
    fn into_text(self) -> Option<String> {
        let content = self.content.trim();
        if content.is_empty() {
            return None;
        }
        Some(match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => format!("{title}\n\n{content}"),
            _ => content.to_string(),
        })
    }
}

type ParseAttempt = fn(&Value) -> Option<String>;

/// Typed attempts from most to least specific; the field scan is last
const PARSE_ATTEMPTS: [(&str, ParseAttempt); 4] = [
    ("flat-post", parse_flat),
    ("data-wrapped", parse_wrapped),
    ("post-list", parse_list),
    ("field-scan", parse_scan),
];

fn parse_flat(v: &Value) -> Option<String> {
    FlatPost::deserialize(v).ok().and_then(FlatPost::into_text)
}

fn parse_wrapped(v: &Value) -> Option<String> {
    WrappedPost::deserialize(v)
        .ok()
        .and_then(|w| w.data.into_text())
}

fn parse_list(v: &Value) -> Option<String> {
    PostList::deserialize(v)
        .ok()
        .and_then(|l| l.posts.into_iter().find_map(FlatPost::into_text))
}

fn parse_scan(v: &Value) -> Option<String> {
    scan_fields(v, 0)
}

/// Extract proposal text from a loosely structured JSON document
pub fn parse_proposal(value: &Value) -> Option<String> {
    PARSE_ATTEMPTS.iter().find_map(|(name, attempt)| {
        let text = attempt(value)?;
        debug!("Proposal parsed via {}", name);
        Some(text)
    })
}

fn scan_fields(value: &Value, depth: usize) -> Option<String> {
    if depth > SCAN_MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            for field in SCAN_FIELDS {
                if let Some(Value::String(s)) = map.get(field)
                    && !s.trim().is_empty()
                {
                    return Some(s.trim().to_string());
                }
            }
            map.values().find_map(|v| scan_fields(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| scan_fields(v, depth + 1)),
        _ => None,
    }
}

/// Fetches proposals over HTTP from a templated URL such as
/// `https://api.example.org/{network}/posts/{ref_id}`
pub struct HttpContentSource {
    client: Client,
    url_template: String,
}

impl HttpContentSource {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GovbriefError::Internal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Self::new(
            config.proposal_url_template.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn proposal_url(&self, network: &str, ref_id: &str) -> String {
        self.url_template
            .replace("{network}", network)
            .replace("{ref_id}", ref_id)
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch_proposal(&self, network: &str, ref_id: &str) -> Result<String> {
        let url = self.proposal_url(network, ref_id);
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| GovbriefError::ContentSource {
                message: format!("request to {} failed: {}", url, e),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| GovbriefError::ContentSource {
            message: format!("reading {} failed: {}", url, e),
        })?;
        if !status.is_success() {
            let snippet: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
            return Err(GovbriefError::ContentSource {
                message: format!("{} returned HTTP {}: {}", url, status.as_u16(), snippet),
            });
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => parse_proposal(&value).ok_or_else(|| GovbriefError::ContentSource {
                message: format!("no proposal text found in response from {}", url),
            }),
            // some deployments answer with plain text
            Err(_) if !body.trim().is_empty() => Ok(body.trim().to_string()),
            Err(_) => Err(GovbriefError::ContentSource {
                message: format!("empty response from {}", url),
            }),
        }
    }
}
