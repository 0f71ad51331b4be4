//! Outbound fetching guarded against server-side request forgery.
//!
//! Every URL is vetted before a connection is opened: the scheme must be
//! http(s), the host must not be on the blocklist, and every address the host
//! resolves to must fall outside the blocked ranges. The vetted addresses are
//! pinned into the request so the connection cannot be re-resolved elsewhere,
//! and redirects are followed by hand so each hop is vetted again.

pub mod policy;
pub mod resolver;

use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use tracing::debug;
use url::{Host, Url};

use crate::error::{GovbriefError, Result};

pub use policy::{FetchPolicy, IpRange};
pub use resolver::{HostResolver, StaticResolver, SystemResolver};

const DEFAULT_TIMEOUT_MS: u64 = 45_000;

/// Body and metadata of a completed fetch
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    /// Media type without parameters, lower-cased
    pub content_type: Option<String>,
    /// URL after redirects
    pub final_url: Url,
}

/// A URL that passed the policy, with the addresses it was checked against
#[derive(Debug, Clone)]
pub struct VettedUrl {
    pub url: Url,
    pub addrs: Vec<SocketAddr>,
}

pub struct SafeFetcher {
    policy: Arc<FetchPolicy>,
    resolver: Arc<dyn HostResolver>,
    timeout: Duration,
    user_agent: String,
}

impl SafeFetcher {
    pub fn new(policy: FetchPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            resolver: Arc::new(SystemResolver),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            user_agent: format!("govbrief/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn from_config(cfg: &crate::config::Config) -> Result<Self> {
        Ok(Self::new(FetchPolicy::from_config(&cfg.fetch)?)
            .with_timeout(Duration::from_millis(cfg.limits.http_timeout_ms))
            .with_user_agent(cfg.fetch.user_agent.clone()))
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// True when `url` may be fetched under the current policy
    pub async fn is_safe(&self, url: &str) -> bool {
        self.check(url).await.is_ok()
    }

    /// Vet `raw` against the policy, resolving its host when it is a name.
    /// Resolution failure counts as unsafe.
    pub async fn check(&self, raw: &str) -> Result<VettedUrl> {
        let refuse = |reason: String| GovbriefError::UnsafeUrl {
            url: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw).map_err(|e| refuse(format!("unparseable URL: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(refuse(format!("scheme '{other}' is not allowed"))),
        }
        let port = url.port_or_known_default().unwrap_or(80);

        let addrs = match url.host() {
            None => return Err(refuse("missing host".to_string())),
            Some(Host::Ipv4(v4)) => vec![SocketAddr::new(IpAddr::V4(v4), port)],
            Some(Host::Ipv6(v6)) => vec![SocketAddr::new(IpAddr::V6(v6), port)],
            Some(Host::Domain(domain)) => {
                if domain.trim().is_empty() {
                    return Err(refuse("empty host".to_string()));
                }
                if self.policy.host_is_blocked(domain) {
                    return Err(refuse(format!("host '{domain}' is blocklisted")));
                }
                let addrs = self
                    .resolver
                    .resolve(domain, port)
                    .await
                    .map_err(|e| refuse(format!("DNS resolution failed: {e}")))?;
                if addrs.is_empty() {
                    return Err(refuse(format!("host '{domain}' resolved to no addresses")));
                }
                addrs
            }
        };

        for addr in &addrs {
            if let Some(range) = self.policy.blocking_range(addr.ip()) {
                return Err(refuse(format!(
                    "address {} is in blocked range {}",
                    addr.ip(),
                    range
                )));
            }
        }

        Ok(VettedUrl { url, addrs })
    }

    /// GET `url` after vetting it, failing with `SizeLimitExceeded` when the
    /// body is larger than `limit` bytes. No partial body is returned.
    pub async fn fetch(&self, url: &str, limit: usize) -> Result<Fetched> {
        let mut current = url.to_string();

        for _ in 0..=self.policy.max_redirects {
            let vetted = self.check(&current).await?;
            let client = self.client_for(&vetted)?;
            let response = client
                .get(vetted.url.clone())
                .send()
                .await
                .map_err(|e| fetch_failed(&current, e))?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| fetch_failed(&current, "redirect without Location header"))?;
                let next = vetted
                    .url
                    .join(location)
                    .map_err(|e| fetch_failed(&current, format!("bad redirect target: {e}")))?;
                debug!("Following redirect {} -> {}", current, next);
                current = next.to_string();
                continue;
            }
            if !status.is_success() {
                return Err(fetch_failed(&current, format!("HTTP status {status}")));
            }

            if let Some(len) = response.content_length()
                && len > limit as u64
            {
                return Err(GovbriefError::SizeLimitExceeded {
                    url: current,
                    limit,
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(';').next())
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| !v.is_empty());

            let bytes = read_capped(response, limit, &current).await?;
            return Ok(Fetched {
                bytes,
                content_type,
                final_url: vetted.url,
            });
        }

        Err(fetch_failed(
            url,
            format!("more than {} redirects", self.policy.max_redirects),
        ))
    }

    fn client_for(&self, vetted: &VettedUrl) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .user_agent(self.user_agent.as_str());
        if let Some(Host::Domain(domain)) = vetted.url.host() {
            builder = builder.resolve_to_addrs(domain, &vetted.addrs);
        }
        builder.build().map_err(|e| GovbriefError::Internal {
            message: format!("Failed to build HTTP client: {}", e),
        })
    }
}

fn fetch_failed(url: &str, err: impl Display) -> GovbriefError {
    GovbriefError::FetchFailed {
        url: url.to_string(),
        message: err.to_string(),
    }
}

/// Read at most `limit + 1` bytes; going past `limit` drops the buffer
async fn read_capped(response: reqwest::Response, limit: usize, url: &str) -> Result<Vec<u8>> {
    let ceiling = limit.saturating_add(1);
    let mut stream = response.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| fetch_failed(url, e))?;
        let room = ceiling.saturating_sub(body.len());
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() > limit {
            return Err(GovbriefError::SizeLimitExceeded {
                url: url.to_string(),
                limit,
            });
        }
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> SafeFetcher {
        let resolver = StaticResolver::new()
            .with_host("example.com", &["93.184.216.34".parse().unwrap()])
            .with_host("rebind.example", &["10.0.0.7".parse().unwrap()])
            .with_host(
                "mixed.example",
                &["93.184.216.34".parse().unwrap(), "127.0.0.1".parse().unwrap()],
            );
        SafeFetcher::new(FetchPolicy::default()).with_resolver(Arc::new(resolver))
    }

    #[tokio::test]
    async fn rejects_internal_targets() {
        let f = fetcher();
        assert!(!f.is_safe("http://127.0.0.1/x").await);
        assert!(!f.is_safe("http://10.1.2.3/x").await);
        assert!(!f.is_safe("http://169.254.169.254/latest/meta-data").await);
        assert!(!f.is_safe("http://localhost/x").await);
        assert!(!f.is_safe("http://[::1]/x").await);
        assert!(!f.is_safe("http://[::127.0.0.1]/x").await);
        assert!(!f.is_safe("http://[64:ff9b::a9fe:a9fe]/latest").await);
        assert!(!f.is_safe("http://[2002:7f00:1::]/x").await);
        assert!(!f.is_safe("http://metadata.google.internal/computeMetadata").await);
    }

    #[tokio::test]
    async fn accepts_public_host() {
        let f = fetcher();
        assert!(f.is_safe("https://example.com/doc.pdf").await);
        let vetted = f.check("https://example.com/doc.pdf").await.unwrap();
        assert_eq!(vetted.addrs[0].port(), 443);
    }

    #[tokio::test]
    async fn any_private_resolution_is_unsafe() {
        let f = fetcher();
        assert!(!f.is_safe("https://rebind.example/a").await);
        assert!(!f.is_safe("https://mixed.example/a").await);
    }

    #[tokio::test]
    async fn unresolvable_and_odd_schemes_are_unsafe() {
        let f = fetcher();
        assert!(!f.is_safe("https://unknown.example/a").await);
        assert!(!f.is_safe("ftp://example.com/a").await);
        assert!(!f.is_safe("file:///etc/passwd").await);
        assert!(!f.is_safe("not a url").await);
    }

    #[tokio::test]
    async fn refusal_carries_reason() {
        let f = fetcher();
        let err = f.check("http://10.1.2.3/x").await.unwrap_err();
        match err {
            GovbriefError::UnsafeUrl { reason, .. } => assert!(reason.contains("10.0.0.0/8")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsafe_url_is_refused_before_any_request() {
        let f = fetcher();
        let err = f.fetch("http://192.168.0.10/secret", 1024).await.unwrap_err();
        assert!(matches!(err, GovbriefError::UnsafeUrl { .. }));
    }
}
