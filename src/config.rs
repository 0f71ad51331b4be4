use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure loaded from govbrief.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub limits: Limits,
    pub fetch: FetchConfig,
    pub source: SourceConfig,
    pub analysis: AnalysisConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Where the on-disk cache tree lives
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("govbrief");
        Self { root }
    }
}

/// Work and size ceilings applied during a refresh
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Limits {
    pub max_documents: usize,
    pub max_per_binary_category: usize,
    pub max_binary_bytes: usize,
    pub document_text_chars: usize,
    pub generic_text_chars: usize,
    pub generic_fetch_bytes: usize,
    /// Extracted text shorter than this is treated as a failed extraction
    pub min_extracted_chars: usize,
    pub http_timeout_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_documents: 12,
            max_per_binary_category: 12,
            max_binary_bytes: 20 * 1024 * 1024,
            document_text_chars: 50_000,
            generic_text_chars: 50_000,
            generic_fetch_bytes: 100_000,
            min_extracted_chars: 100,
            http_timeout_ms: 45_000,
        }
    }
}

/// Outbound fetch policy and link heuristics
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub blocked_hosts: Vec<String>,
    /// CIDR notation, e.g. "10.0.0.0/8"
    pub blocked_ranges: Vec<String>,
    pub skip_domains: Vec<String>,
    pub document_hosts: Vec<String>,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            blocked_hosts: crate::fetch::policy::DEFAULT_BLOCKED_HOSTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            blocked_ranges: crate::fetch::policy::DEFAULT_BLOCKED_RANGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            skip_domains: crate::links::DEFAULT_SKIP_DOMAINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            document_hosts: crate::links::DEFAULT_DOCUMENT_HOSTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            user_agent: format!("govbrief/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 5,
        }
    }
}

/// Governance-data API the proposal text comes from
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    /// `{network}` and `{ref_id}` are substituted
    pub proposal_url_template: String,
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            proposal_url_template: "https://api.polkassembly.io/api/v1/posts/on-chain-post?postId={ref_id}&proposalType=referendums_v2&network={network}".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Analysis orchestrator and provider settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub batch_timeout_ms: u64,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_ms: u64,
    /// Minimum spacing between sequential enrichment calls
    pub enrichment_pacing_ms: u64,
    pub max_enrichment_items: usize,
    /// Proposal text beyond this many characters is cut before prompting
    pub max_prompt_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_timeout_ms: 15 * 60 * 1000,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 2_000,
            request_timeout_ms: 180_000,
            enrichment_pacing_ms: 2_000,
            max_enrichment_items: 5,
            max_prompt_chars: 120_000,
        }
    }
}

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "govbrief=info";

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub analysis_api_key: Option<String>,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            analysis_api_key: None,
            log_level: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        Self {
            analysis_api_key: std::env::var("GOVBRIEF_ANALYSIS_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok()
                .filter(|k| !k.trim().is_empty()),
            log_level: std::env::var("RUST_LOG")
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses GOVBRIEF_CONFIG environment variable or defaults to "govbrief.toml"
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(env_path) = std::env::var("GOVBRIEF_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::from_path(".env");
        }

        let config_path =
            std::env::var("GOVBRIEF_CONFIG").unwrap_or_else(|_| "govbrief.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            toml::from_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Apply env-first overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("GOVBRIEF_CACHE_DIR")
            && !dir.trim().is_empty()
        {
            self.cache.root = PathBuf::from(dir);
            tracing::debug!("GOVBRIEF_CACHE_DIR env override applied");
        }
        if let Some(ms) = std::env::var("GOVBRIEF_BATCH_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.analysis.batch_timeout_ms = ms;
        }
        if let Some(ms) = std::env::var("GOVBRIEF_HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.limits.http_timeout_ms = ms;
        }
        if let Ok(model) = std::env::var("GOVBRIEF_ANALYSIS_MODEL") {
            self.analysis.model = model;
        }
        if let Ok(base) = std::env::var("GOVBRIEF_ANALYSIS_BASE_URL") {
            self.analysis.base_url = base;
        }
        if let Ok(template) = std::env::var("GOVBRIEF_SOURCE_URL_TEMPLATE") {
            self.source.proposal_url_template = template;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let l = &self.limits;
        if l.max_binary_bytes == 0 || l.generic_fetch_bytes == 0 {
            anyhow::bail!("byte limits must be greater than zero");
        }
        if l.document_text_chars == 0 || l.generic_text_chars == 0 {
            anyhow::bail!("text truncation limits must be greater than zero");
        }
        if l.http_timeout_ms == 0 {
            anyhow::bail!("limits.http_timeout_ms must be greater than zero");
        }
        if self.analysis.batch_timeout_ms == 0 {
            anyhow::bail!("analysis.batch_timeout_ms must be greater than zero");
        }
        for range in &self.fetch.blocked_ranges {
            range
                .parse::<crate::fetch::IpRange>()
                .map_err(|e| anyhow::anyhow!("invalid blocked range '{}': {}", range, e))?;
        }
        if !self.source.proposal_url_template.contains("{ref_id}") {
            tracing::warn!(
                "source.proposal_url_template '{}' has no {{ref_id}} placeholder",
                self.source.proposal_url_template
            );
        }
        Ok(())
    }
}
