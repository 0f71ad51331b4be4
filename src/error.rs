//! Domain-specific error types for govbrief

use serde_json::json;
use thiserror::Error;

/// Main error type for the proposal cache and analysis pipeline
#[derive(Error, Debug)]
pub enum GovbriefError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsafe URL refused: {url} ({reason})")]
    UnsafeUrl { url: String, reason: String },

    #[error("Fetch failed for {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("Size limit exceeded for {url}: body larger than {limit} bytes")]
    SizeLimitExceeded { url: String, limit: usize },

    #[error("Extraction failed: {message}")]
    ExtractionFailed { message: String },

    #[error("Cache corrupt at {path}: {message}")]
    CacheCorrupt { path: String, message: String },

    #[error("No cached entry for {network}/{ref_id}")]
    CacheAbsent { network: String, ref_id: String },

    #[error("Content source error: {message}")]
    ContentSource { message: String },

    #[error("Analysis task '{task}' failed: {message}")]
    AnalysisTaskFailed { task: String, message: String },

    #[error("Analysis batch timed out after {timeout_ms}ms ({completed}/{expected} results)")]
    AnalysisBatchTimeout {
        timeout_ms: u64,
        completed: usize,
        expected: usize,
    },

    #[error("Analysis provider error: {message}")]
    Provider { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GovbriefError {
    /// Stable machine-readable label for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            GovbriefError::Config { .. } => "config",
            GovbriefError::UnsafeUrl { .. } => "unsafe_url",
            GovbriefError::FetchFailed { .. } => "fetch_failed",
            GovbriefError::SizeLimitExceeded { .. } => "size_limit_exceeded",
            GovbriefError::ExtractionFailed { .. } => "extraction_failed",
            GovbriefError::CacheCorrupt { .. } => "cache_corrupt",
            GovbriefError::CacheAbsent { .. } => "cache_absent",
            GovbriefError::ContentSource { .. } => "content_source",
            GovbriefError::AnalysisTaskFailed { .. } => "analysis_task_failed",
            GovbriefError::AnalysisBatchTimeout { .. } => "analysis_batch_timeout",
            GovbriefError::Provider { .. } => "provider",
            GovbriefError::Serialization { .. } => "serialization",
            GovbriefError::Io { .. } => "io",
            GovbriefError::Timeout { .. } => "timeout",
            GovbriefError::Validation { .. } => "validation",
            GovbriefError::Internal { .. } => "internal",
        }
    }

    /// Which user-visible state a presenter should show for this error.
    ///
    /// `no-data` means nothing is cached yet and a refresh is needed,
    /// `refresh-failed` means a refresh was attempted and did not produce an
    /// entry, `partial-analysis` means some analysis results are missing.
    pub fn presenter_state(&self) -> &'static str {
        match self {
            GovbriefError::CacheAbsent { .. } => "no-data",
            GovbriefError::ContentSource { .. }
            | GovbriefError::CacheCorrupt { .. }
            | GovbriefError::Io { .. } => "refresh-failed",
            GovbriefError::AnalysisBatchTimeout { .. }
            | GovbriefError::AnalysisTaskFailed { .. } => "partial-analysis",
            _ => "error",
        }
    }

    /// Structured form for JSON output at the binary edge
    pub fn to_report(&self) -> serde_json::Value {
        json!({
            "code": self.code(),
            "state": self.presenter_state(),
            "message": self.to_string(),
        })
    }
}

impl From<anyhow::Error> for GovbriefError {
    fn from(err: anyhow::Error) -> Self {
        GovbriefError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GovbriefError {
    fn from(err: serde_json::Error) -> Self {
        GovbriefError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for GovbriefError {
    fn from(err: std::io::Error) -> Self {
        GovbriefError::Io {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GovbriefError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        GovbriefError::FetchFailed {
            url,
            message: format!("HTTP request failed: {}", err),
        }
    }
}

/// Result type alias for govbrief operations
pub type Result<T> = std::result::Result<T, GovbriefError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presenter_states_are_distinct() {
        let absent = GovbriefError::CacheAbsent {
            network: "polkadot".into(),
            ref_id: "1".into(),
        };
        let failed = GovbriefError::ContentSource {
            message: "502".into(),
        };
        let partial = GovbriefError::AnalysisBatchTimeout {
            timeout_ms: 10,
            completed: 2,
            expected: 6,
        };
        assert_eq!(absent.presenter_state(), "no-data");
        assert_eq!(failed.presenter_state(), "refresh-failed");
        assert_eq!(partial.presenter_state(), "partial-analysis");
    }

    #[test]
    fn report_carries_code_and_message() {
        let err = GovbriefError::SizeLimitExceeded {
            url: "https://example.com/a".into(),
            limit: 10,
        };
        let report = err.to_report();
        assert_eq!(report["code"], "size_limit_exceeded");
        assert!(report["message"].as_str().unwrap().contains("10 bytes"));
    }
}
