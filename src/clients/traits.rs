use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::GovbriefError;

/// A function-calling tool offered to the provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: serde_json::Value,
}

/// Per-call knobs; `None` means the client's own default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RespondOptions {
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response
    #[serde(default)]
    pub json_mode: bool,
}

impl RespondOptions {
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("provider timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl From<ClientError> for GovbriefError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout { timeout_ms } => GovbriefError::Timeout {
                operation: "analysis provider call".to_string(),
                timeout_ms,
            },
            other => GovbriefError::Provider {
                message: other.to_string(),
            },
        }
    }
}

/// An AI provider the analysis tasks talk to. The orchestrator does not care
/// which provider answers.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn respond(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        options: &RespondOptions,
    ) -> Result<String, ClientError>;
}
