use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::prompts::{self, SYSTEM_PROMPT};
use crate::clients::{AnalysisClient, RespondOptions, ToolSpec};
use crate::error::{GovbriefError, Result};

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\}|\[.*?\])\s*```").expect("fence regex should compile")
});

/// A named independent analysis
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub instructions: String,
    pub tools: Vec<ToolSpec>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

pub fn default_tasks() -> Vec<TaskSpec> {
    prompts::INDEPENDENT_INSTRUCTIONS
        .iter()
        .map(|(name, instructions)| TaskSpec::new(*name, *instructions))
        .collect()
}

/// Structured payload from a provider answer: the JSON itself, a fenced JSON
/// block inside prose, or the text wrapped as `{"text": ...}`
pub fn parse_payload(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(value @ (Value::Object(_) | Value::Array(_))) =
        serde_json::from_str::<Value>(trimmed)
    {
        return value;
    }
    if let Some(block) = FENCED_JSON.captures(trimmed).and_then(|c| c.get(1))
        && let Ok(value) = serde_json::from_str::<Value>(block.as_str())
    {
        return value;
    }
    json!({ "text": trimmed })
}

fn task_failed(task: &str, err: impl std::fmt::Display) -> GovbriefError {
    GovbriefError::AnalysisTaskFailed {
        task: task.to_string(),
        message: err.to_string(),
    }
}

fn options() -> RespondOptions {
    RespondOptions::default().with_system(SYSTEM_PROMPT).json()
}

pub async fn run_independent(
    client: Arc<dyn AnalysisClient>,
    spec: TaskSpec,
    content: Arc<str>,
    max_content_chars: usize,
) -> Result<Value> {
    let prompt = prompts::task_prompt(&spec.instructions, &content, max_content_chars);
    debug!("Task '{}' prompt is {} chars", spec.name, prompt.len());
    let text = client
        .respond(&prompt, &spec.tools, &options())
        .await
        .map_err(|e| task_failed(&spec.name, e))?;
    Ok(parse_payload(&text))
}

/// Pacing and bounds for per-item enrichment
#[derive(Debug, Clone)]
pub struct Enrichment {
    /// Minimum spacing between enrichment calls; zero disables pacing
    pub pacing: Duration,
    pub max_items: usize,
    pub max_content_chars: usize,
}

/// The dependent stage: recommendations built from the case for and against,
/// then enriched one item at a time
pub async fn run_recommendations(
    client: Arc<dyn AnalysisClient>,
    positive: Value,
    steel_man: Value,
    content: Arc<str>,
    enrichment: Enrichment,
    cancel: CancellationToken,
) -> Result<Value> {
    let prompt = prompts::recommendations_prompt(&positive, &steel_man);
    let text = client
        .respond(&prompt, &[], &options())
        .await
        .map_err(|e| task_failed(prompts::RECOMMENDATIONS, e))?;

    let mut payload = parse_payload(&text);
    let enriched = match recommendation_items(&mut payload) {
        Some(items) => enrich_items(client.as_ref(), items, &content, &enrichment, &cancel).await,
        None => 0,
    };
    info!("Recommendations ready, {} items enriched", enriched);
    Ok(payload)
}

fn recommendation_items(payload: &mut Value) -> Option<&mut Vec<Value>> {
    match payload {
        Value::Array(items) => Some(items),
        Value::Object(map) => match map.get_mut(prompts::RECOMMENDATIONS) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Enrich up to `max_items` items sequentially. The upstream provider
/// enforces request rates, so calls are spaced by the limiter. Stops early on
/// cancellation. Returns how many items were enriched.
async fn enrich_items(
    client: &dyn AnalysisClient,
    items: &mut [Value],
    content: &str,
    enrichment: &Enrichment,
    cancel: &CancellationToken,
) -> usize {
    let limiter = Quota::with_period(enrichment.pacing).map(RateLimiter::direct);
    let mut enriched = 0;

    for (idx, item) in items.iter_mut().take(enrichment.max_items).enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        if let Some(limiter) = &limiter {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = limiter.until_ready() => {}
            }
        }

        let prompt = prompts::enrichment_prompt(item, content, enrichment.max_content_chars);
        let opts = options();
        let response = tokio::select! {
            _ = cancel.cancelled() => break,
            r = client.respond(&prompt, &[], &opts) => r,
        };
        match response {
            Ok(text) => {
                let detail = parse_payload(&text);
                match item {
                    Value::Object(map) => {
                        map.insert("enrichment".to_string(), detail);
                    }
                    other => {
                        *other = json!({ "recommendation": other.take(), "enrichment": detail });
                    }
                }
                enriched += 1;
            }
            Err(e) => warn!("Enrichment of recommendation {} failed: {}", idx + 1, e),
        }
    }

    if cancel.is_cancelled() {
        info!("Enrichment stopped early after {} items", enriched);
    }
    enriched
}
