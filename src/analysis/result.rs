use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::CacheKey;
use crate::error::GovbriefError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    /// Still running when the batch deadline fired
    TimedOut,
    /// Never started because its inputs were absent
    Skipped,
}

/// Outcome of one named analysis task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub task: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    /// When this outcome was recorded
    pub generated_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn succeeded(task: &str, payload: Value, elapsed_ms: u64) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::Succeeded,
            payload: Some(payload),
            error: None,
            elapsed_ms,
            generated_at: Utc::now(),
        }
    }

    pub fn failed(task: &str, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::Failed,
            payload: None,
            error: Some(error.into()),
            elapsed_ms,
            generated_at: Utc::now(),
        }
    }

    pub fn timed_out(task: &str, elapsed_ms: u64) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::TimedOut,
            payload: None,
            error: Some("batch deadline expired".to_string()),
            elapsed_ms,
            generated_at: Utc::now(),
        }
    }

    pub fn skipped(task: &str, reason: impl Into<String>) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::Skipped,
            payload: None,
            error: Some(reason.into()),
            elapsed_ms: 0,
            generated_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

/// Every named outcome of one orchestrator run. Absent results are recorded
/// explicitly, never dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBundle {
    pub run_id: Uuid,
    pub network: String,
    pub ref_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: BTreeMap<String, AnalysisResult>,
    pub timed_out: bool,
}

impl ResultBundle {
    pub fn new(run_id: Uuid, key: &CacheKey) -> Self {
        Self {
            run_id,
            network: key.network.clone(),
            ref_id: key.ref_id.clone(),
            started_at: Utc::now(),
            finished_at: None,
            results: BTreeMap::new(),
            timed_out: false,
        }
    }

    pub fn record(&mut self, result: AnalysisResult) {
        self.results.insert(result.task.clone(), result);
    }

    pub fn get(&self, task: &str) -> Option<&AnalysisResult> {
        self.results.get(task)
    }

    /// Payload of a successful task
    pub fn payload(&self, task: &str) -> Option<&Value> {
        self.results
            .get(task)
            .filter(|r| r.is_success())
            .and_then(|r| r.payload.as_ref())
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    pub fn absent(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn is_partial(&self) -> bool {
        self.timed_out || self.absent() > 0
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// The batch deadline expired; carries whatever was collected
#[derive(Debug, Error)]
#[error("analysis batch timed out after {timeout_ms}ms ({completed}/{expected} results)")]
pub struct BatchTimedOut {
    pub bundle: ResultBundle,
    pub timeout_ms: u64,
    pub completed: usize,
    pub expected: usize,
}

impl From<BatchTimedOut> for GovbriefError {
    fn from(err: BatchTimedOut) -> Self {
        GovbriefError::AnalysisBatchTimeout {
            timeout_ms: err.timeout_ms,
            completed: err.completed,
            expected: err.expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_only_for_successes() {
        let mut bundle = ResultBundle::new(Uuid::new_v4(), &CacheKey::new("polkadot", "9"));
        bundle.record(AnalysisResult::succeeded("risk", json!({"score": 3}), 10));
        bundle.record(AnalysisResult::failed("timeline", "boom", 5));

        assert_eq!(bundle.payload("risk"), Some(&json!({"score": 3})));
        assert!(bundle.payload("timeline").is_none());
        assert!(bundle.payload("missing").is_none());
        assert_eq!(bundle.succeeded(), 1);
        assert_eq!(bundle.absent(), 1);
        assert!(bundle.is_partial());
    }

    #[test]
    fn every_outcome_is_stamped() {
        let before = Utc::now();
        let results = [
            AnalysisResult::succeeded("risk", json!({}), 1),
            AnalysisResult::failed("timeline", "boom", 1),
            AnalysisResult::timed_out("financial", 1),
            AnalysisResult::skipped("recommendations", "inputs absent"),
        ];
        for r in &results {
            assert!(r.generated_at >= before, "{} not stamped", r.task);
        }
        let json = serde_json::to_value(&results[0]).unwrap();
        assert!(json["generated_at"].is_string());
    }

    #[test]
    fn timeout_converts_to_domain_error() {
        let bundle = ResultBundle::new(Uuid::new_v4(), &CacheKey::new("kusama", "1"));
        let err: GovbriefError = BatchTimedOut {
            bundle,
            timeout_ms: 50,
            completed: 2,
            expected: 6,
        }
        .into();
        assert_eq!(err.code(), "analysis_batch_timeout");
        assert_eq!(err.presenter_state(), "partial-analysis");
    }
}
