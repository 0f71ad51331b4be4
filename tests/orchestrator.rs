use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use govbrief::analysis::{Enrichment, Orchestrator, ResultBundle, TaskSpec, TaskStatus};
use govbrief::cache::CacheKey;
use govbrief::clients::{AnalysisClient, ClientError, RespondOptions, ToolSpec};
use govbrief::config::AnalysisConfig;
use govbrief::error::GovbriefError;
use govbrief::notify::CompletionNotifier;
use serde_json::json;

/// Answers according to markers in the prompt
#[derive(Default)]
struct ScriptedClient {
    enrichment_calls: Mutex<Vec<Instant>>,
    recommendation_calls: AtomicUsize,
    fail_marker: Option<&'static str>,
}

impl ScriptedClient {
    fn failing_on(marker: &'static str) -> Self {
        Self {
            fail_marker: Some(marker),
            ..Self::default()
        }
    }
}

#[async_trait]
impl AnalysisClient for ScriptedClient {
    async fn respond(
        &self,
        prompt: &str,
        _tools: &[ToolSpec],
        _options: &RespondOptions,
    ) -> Result<String, ClientError> {
        if let Some(marker) = self.fail_marker
            && prompt.contains(marker)
        {
            return Err(ClientError::Status {
                status: 500,
                body: "scripted failure".into(),
            });
        }
        if prompt.contains("TASK:slow") {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if prompt.contains("TASK:panic") {
            let empty: Vec<&str> = Vec::new();
            return Ok(empty[1].to_string());
        }
        if prompt.contains("Expand this recommendation") {
            self.enrichment_calls.lock().unwrap().push(Instant::now());
            return Ok(r#"{"evidence": ["milestone one"], "condition": "monthly report"}"#.into());
        }
        if prompt.contains("Two reviewers") {
            self.recommendation_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(json!({
                "verdict": "aye",
                "recommendations": [{"title": "a"}, {"title": "b"}, {"title": "c"}]
            })
            .to_string());
        }
        Ok(format!("```json\n{{\"len\": {}}}\n```", prompt.len()))
    }
}

fn key() -> CacheKey {
    CacheKey::new("polkadot", "1500")
}

fn numbered_tasks(markers: &[&str]) -> Vec<TaskSpec> {
    markers
        .iter()
        .enumerate()
        .map(|(i, m)| TaskSpec::new(format!("task-{}", i + 1), format!("TASK:{m}")))
        .collect()
}

#[tokio::test]
async fn one_failing_task_leaves_the_rest() {
    let client = Arc::new(ScriptedClient::failing_on("TASK:bad"));
    let orchestrator = Orchestrator::new(client, &AnalysisConfig::default())
        .with_tasks(numbered_tasks(&["ok", "ok", "bad", "ok", "ok", "ok"]))
        .without_recommendations();

    let bundle = orchestrator.run(&key(), "Proposal body").await.unwrap();
    assert_eq!(bundle.results.len(), 6);
    assert_eq!(bundle.succeeded(), 5);
    assert_eq!(bundle.absent(), 1);
    assert!(!bundle.timed_out);
    let failed = bundle.get("task-3").unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.as_deref().unwrap().contains("scripted failure"));
    assert!(bundle.payload("task-1").unwrap()["len"].is_u64());

    let finished = bundle.finished_at.unwrap();
    for result in bundle.results.values() {
        assert!(result.generated_at >= bundle.started_at);
        assert!(result.generated_at <= finished);
    }
}

#[tokio::test]
async fn panicking_task_is_recorded_as_failed() {
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedClient::default()),
        &AnalysisConfig::default(),
    )
        .with_tasks(numbered_tasks(&["ok", "panic"]))
        .without_recommendations();

    let bundle = orchestrator.run(&key(), "Body").await.unwrap();
    assert_eq!(bundle.succeeded(), 1);
    assert_eq!(bundle.get("task-2").unwrap().status, TaskStatus::Failed);
}

#[tokio::test]
async fn deadline_returns_partial_bundle_as_timeout() {
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedClient::default()),
        &AnalysisConfig::default(),
    )
        .with_tasks(numbered_tasks(&["ok", "slow", "slow"]))
        .with_batch_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let timed_out = orchestrator.run(&key(), "Body").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(timed_out.expected, 4);
    assert_eq!(timed_out.completed, 1);
    let bundle = &timed_out.bundle;
    assert!(bundle.timed_out);
    assert_eq!(bundle.get("task-1").unwrap().status, TaskStatus::Succeeded);
    assert_eq!(bundle.get("task-2").unwrap().status, TaskStatus::TimedOut);
    assert_eq!(bundle.get("task-3").unwrap().status, TaskStatus::TimedOut);

    let err: GovbriefError = timed_out.into();
    assert!(matches!(
        err,
        GovbriefError::AnalysisBatchTimeout {
            completed: 1,
            expected: 4,
            ..
        }
    ));
}

#[tokio::test]
async fn recommendations_are_enriched_with_pacing() {
    let client = Arc::new(ScriptedClient::default());
    let orchestrator = Orchestrator::new(
        Arc::clone(&client) as Arc<dyn AnalysisClient>,
        &AnalysisConfig::default(),
    )
        .with_enrichment(Enrichment {
            pacing: Duration::from_millis(150),
            max_items: 2,
            max_content_chars: 10_000,
        });

    let bundle = orchestrator.run(&key(), "Body").await.unwrap();
    assert_eq!(bundle.results.len(), 7);
    assert_eq!(bundle.succeeded(), 7);

    let recs = bundle.payload("recommendations").unwrap();
    let items = recs["recommendations"].as_array().unwrap();
    assert_eq!(items[0]["enrichment"]["condition"], "monthly report");
    assert!(items[1].get("enrichment").is_some());
    assert!(items[2].get("enrichment").is_none());

    let calls = client.enrichment_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].duration_since(calls[0]) >= Duration::from_millis(120));
}

#[tokio::test]
async fn failed_enrichment_leaves_item_unenriched() {
    let client = Arc::new(ScriptedClient::failing_on("Expand this recommendation"));
    let orchestrator = Orchestrator::new(
        Arc::clone(&client) as Arc<dyn AnalysisClient>,
        &AnalysisConfig::default(),
    )
        .with_enrichment(Enrichment {
            pacing: Duration::ZERO,
            max_items: 5,
            max_content_chars: 10_000,
        });

    let bundle = orchestrator.run(&key(), "Body").await.unwrap();
    let recs = bundle.payload("recommendations").unwrap();
    let items = recs["recommendations"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.get("enrichment").is_none()));
}

#[tokio::test]
async fn dependent_stage_skipped_without_inputs() {
    let client = Arc::new(ScriptedClient::failing_on("AGAINST this proposal"));
    let orchestrator = Orchestrator::new(
        Arc::clone(&client) as Arc<dyn AnalysisClient>,
        &AnalysisConfig::default(),
    );

    let bundle = orchestrator.run(&key(), "Body").await.unwrap();
    assert_eq!(bundle.get("steel_man").unwrap().status, TaskStatus::Failed);
    assert_eq!(
        bundle.get("recommendations").unwrap().status,
        TaskStatus::Skipped
    );
    assert_eq!(client.recommendation_calls.load(Ordering::SeqCst), 0);
    assert_eq!(bundle.succeeded(), 5);
}

#[derive(Default)]
struct Recorder {
    bundles: Mutex<Vec<ResultBundle>>,
}

#[async_trait]
impl CompletionNotifier for Recorder {
    async fn analysis_finished(&self, bundle: &ResultBundle) {
        self.bundles.lock().unwrap().push(bundle.clone());
    }
}

#[tokio::test]
async fn notifier_receives_finished_bundle() {
    let recorder = Arc::new(Recorder::default());
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptedClient::default()),
        &AnalysisConfig::default(),
    )
        .with_tasks(numbered_tasks(&["ok"]))
        .without_recommendations()
        .with_notifier(Arc::clone(&recorder) as Arc<dyn CompletionNotifier>);

    let bundle = orchestrator.run(&key(), "Body").await.unwrap();
    let seen = recorder.bundles.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].run_id, bundle.run_id);
    assert!(seen[0].finished_at.is_some());
}
