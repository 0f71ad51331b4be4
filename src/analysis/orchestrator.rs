use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::group::{TaskGroup, UnitOutcome};
use crate::analysis::prompts::{POSITIVE, RECOMMENDATIONS, STEEL_MAN};
use crate::analysis::result::{AnalysisResult, BatchTimedOut, ResultBundle};
use crate::analysis::task::{self, Enrichment, TaskSpec};
use crate::cache::CacheKey;
use crate::clients::AnalysisClient;
use crate::config::AnalysisConfig;
use crate::notify::CompletionNotifier;

/// Runs the independent analyses concurrently under one deadline, then the
/// dependent recommendations stage when its inputs are present.
pub struct Orchestrator {
    client: Arc<dyn AnalysisClient>,
    tasks: Vec<TaskSpec>,
    batch_timeout: Duration,
    max_content_chars: usize,
    enrichment: Enrichment,
    recommendations: bool,
    notifier: Option<Arc<dyn CompletionNotifier>>,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn AnalysisClient>, config: &AnalysisConfig) -> Self {
        Self {
            client,
            tasks: task::default_tasks(),
            batch_timeout: Duration::from_millis(config.batch_timeout_ms),
            max_content_chars: config.max_prompt_chars,
            enrichment: Enrichment {
                pacing: Duration::from_millis(config.enrichment_pacing_ms),
                max_items: config.max_enrichment_items,
                max_content_chars: config.max_prompt_chars,
            },
            recommendations: true,
            notifier: None,
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<TaskSpec>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_enrichment(mut self, enrichment: Enrichment) -> Self {
        self.enrichment = enrichment;
        self
    }

    /// Run the independent stage only
    pub fn without_recommendations(mut self) -> Self {
        self.recommendations = false;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn expected_results(&self) -> usize {
        self.tasks.len() + usize::from(self.recommendations)
    }

    /// Analyse cached proposal content. Task failures are recorded in the
    /// bundle; only the batch deadline fails the call, and the error still
    /// carries the partial bundle.
    pub async fn run(&self, key: &CacheKey, content: &str) -> Result<ResultBundle, BatchTimedOut> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let deadline = started + self.batch_timeout;
        let cancel = CancellationToken::new();
        let content: Arc<str> = Arc::from(content);
        let mut bundle = ResultBundle::new(run_id, key);
        info!(
            "Analysis run {} for {}: {} tasks, deadline {}ms",
            run_id,
            key,
            self.tasks.len(),
            self.batch_timeout.as_millis()
        );

        let mut group = TaskGroup::new(cancel.child_token());
        for spec in &self.tasks {
            group.spawn(
                spec.name.clone(),
                task::run_independent(
                    Arc::clone(&self.client),
                    spec.clone(),
                    Arc::clone(&content),
                    self.max_content_chars,
                ),
            );
        }
        let outcome = group.wait_until(deadline).await;
        let mut reported = record_outcome(&mut bundle, outcome.outcomes);
        if outcome.timed_out {
            mark_missing(&mut bundle, &outcome.missing, started);
            if self.recommendations {
                bundle.record(AnalysisResult::skipped(RECOMMENDATIONS, "batch deadline expired"));
            }
            return Err(self.timed_out(bundle, reported).await);
        }
        for name in &outcome.missing {
            bundle.record(AnalysisResult::failed(name, "task ended without reporting", 0));
        }

        if self.recommendations {
            let inputs = (
                bundle.payload(POSITIVE).cloned(),
                bundle.payload(STEEL_MAN).cloned(),
            );
            match inputs {
                (Some(positive), Some(steel_man)) => {
                    let mut group = TaskGroup::new(cancel.child_token());
                    let stage_cancel = group.cancel_token();
                    group.spawn(
                        RECOMMENDATIONS,
                        task::run_recommendations(
                            Arc::clone(&self.client),
                            positive,
                            steel_man,
                            Arc::clone(&content),
                            self.enrichment.clone(),
                            stage_cancel,
                        ),
                    );
                    let outcome = group.wait_until(deadline).await;
                    reported += record_outcome(&mut bundle, outcome.outcomes);
                    if outcome.timed_out {
                        mark_missing(&mut bundle, &outcome.missing, started);
                        return Err(self.timed_out(bundle, reported).await);
                    }
                }
                _ => {
                    info!(
                        "Run {}: skipping {}, needs {} and {}",
                        run_id, RECOMMENDATIONS, POSITIVE, STEEL_MAN
                    );
                    bundle.record(AnalysisResult::skipped(
                        RECOMMENDATIONS,
                        format!("requires successful {POSITIVE} and {STEEL_MAN} results"),
                    ));
                }
            }
        }

        bundle.finish();
        info!(
            "Analysis run {} finished in {}ms: {} succeeded, {} absent",
            run_id,
            started.elapsed().as_millis(),
            bundle.succeeded(),
            bundle.absent()
        );
        if let Some(notifier) = &self.notifier {
            notifier.analysis_finished(&bundle).await;
        }
        Ok(bundle)
    }

    async fn timed_out(&self, mut bundle: ResultBundle, completed: usize) -> BatchTimedOut {
        bundle.timed_out = true;
        bundle.finish();
        let expected = self.expected_results();
        warn!(
            "Analysis run {} hit its {}ms deadline with {}/{} results",
            bundle.run_id,
            self.batch_timeout.as_millis(),
            completed,
            expected
        );
        if let Some(notifier) = &self.notifier {
            notifier.analysis_finished(&bundle).await;
        }
        BatchTimedOut {
            bundle,
            timeout_ms: self.batch_timeout.as_millis() as u64,
            completed,
            expected,
        }
    }
}

/// Returns how many units reported
fn record_outcome(
    bundle: &mut ResultBundle,
    outcomes: Vec<UnitOutcome<serde_json::Value>>,
) -> usize {
    let count = outcomes.len();
    for outcome in outcomes {
        let elapsed_ms = outcome.elapsed.as_millis() as u64;
        match outcome.result {
            Ok(payload) => {
                bundle.record(AnalysisResult::succeeded(&outcome.name, payload, elapsed_ms))
            }
            Err(e) => {
                warn!("Analysis task '{}' failed: {}", outcome.name, e);
                bundle.record(AnalysisResult::failed(&outcome.name, e.to_string(), elapsed_ms));
            }
        }
    }
    count
}

fn mark_missing(bundle: &mut ResultBundle, missing: &[String], started: Instant) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    for name in missing {
        bundle.record(AnalysisResult::timed_out(name, elapsed_ms));
    }
}
