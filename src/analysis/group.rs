//! Fan-out/fan-in over a known set of named units.
//!
//! Every spawned unit reports exactly once on the group's channel, including
//! when it errors or panics. `wait_until` collects until every unit has
//! reported or the deadline fires; on the deadline it cancels the group's
//! token and returns the names that never reported. Units still in flight
//! are detached and their late reports are dropped with the receiver.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{GovbriefError, Result};

/// One unit's report
#[derive(Debug)]
pub struct UnitOutcome<T> {
    pub name: String,
    pub result: Result<T>,
    pub elapsed: Duration,
}

/// What `wait_until` collected
#[derive(Debug)]
pub struct GroupOutcome<T> {
    pub outcomes: Vec<UnitOutcome<T>>,
    /// Units that had not reported when waiting stopped, in spawn order
    pub missing: Vec<String>,
    pub timed_out: bool,
}

impl<T> GroupOutcome<T> {
    pub fn expected(&self) -> usize {
        self.outcomes.len() + self.missing.len()
    }
}

pub struct TaskGroup<T> {
    tx: mpsc::UnboundedSender<UnitOutcome<T>>,
    rx: mpsc::UnboundedReceiver<UnitOutcome<T>>,
    names: Vec<String>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            names: Vec::new(),
            cancel,
        }
    }

    /// Token cancelled when the group's deadline fires
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, unit: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let name = name.into();
        self.names.push(name.clone());
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = match AssertUnwindSafe(unit).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(GovbriefError::AnalysisTaskFailed {
                    task: name.clone(),
                    message: format!("task panicked: {}", panic_message(panic.as_ref())),
                }),
            };
            let outcome = UnitOutcome {
                name,
                result,
                elapsed: started.elapsed(),
            };
            if let Err(late) = tx.send(outcome) {
                debug!("Discarding late result from '{}'", late.0.name);
            }
        });
    }

    pub async fn wait_until(self, deadline: Instant) -> GroupOutcome<T> {
        let TaskGroup {
            tx,
            mut rx,
            names,
            cancel,
        } = self;
        // only the spawned units hold senders from here on
        drop(tx);

        let expected = names.len();
        let mut outcomes = Vec::with_capacity(expected);
        let mut timed_out = false;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        while outcomes.len() < expected {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Some(outcome) => outcomes.push(outcome),
                    None => {
                        warn!(
                            "Task group channel closed with {} of {} results",
                            outcomes.len(),
                            expected
                        );
                        break;
                    }
                },
                _ = &mut sleep => {
                    timed_out = true;
                    cancel.cancel();
                    break;
                }
            }
        }

        let reported: HashSet<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        let missing = names
            .iter()
            .filter(|n| !reported.contains(n.as_str()))
            .cloned()
            .collect();

        GroupOutcome {
            outcomes,
            missing,
            timed_out,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_unit_reports_once() {
        let mut group = TaskGroup::new(CancellationToken::new());
        for i in 0..5u32 {
            group.spawn(format!("unit-{i}"), async move {
                if i == 2 {
                    Err(GovbriefError::Internal {
                        message: "planned".into(),
                    })
                } else {
                    Ok(i)
                }
            });
        }
        let outcome = group
            .wait_until(Instant::now() + Duration::from_secs(5))
            .await;
        assert!(!outcome.timed_out);
        assert!(outcome.missing.is_empty());
        assert_eq!(outcome.outcomes.len(), 5);
        assert_eq!(outcome.outcomes.iter().filter(|o| o.result.is_err()).count(), 1);
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let mut group: TaskGroup<u32> = TaskGroup::new(CancellationToken::new());
        group.spawn("explodes", async {
            let parts: Vec<u32> = Vec::new();
            Ok(parts[3])
        });
        let outcome = group
            .wait_until(Instant::now() + Duration::from_secs(5))
            .await;
        let err = outcome.outcomes[0].result.as_ref().unwrap_err();
        assert!(err.to_string().contains("index out of bounds"));
    }

    #[tokio::test]
    async fn deadline_reports_missing_and_cancels() {
        let token = CancellationToken::new();
        let mut group = TaskGroup::new(token.clone());
        group.spawn("fast", async { Ok(1u32) });
        group.spawn("slow", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(2u32)
        });
        let started = std::time::Instant::now();
        let outcome = group
            .wait_until(Instant::now() + Duration::from_millis(100))
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.timed_out);
        assert_eq!(outcome.missing, vec!["slow".to_string()]);
        assert_eq!(outcome.expected(), 2);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn empty_group_returns_immediately() {
        let group: TaskGroup<()> = TaskGroup::new(CancellationToken::new());
        let outcome = group.wait_until(Instant::now()).await;
        assert!(!outcome.timed_out);
        assert_eq!(outcome.expected(), 0);
    }
}
