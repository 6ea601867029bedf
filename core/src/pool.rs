//! Fixed-size worker pool fed by a single dispatcher.

use crate::Target;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of checking one target to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Ports confirmed on the target.
    Found(BTreeSet<u16>),
    /// Host answered but nothing requested was open.
    Closed,
    /// No answer after the retry budget.
    Unreachable,
    /// Port open but the service fingerprint did not match.
    Unconfirmed,
}

impl Outcome {
    pub fn found(ports: impl IntoIterator<Item = u16>) -> Self {
        Outcome::Found(ports.into_iter().collect())
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Found(ports) if !ports.is_empty())
    }
}

/// A single-target check. Implementations own their retry policy and never fail:
/// exhausted retries are reported as a negative outcome.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, target: &Target) -> Outcome;
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub target: Target,
    pub outcome: Outcome,
}

/// How far the dispatcher got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub dispatched: u64,
    pub interrupted: bool,
}

/// Drive `queue` through `workers` concurrent probes, sending every completion to
/// `results`. On cancellation no further targets are handed out; probes already
/// running finish and are reported.
pub async fn run_workers<I>(
    queue: I,
    probe: Arc<dyn Probe>,
    workers: usize,
    results: mpsc::Sender<Completion>,
    cancel: CancellationToken,
) -> Dispatch
where
    I: Iterator<Item = Target>,
{
    let workers = workers.max(1);
    let (jobs_tx, jobs_rx) = mpsc::channel::<Target>(workers);
    let jobs_rx = Arc::new(Mutex::new(jobs_rx));

    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        let jobs = jobs_rx.clone();
        let probe = probe.clone();
        let results = results.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = jobs.lock().await.recv().await;
                let Some(target) = next else { break };
                if cancel.is_cancelled() {
                    break;
                }
                let outcome = probe.check(&target).await;
                if results.send(Completion { target, outcome }).await.is_err() {
                    break;
                }
            }
            debug!(worker = id, "worker done");
        }));
    }
    drop(results);
    drop(jobs_rx);

    let mut dispatch = Dispatch::default();
    for target in queue {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                dispatch.interrupted = true;
                break;
            }
            sent = jobs_tx.send(target) => {
                if sent.is_err() {
                    break;
                }
                dispatch.dispatched += 1;
            }
        }
    }
    drop(jobs_tx);

    for h in handles {
        let _ = h.await;
    }
    dispatch.interrupted |= cancel.is_cancelled();
    dispatch
}
