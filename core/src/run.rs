//! Wires expander output, checkpoint, queue, pool and sink into one resumable stage.

use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::error::SweepError;
use crate::pool::{run_workers, Completion, Probe};
use crate::progress::{format_eta, ProgressTracker, Snapshot};
use crate::queue::WorkQueue;
use crate::sink::{Recorded, ResultSink};
use crate::{Target, TargetKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct StageSettings {
    /// Label used in log lines.
    pub name: String,
    pub kind: TargetKind,
    pub workers: usize,
    pub checkpoint_path: PathBuf,
    pub output_path: PathBuf,
    /// Persist the checkpoint after this many completions.
    pub checkpoint_every: u64,
    pub progress_interval: Duration,
}

/// Everything a stage run needs, passed explicitly.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub settings: StageSettings,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(settings: StageSettings) -> Self {
        RunContext { settings, cancel: CancellationToken::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The queue was exhausted.
    Completed,
    /// Interrupted; the checkpoint is saved and a rerun resumes.
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub completed: u64,
    pub total: u64,
    pub processed: u64,
    pub found_this_run: u64,
    pub found_total: u64,
}

/// Run one stage to exhaustion or cancellation. `total` is the cardinality of `targets`.
pub async fn run_stage<I>(
    ctx: &RunContext,
    targets: I,
    total: u64,
    probe: Arc<dyn Probe>,
) -> Result<RunSummary, SweepError>
where
    I: Iterator<Item = Target> + Clone,
{
    let s = &ctx.settings;
    let store = CheckpointStore::new(&s.checkpoint_path);
    let state = store.load();
    let mut sink = ResultSink::open(s.kind, store, state, &s.output_path, s.checkpoint_every)?;

    let queue = WorkQueue::new(targets, total, sink.processed_snapshot());
    sink.begin(total, queue.already_done());
    if queue.already_done() > 0 {
        info!(stage = %s.name, done = queue.already_done(), remaining = queue.remaining(), total, "resuming");
    } else {
        info!(stage = %s.name, total, workers = s.workers, "starting");
    }

    let found_before = sink.state().results.len() as u64;
    let progress = ProgressTracker::new(total, queue.already_done(), found_before, s.progress_interval);
    let (tx, rx) = mpsc::channel::<Completion>(s.workers.max(1) * 2);
    let stage = s.name.clone();
    let writer = tokio::task::spawn_blocking(move || drain(sink, progress, rx, &stage));

    let dispatch = run_workers(queue, probe, s.workers, tx, ctx.cancel.clone()).await;
    let (state, found_this_run) = writer.await.map_err(|e| SweepError::SinkTask(e.to_string()))??;

    let status = if dispatch.interrupted && state.completed_count < total {
        RunStatus::Paused
    } else {
        RunStatus::Completed
    };
    if status == RunStatus::Completed && state.completed_count < total {
        warn!(stage = %s.name, missing = total - state.completed_count, "some targets were not recorded; rerun to retry them");
    }

    Ok(RunSummary {
        status,
        completed: state.completed_count,
        total,
        processed: state.processed.len() as u64,
        found_this_run,
        found_total: state.results.len() as u64,
    })
}

/// Sink loop: the only place the output file and checkpoint are touched.
fn drain(
    mut sink: ResultSink,
    mut progress: ProgressTracker,
    mut rx: mpsc::Receiver<Completion>,
    stage: &str,
) -> Result<(CheckpointState, u64), SweepError> {
    while let Some(c) = rx.blocking_recv() {
        let row = match sink.record(&c.target, &c.outcome) {
            Ok(recorded) => recorded == Recorded::Row,
            Err(e) => {
                error!(stage, target = %c.target, error = %e, "recording result failed");
                false
            }
        };
        if let Some(snap) = progress.advance(row) {
            log_progress(stage, &snap);
        }
    }
    let found = sink.found_this_run();
    let state = sink.finish()?;
    Ok((state, found))
}

fn log_progress(stage: &str, snap: &Snapshot) {
    info!(
        stage,
        completed = snap.completed,
        total = snap.total,
        percent = format_args!("{:.2}", snap.percent()),
        found = snap.found,
        rate = format_args!("{:.1}/s", snap.rate()),
        eta = %format_eta(snap.eta()),
        "progress"
    );
}
