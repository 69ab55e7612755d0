//! Step-wise batch execution
//!
//! A batch is driven one step at a time. Each step does a bounded amount of work and
//! reports its progress; the job's state lives in a serializable sandbox so a run can be
//! checkpointed between steps and resumed by another process.

pub mod checkpoint;
pub mod rebuild;
pub mod regenerate;

pub use checkpoint::{BatchCheckpoint, CheckpointFile};
pub use rebuild::{RebuildBatch, RebuildOptions, RebuildState, ResyncState};
pub use regenerate::{RegenerateBatch, RegeneratePhase, RegenerateState, Regenerator, SitemapCursor};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// What one step accomplished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Fraction complete, in `0.0..=1.0`
    pub progress: f64,
    pub finished: bool,
    pub message: String,
}

impl StepReport {
    pub fn working(progress: f64, message: impl Into<String>) -> Self {
        Self {
            progress: progress.clamp(0.0, 1.0),
            finished: false,
            message: message.into(),
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            progress: 1.0,
            finished: true,
            message: message.into(),
        }
    }
}

/// How a batch ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub success: bool,
    pub steps: usize,
    pub summary: String,
}

/// A resumable unit of batch work
#[async_trait]
pub trait BatchJob: Send {
    fn name(&self) -> &'static str;

    /// Do one bounded piece of work
    async fn step(&mut self) -> Result<StepReport>;

    /// Called once after the last step, or after a failed one. Returns a summary.
    async fn finish(&mut self, success: bool) -> Result<String>;

    /// Current sandbox state
    fn checkpoint(&self) -> BatchCheckpoint;
}

/// Receives batch progress
pub trait BatchObserver: Send {
    fn on_step(&mut self, _report: &StepReport) {}

    fn on_finish(&mut self, _outcome: &BatchOutcome) {}
}

/// Observer that only logs
#[derive(Debug, Default)]
pub struct LogObserver;

impl BatchObserver for LogObserver {
    fn on_step(&mut self, report: &StepReport) {
        debug!(progress = report.progress, "{}", report.message);
    }
}

/// Drive `job` to completion.
///
/// The first failing step stops the run; `finish` is then called with `success = false`.
/// Nothing already written is rolled back.
pub async fn run_batch(job: &mut dyn BatchJob, observer: &mut dyn BatchObserver) -> BatchOutcome {
    run_batch_with_checkpoint(job, observer, None).await
}

/// Like [`run_batch`], persisting the sandbox after every step.
///
/// The checkpoint is removed when the run succeeds and kept when it fails, so the run
/// can be resumed from the last completed step.
pub async fn run_batch_with_checkpoint(
    job: &mut dyn BatchJob,
    observer: &mut dyn BatchObserver,
    checkpoint: Option<&CheckpointFile>,
) -> BatchOutcome {
    info!("Starting {} batch", job.name());
    let mut steps = 0;
    let mut failure: Option<String> = None;

    loop {
        match job.step().await {
            Ok(report) => {
                steps += 1;
                observer.on_step(&report);
                if report.finished {
                    break;
                }
                if let Some(file) = checkpoint {
                    if let Err(e) = file.save(&job.checkpoint()) {
                        warn!("Failed to write batch checkpoint: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("{} batch failed at step {}: {}", job.name(), steps + 1, e);
                failure = Some(e.to_string());
                break;
            }
        }
    }

    let success = failure.is_none();
    let summary = match job.finish(success).await {
        Ok(summary) => match &failure {
            Some(err) => format!("{} ({})", summary, err),
            None => summary,
        },
        Err(e) => {
            error!("Failed to finish {} batch: {}", job.name(), e);
            failure.clone().unwrap_or_else(|| e.to_string())
        }
    };

    if success {
        if let Some(file) = checkpoint {
            if let Err(e) = file.clear() {
                warn!("Failed to remove batch checkpoint: {}", e);
            }
        }
    }

    let outcome = BatchOutcome {
        success,
        steps,
        summary,
    };
    observer.on_finish(&outcome);
    info!(
        success = outcome.success,
        steps = outcome.steps,
        "{} batch finished: {}",
        job.name(),
        outcome.summary
    );
    outcome
}
