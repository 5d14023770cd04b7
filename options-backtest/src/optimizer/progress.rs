//! Aggregate progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

/// Emitted once per finished combination.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Combinations finished so far, including those restored from a checkpoint.
    pub completed: usize,
    pub total: usize,
    /// Key of the combination that just finished.
    pub key: String,
    /// Its score, `None` if skipped or undefined.
    pub metric: Option<f64>,
    pub best_key: Option<String>,
    pub best_metric: Option<f64>,
}

impl ProgressEvent {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Consumer of progress events: a log line, a progress bar, a test probe.
pub trait ProgressSink: Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Logs roughly every 10% of the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        let interval = (event.total / 10).max(1);
        if event.completed % interval == 0 || event.completed == event.total {
            info!(
                "Progress: {}/{} combinations ({:.0}%), best {} = {}",
                event.completed,
                event.total,
                event.fraction() * 100.0,
                event.best_key.as_deref().unwrap_or("-"),
                event
                    .best_metric
                    .map(|m| format!("{:.4}", m))
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
    }
}

/// Shared stop flag, checked between combinations.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
