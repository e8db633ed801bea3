//! Progress reporting shared by the pipeline stages.
//!
//! Sequential stages (listing, corpus, parsing) push free-form [`ProgressEvent`]s into a
//! [`ProgressSink`]. The fetch stage is concurrent: workers send [`FetchEvent`]s over a
//! channel and a single aggregator folds them into a [`FetchProgress`] snapshot that is
//! handed to a [`FetchObserver`].

use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Sink that only forwards events to `tracing`.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed_ms(elapsed), "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}

/// Message sent by a fetch worker after each reference and once when it is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    Fetched { worker: usize },
    Failed { worker: usize },
    Finished { worker: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerProgress {
    pub worker: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub done: bool,
}

impl WorkerProgress {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn label(&self) -> String {
        format!("Thread {}", self.worker)
    }
}

/// Aggregated view over every worker of one fetch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchProgress {
    workers: Vec<WorkerProgress>,
}

impl FetchProgress {
    /// `totals[i]` is the chunk size of worker `i + 1`.
    pub fn new(totals: &[usize]) -> Self {
        let workers = totals
            .iter()
            .enumerate()
            .map(|(index, total)| WorkerProgress {
                worker: index + 1,
                total: *total,
                ..WorkerProgress::default()
            })
            .collect();
        Self { workers }
    }

    pub fn apply(&mut self, event: &FetchEvent) {
        let worker = match event {
            FetchEvent::Fetched { worker }
            | FetchEvent::Failed { worker }
            | FetchEvent::Finished { worker } => *worker,
        };
        let Some(state) = worker
            .checked_sub(1)
            .and_then(|index| self.workers.get_mut(index))
        else {
            tracing::warn!(worker, "progress event for unknown worker");
            return;
        };
        match event {
            FetchEvent::Fetched { .. } => state.succeeded += 1,
            FetchEvent::Failed { .. } => state.failed += 1,
            FetchEvent::Finished { .. } => state.done = true,
        }
    }

    pub fn workers(&self) -> &[WorkerProgress] {
        &self.workers
    }

    pub fn is_complete(&self) -> bool {
        self.workers.iter().all(|worker| worker.done)
    }

    pub fn total(&self) -> usize {
        self.workers.iter().map(|worker| worker.total).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.workers.iter().map(|worker| worker.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.workers.iter().map(|worker| worker.failed).sum()
    }
}

pub trait FetchObserver {
    fn update(&mut self, progress: &FetchProgress);

    fn finish(&mut self, progress: &FetchProgress) {
        self.update(progress);
    }
}

/// Observer that ignores every update.
pub struct NullObserver;

impl FetchObserver for NullObserver {
    fn update(&mut self, _progress: &FetchProgress) {}
}

/// Logs aggregate fetch progress at most once per `interval`.
pub struct LogObserver {
    interval: Duration,
    last: Option<Instant>,
}

impl LogObserver {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }
}

impl FetchObserver for LogObserver {
    fn update(&mut self, progress: &FetchProgress) {
        let due = self
            .last
            .map(|last| last.elapsed() >= self.interval)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last = Some(Instant::now());
        let done = progress.workers().iter().filter(|w| w.done).count();
        tracing::info!(
            succeeded = progress.succeeded(),
            failed = progress.failed(),
            total = progress.total(),
            workers_done = done,
            "fetch progress"
        );
    }

    fn finish(&mut self, progress: &FetchProgress) {
        self.last = None;
        self.update(progress);
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

pub fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_events_per_worker() {
        let mut progress = FetchProgress::new(&[2, 3]);
        progress.apply(&FetchEvent::Fetched { worker: 1 });
        progress.apply(&FetchEvent::Failed { worker: 2 });
        progress.apply(&FetchEvent::Fetched { worker: 2 });
        progress.apply(&FetchEvent::Finished { worker: 1 });

        assert_eq!(progress.succeeded(), 2);
        assert_eq!(progress.failed(), 1);
        assert_eq!(progress.workers()[1].attempted(), 2);
        assert!(!progress.is_complete());

        progress.apply(&FetchEvent::Finished { worker: 2 });
        assert!(progress.is_complete());
    }

    #[test]
    fn unknown_worker_is_ignored() {
        let mut progress = FetchProgress::new(&[1]);
        progress.apply(&FetchEvent::Fetched { worker: 0 });
        progress.apply(&FetchEvent::Fetched { worker: 5 });
        assert_eq!(progress.succeeded(), 0);
    }

    #[test]
    fn elapsed_ms_saturates() {
        assert_eq!(elapsed_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(elapsed_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn percent_of_empty_chunk_is_complete() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
