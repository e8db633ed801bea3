use std::ops::Range;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::domain::ReferenceId;
use crate::error::RasffError;
use crate::portal::PortalClient;
use crate::progress::{FetchEvent, FetchObserver, FetchProgress};
use crate::store::{Store, join_lines};

const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

/// Splits `len` references into `workers` contiguous chunks of `len / workers`;
/// the last chunk also takes the remainder.
pub fn partition(len: usize, workers: usize) -> Result<Vec<Range<usize>>, RasffError> {
    if workers == 0 {
        return Err(RasffError::InvalidWorkerCount);
    }
    let size = len / workers;
    let chunks = (0..workers)
        .map(|index| {
            let start = index * size;
            let end = if index + 1 == workers { len } else { start + size };
            start..end
        })
        .collect();
    Ok(chunks)
}

#[derive(Debug, Serialize)]
pub struct FailedReference {
    pub reference: ReferenceId,
    pub error: String,
}

/// Output of one worker: the successful bodies and the references that failed.
#[derive(Debug, Default)]
pub struct Shard {
    pub worker: usize,
    pub bodies: Vec<String>,
    pub failures: Vec<FailedReference>,
}

impl Shard {
    pub fn body(&self) -> String {
        join_lines(self.bodies.iter().map(String::as_str))
    }

    pub fn failed_references(&self) -> Vec<&ReferenceId> {
        self.failures.iter().map(|failure| &failure.reference).collect()
    }
}

#[derive(Debug, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub assigned: usize,
    pub succeeded: usize,
    pub failures: Vec<FailedReference>,
    pub shard_path: Utf8PathBuf,
    pub error_path: Option<Utf8PathBuf>,
}

/// Where workers put their output. Worker `n` writes shard number `shard_offset + n`.
#[derive(Debug, Clone, Copy)]
pub struct ShardTarget<'s> {
    pub store: &'s Store,
    pub shard_offset: usize,
}

impl<'s> ShardTarget<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self {
            store,
            shard_offset: 0,
        }
    }

    pub fn after(store: &'s Store, shard_offset: usize) -> Self {
        Self {
            store,
            shard_offset,
        }
    }
}

/// Downloads `references` with `worker_count` threads. Every worker writes its own shard
/// to the target store when it finishes its chunk. Per-reference failures are collected
/// in the reports; only filesystem errors and worker panics fail the whole call.
pub fn fetch_records<C: PortalClient + ?Sized>(
    client: &C,
    references: &[ReferenceId],
    worker_count: usize,
    target: ShardTarget<'_>,
    observer: &mut dyn FetchObserver,
) -> Result<Vec<WorkerReport>, RasffError> {
    let chunks = partition(references.len(), worker_count)?;
    let totals: Vec<usize> = chunks.iter().map(|chunk| chunk.len()).collect();
    let mut progress = FetchProgress::new(&totals);
    tracing::info!(
        references = references.len(),
        workers = worker_count,
        "starting fetch"
    );

    let (tx, rx) = mpsc::channel();
    let results = thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let tx = tx.clone();
                let refs = &references[chunk.clone()];
                scope.spawn(move || run_worker(client, index + 1, refs, target, tx))
            })
            .collect();
        drop(tx);

        let mut last_draw: Option<Instant> = None;
        loop {
            match rx.recv_timeout(REDRAW_INTERVAL) {
                Ok(event) => progress.apply(&event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            let due = last_draw
                .map(|at| at.elapsed() >= REDRAW_INTERVAL)
                .unwrap_or(true);
            if due {
                observer.update(&progress);
                last_draw = Some(Instant::now());
            }
        }
        observer.finish(&progress);

        handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(RasffError::WorkerPanicked(index + 1)))
            })
            .collect::<Vec<_>>()
    });

    results.into_iter().collect()
}

/// Sequentially fetches one chunk. A failed reference is recorded and skipped.
pub fn fetch_chunk<C: PortalClient + ?Sized>(
    client: &C,
    worker: usize,
    references: &[ReferenceId],
    events: &Sender<FetchEvent>,
) -> Shard {
    let mut shard = Shard {
        worker,
        ..Shard::default()
    };
    for reference in references {
        match client.fetch_notification(reference) {
            Ok(body) => {
                shard.bodies.push(body);
                let _ = events.send(FetchEvent::Fetched { worker });
            }
            Err(err) => {
                let err = RasffError::Network {
                    reference: reference.to_string(),
                    message: err.to_string(),
                };
                tracing::debug!(worker, error = %err, "reference failed");
                shard.failures.push(FailedReference {
                    reference: reference.clone(),
                    error: err.to_string(),
                });
                let _ = events.send(FetchEvent::Failed { worker });
            }
        }
    }
    shard
}

fn run_worker<C: PortalClient + ?Sized>(
    client: &C,
    worker: usize,
    references: &[ReferenceId],
    target: ShardTarget<'_>,
    events: Sender<FetchEvent>,
) -> Result<WorkerReport, RasffError> {
    let shard = fetch_chunk(client, worker, references, &events);
    let written = write_shard(target, &shard);
    let _ = events.send(FetchEvent::Finished { worker });
    let (shard_path, error_path) = written?;

    if !shard.failures.is_empty() {
        tracing::warn!(worker, failed = shard.failures.len(), "worker finished with failures");
    }
    Ok(WorkerReport {
        worker,
        assigned: references.len(),
        succeeded: shard.bodies.len(),
        failures: shard.failures,
        shard_path,
        error_path,
    })
}

/// Writes the shard body and, when there were failures, the companion error list.
pub fn write_shard(
    target: ShardTarget<'_>,
    shard: &Shard,
) -> Result<(Utf8PathBuf, Option<Utf8PathBuf>), RasffError> {
    let index = target.shard_offset + shard.worker;
    let shard_path = target.store.shard_path(index);
    Store::write_bytes_atomic(&shard_path, shard.body().as_bytes())?;

    if shard.failures.is_empty() {
        return Ok((shard_path, None));
    }
    let error_path = target.store.error_path(index);
    let content = join_lines(shard.failed_references().into_iter().map(ReferenceId::as_str));
    Store::write_bytes_atomic(&error_path, content.as_bytes())?;
    Ok((shard_path, Some(error_path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_gives_remainder_to_last_chunk() {
        let chunks = partition(10, 3).unwrap();
        assert_eq!(chunks, vec![0..3, 3..6, 6..10]);
    }

    #[test]
    fn partition_with_more_workers_than_references() {
        let chunks = partition(2, 4).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![0, 0, 0, 2]);
    }

    #[test]
    fn partition_rejects_zero_workers() {
        assert!(matches!(partition(5, 0), Err(RasffError::InvalidWorkerCount)));
    }
}
