use std::time::Instant;

use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::corpus::{CorpusMerger, CorpusSource};
use crate::dataset::Dataset;
use crate::domain::ReferenceId;
use crate::error::RasffError;
use crate::fetcher::{ShardTarget, WorkerReport, fetch_records};
use crate::listing::list_references;
use crate::portal::PortalClient;
use crate::progress::{FetchObserver, ProgressEvent, ProgressSink, elapsed_ms};
use crate::store::{ReferenceList, Store};

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Re-fetch only the references recorded in the error files of the previous run.
    pub retry_failed: bool,
    /// Overrides the configured worker count.
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationFailure {
    pub offset: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub known: usize,
    pub discovered: usize,
    pub total: usize,
    pub pages: usize,
    pub references_path: String,
    pub elapsed_ms: u64,
    pub pagination_error: Option<PaginationFailure>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Full,
    Retry,
}

#[derive(Debug, Serialize)]
pub struct FetchResult {
    pub mode: FetchMode,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub workers: Vec<WorkerReport>,
    pub elapsed_ms: u64,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusResult {
    pub path: String,
    pub source: String,
    pub shards: Option<usize>,
    pub stale_shards: Vec<String>,
    pub bytes: usize,
    pub elapsed_ms: u64,
}

/// Pipeline entry points over one data directory and one portal client.
pub struct App<C: PortalClient> {
    store: Store,
    client: C,
    config: ResolvedConfig,
    corpus: CorpusMerger,
}

impl<C: PortalClient> App<C> {
    pub fn new(config: ResolvedConfig, client: C) -> Self {
        let store = Store::new(config.data_dir.clone());
        Self {
            corpus: CorpusMerger::new(store.clone()),
            store,
            client,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Pages through the portal listing and merges the discovered references into the
    /// persisted list. A listing failure keeps what was collected before it.
    pub fn refresh_references(&self, sink: &dyn ProgressSink) -> Result<RefreshResult, RasffError> {
        let started = Instant::now();
        self.store.ensure_root()?;
        let known = self.store.load_references()?.into_vec();
        sink.event(ProgressEvent::message(format!(
            "listing portal; {} references cached",
            known.len()
        )));

        let outcome = list_references(
            &self.client,
            &known,
            self.config.portal.first_row,
            self.config.portal.page_size,
            sink,
        );
        let total = self.store.save_references(&outcome.references)?;
        let pagination_error = match outcome.error {
            Some(RasffError::Pagination { offset, reason }) => {
                Some(PaginationFailure { offset, reason })
            }
            Some(other) => Some(PaginationFailure {
                offset: 0,
                reason: other.to_string(),
            }),
            None => None,
        };

        let elapsed = started.elapsed();
        sink.event(ProgressEvent {
            message: format!("listing saved {total} references"),
            elapsed: Some(elapsed),
        });
        Ok(RefreshResult {
            known: known.len(),
            discovered: outcome.discovered,
            total,
            pages: outcome.pages,
            references_path: self.store.references_path().to_string(),
            elapsed_ms: elapsed_ms(elapsed),
            pagination_error,
        })
    }

    /// Downloads every cached reference (or only the previous failures) into shards and
    /// writes `fetch_summary.json`.
    pub fn fetch_records(
        &self,
        options: FetchOptions,
        observer: &mut dyn FetchObserver,
    ) -> Result<FetchResult, RasffError> {
        let started = Instant::now();
        let workers = options.workers.unwrap_or(self.config.workers);
        if workers == 0 {
            return Err(RasffError::InvalidWorkerCount);
        }

        let (mode, references, shard_offset) = if options.retry_failed {
            let failed = self.store.load_failed_references()?;
            let offset = self.store.last_shard_index()?;
            (FetchMode::Retry, failed, offset)
        } else {
            let references = match self.store.load_references()? {
                ReferenceList::Loaded(references) => references,
                ReferenceList::Empty | ReferenceList::Missing => {
                    return Err(RasffError::NoReferences);
                }
            };
            self.store.clear_shards()?;
            (FetchMode::Full, references, 0)
        };

        let reports = if references.is_empty() {
            tracing::info!("no failed references to retry");
            Vec::new()
        } else {
            let workers = workers.min(references.len());
            fetch_records(
                &self.client,
                &references,
                workers,
                ShardTarget::after(&self.store, shard_offset),
                observer,
            )?
        };
        if matches!(mode, FetchMode::Retry) {
            // Old error files go only after the retry has written its own.
            self.store.clear_error_files(shard_offset)?;
        }

        let succeeded = reports.iter().map(|report| report.succeeded).sum();
        let failed = reports.iter().map(|report| report.failures.len()).sum();
        let result = FetchResult {
            mode,
            requested: references.len(),
            succeeded,
            failed,
            workers: reports,
            elapsed_ms: elapsed_ms(started.elapsed()),
            finished_at: chrono::Utc::now().to_rfc3339(),
        };
        self.store.write_summary(&result)?;
        tracing::info!(
            requested = result.requested,
            succeeded,
            failed,
            "fetch finished"
        );
        Ok(result)
    }

    /// Merges the shards into the corpus, or reuses the existing corpus unless `force`.
    pub fn build_corpus(
        &self,
        force: bool,
        sink: &dyn ProgressSink,
    ) -> Result<CorpusResult, RasffError> {
        let started = Instant::now();
        sink.event(ProgressEvent::message("merging shards"));
        let corpus = if force {
            self.corpus.rebuild()?
        } else {
            self.corpus.build()?
        };
        let (source, shards) = match corpus.source() {
            CorpusSource::Built { shards } => ("built", Some(shards)),
            CorpusSource::Cached => ("cached", None),
        };
        let stale_shards = corpus
            .staleness()
            .map(|stale| stale.newer_shards.iter().map(ToString::to_string).collect())
            .unwrap_or_default();

        let elapsed = started.elapsed();
        sink.event(ProgressEvent {
            message: format!("corpus {source} at {}", corpus.path()),
            elapsed: Some(elapsed),
        });
        Ok(CorpusResult {
            path: corpus.path().to_string(),
            source: source.to_string(),
            shards,
            stale_shards,
            bytes: corpus.content().len(),
            elapsed_ms: elapsed_ms(elapsed),
        })
    }

    /// Builds (or reuses) the corpus and parses it into the query tables.
    pub fn load_dataset(&self, sink: &dyn ProgressSink) -> Result<Dataset, RasffError> {
        let started = Instant::now();
        let corpus = self.corpus.build()?;
        sink.event(ProgressEvent::message(format!("parsing {}", corpus.path())));
        let dataset = Dataset::from_corpus(&corpus, &self.config.parse)?;
        sink.event(ProgressEvent {
            message: format!(
                "dataset ready: {} alerts, {} hazards, {} origins",
                dataset.alerts().len(),
                dataset.hazards().len(),
                dataset.origins().len()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(dataset)
    }

    /// References currently cached on disk.
    pub fn references(&self) -> Result<Vec<ReferenceId>, RasffError> {
        Ok(self.store.load_references()?.into_vec())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigLoader};
    use crate::progress::NullObserver;
    use crate::output::JsonOutput;
    use assert_matches::assert_matches;

    struct Unreachable;

    impl PortalClient for Unreachable {
        fn fetch_listing(&self, _offset: usize) -> Result<String, RasffError> {
            Err(RasffError::PortalHttp("offline".to_string()))
        }

        fn fetch_notification(&self, _reference: &ReferenceId) -> Result<String, RasffError> {
            Err(RasffError::PortalHttp("offline".to_string()))
        }
    }

    fn app_in(dir: &std::path::Path) -> App<Unreachable> {
        let config = Config {
            data_dir: Some(dir.join("data").to_string_lossy().into_owned()),
            ..Config::default()
        };
        App::new(ConfigLoader::resolve_config(config).unwrap(), Unreachable)
    }

    #[test]
    fn fetch_without_references_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let app = app_in(temp.path());
        let err = app
            .fetch_records(FetchOptions::default(), &mut NullObserver)
            .unwrap_err();
        assert_matches!(err, RasffError::NoReferences);
    }

    #[test]
    fn refresh_keeps_cached_references_when_listing_fails() {
        let temp = tempfile::tempdir().unwrap();
        let app = app_in(temp.path());
        let cached: Vec<ReferenceId> = vec!["2019.0001".parse().unwrap()];
        app.store().save_references(&cached).unwrap();

        let result = app.refresh_references(&JsonOutput).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.discovered, 0);
        assert_eq!(result.pagination_error.map(|err| err.offset), Some(1));
    }
}
