//! Run coordinator: preflight, fetch phase, upload phase, summary.
//!
//! The two phases run one after the other, each through a [`WorkerPool`] of the
//! configured width. Item-level failures become [`AttemptRecord`]s and never stop
//! sibling items. The one exception is a fatal destination error (permission denied,
//! missing container), which cancels the remaining workers and is returned as
//! [`Error::DestinationUnreachable`].

use crate::config::Config;
use crate::enumerator::{DateRange, enumerate};
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::pool::{PoolOutcome, WorkerPool};
use crate::retry::{RetryError, retry_with_backoff};
use crate::store::{DestinationStore, ObjectStoreDestination};
use crate::types::{AttemptRecord, Event, Phase, RunSummary, StagedArtifact, WorkItem};
use crate::uploader::{UploadOutcome, Uploader};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Reason code for an item whose worker task died without an outcome
const WORKER_FAILED: &str = "worker_failed";

/// Drives one loader run
pub struct Pipeline {
    config: Arc<Config>,
    fetcher: Arc<Fetcher>,
    store: Arc<dyn DestinationStore>,
    uploader: Arc<Uploader>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline, constructing the destination backend from configuration
    pub fn new(config: Config) -> Result<Self> {
        let store = ObjectStoreDestination::from_config(&config.destination).map_err(|e| {
            if e.is_fatal() {
                Error::DestinationUnreachable {
                    container: config.destination.container.clone(),
                    reason: e.to_string(),
                }
            } else {
                Error::Store(e)
            }
        })?;
        Self::with_store(config, Arc::new(store))
    }

    /// Build a pipeline over an already constructed destination store
    pub fn with_store(config: Config, store: Arc<dyn DestinationStore>) -> Result<Self> {
        config.validate()?;

        let fetcher = Fetcher::new(config.source.clone(), &config.staging)?;

        // Buffer generously; a lagging subscriber only loses events, workers never wait.
        let (event_tx, _rx) = broadcast::channel(1000);

        let uploader = Uploader::new(
            Arc::clone(&store),
            config.retry.clone(),
            config.destination.prefix.clone(),
        )
        .with_events(event_tx.clone());

        Ok(Self {
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            store,
            uploader: Arc::new(uploader),
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the run when cancelled
    ///
    /// Items not yet started are reported as cancelled; uploads stop at their next
    /// backoff; transfers already in flight finish their current attempt.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration this pipeline was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Work items described by the configured schedule
    pub fn items(&self) -> Vec<WorkItem> {
        let schedule = &self.config.schedule;
        enumerate(
            &DateRange::new(schedule.start, schedule.end),
            &schedule.categories,
            schedule.format,
        )
    }

    /// Process every item of the configured schedule
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_items(self.items()).await
    }

    /// Process an explicit list of work items
    ///
    /// Items sharing a canonical name are processed once; the first occurrence wins.
    pub async fn run_items(&self, items: Vec<WorkItem>) -> Result<RunSummary> {
        let items = dedupe(items);
        tracing::info!(
            items = items.len(),
            workers = self.config.workers,
            container = self.store.container(),
            "Starting run"
        );

        let order: HashMap<String, usize> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.canonical_name(), i))
            .collect();
        let mut summary = RunSummary::default();

        if !self.preflight().await? {
            for item in items {
                self.record_cancelled(&mut summary, item.canonical_name(), Phase::Fetch, 0);
            }
            return Ok(summary);
        }

        let run_cancel = self.cancel.child_token();
        let pool = WorkerPool::new(self.config.workers, run_cancel.clone());

        let staged = self.fetch_phase(&pool, items, &mut summary).await;
        let fatal = self
            .upload_phase(&pool, &run_cancel, staged, &mut summary)
            .await;

        sort_by_order(&mut summary, &order);

        if let Some(error) = fatal {
            tracing::error!(error = %error, "Run aborted");
            return Err(error);
        }

        tracing::info!(
            delivered = summary.delivered.len(),
            abandoned = summary.abandoned.len(),
            fetch_failed = summary.fetch_failed.len(),
            cancelled = summary.cancelled.len(),
            "Run finished"
        );
        Ok(summary)
    }

    /// Confirm the destination container is reachable
    ///
    /// Transient probe failures are retried with the upload policy. Returns `Ok(false)`
    /// when cancellation arrived before the container was confirmed.
    async fn preflight(&self) -> Result<bool> {
        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        let result = retry_with_backoff(&self.config.retry, &self.cancel, |_| async move {
            self.store.ensure_container().await
        })
        .await;

        match result {
            Ok(((), _)) => {
                tracing::info!(container = self.store.container(), "Destination container reachable");
                Ok(true)
            }
            Err(RetryError::Cancelled { .. }) => Ok(false),
            Err(RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. }) => {
                Err(Error::DestinationUnreachable {
                    container: self.store.container().to_string(),
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn fetch_phase(
        &self,
        pool: &WorkerPool,
        items: Vec<WorkItem>,
        summary: &mut RunSummary,
    ) -> Vec<StagedArtifact> {
        let outcomes = pool
            .run(items, |item| {
                let fetcher = Arc::clone(&self.fetcher);
                async move {
                    let result = fetcher.fetch(&item).await;
                    (item, result)
                }
            })
            .await;

        let mut staged = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                PoolOutcome::Completed((_, Ok(artifact))) => {
                    self.emit_event(Event::Staged {
                        name: artifact.item.canonical_name(),
                        size_bytes: artifact.size_bytes,
                        reused: artifact.reused,
                    });
                    staged.push(artifact);
                }
                PoolOutcome::Completed((item, Err(e))) => {
                    let name = item.canonical_name();
                    tracing::warn!(item = %name, error = %e, "Fetch failed");
                    self.emit_event(Event::FetchFailed {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                    summary.fetch_failed.push(AttemptRecord::failed(
                        name,
                        Phase::Fetch,
                        1,
                        e.cause.code(),
                        e.to_string(),
                    ));
                }
                PoolOutcome::Skipped(item) => {
                    self.record_cancelled(summary, item.canonical_name(), Phase::Fetch, 0);
                }
                PoolOutcome::Failed { item, reason } => {
                    let name = item.canonical_name();
                    self.emit_event(Event::FetchFailed {
                        name: name.clone(),
                        reason: reason.clone(),
                    });
                    summary.fetch_failed.push(AttemptRecord::failed(
                        name,
                        Phase::Fetch,
                        1,
                        WORKER_FAILED,
                        reason,
                    ));
                }
            }
        }
        staged
    }

    /// Upload every staged artifact; returns the first fatal error, if any
    async fn upload_phase(
        &self,
        pool: &WorkerPool,
        run_cancel: &CancellationToken,
        staged: Vec<StagedArtifact>,
        summary: &mut RunSummary,
    ) -> Option<Error> {
        let outcomes = pool
            .run(staged, |artifact| {
                let uploader = Arc::clone(&self.uploader);
                let run_cancel = run_cancel.clone();
                async move {
                    let result = uploader.upload(&artifact, &run_cancel).await;
                    if matches!(&result, Err(e) if e.is_fatal()) {
                        // Nothing else can succeed against this destination.
                        run_cancel.cancel();
                    }
                    (artifact, result)
                }
            })
            .await;

        let mut fatal = None;
        for outcome in outcomes {
            let (artifact, result) = match outcome {
                PoolOutcome::Completed(pair) => pair,
                PoolOutcome::Skipped(artifact) => {
                    self.record_cancelled(
                        summary,
                        artifact.item.canonical_name(),
                        Phase::Upload,
                        0,
                    );
                    continue;
                }
                PoolOutcome::Failed { item, reason } => {
                    let name = item.item.canonical_name();
                    self.emit_event(Event::Abandoned {
                        name: name.clone(),
                        attempts: 1,
                        reason: reason.clone(),
                    });
                    summary.abandoned.push(AttemptRecord::failed(
                        name,
                        Phase::Upload,
                        1,
                        WORKER_FAILED,
                        reason,
                    ));
                    continue;
                }
            };
            let name = artifact.item.canonical_name();

            match result {
                Ok(UploadOutcome::Delivered { attempts, .. }) => {
                    self.emit_event(Event::Delivered {
                        name: name.clone(),
                        attempts,
                    });
                    summary
                        .delivered
                        .push(AttemptRecord::succeeded(name, Phase::Upload, attempts));
                }
                Ok(UploadOutcome::Abandoned {
                    attempts, error, ..
                }) => {
                    self.emit_event(Event::Abandoned {
                        name: name.clone(),
                        attempts,
                        reason: error.to_string(),
                    });
                    summary.abandoned.push(AttemptRecord::failed(
                        name,
                        Phase::Upload,
                        attempts,
                        error.code(),
                        error.to_string(),
                    ));
                }
                Ok(UploadOutcome::Cancelled { attempts, .. }) => {
                    self.record_cancelled(summary, name, Phase::Upload, attempts);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(item = %name, error = %e, "Destination unreachable, cancelling run");
                    self.record_cancelled(summary, name, Phase::Upload, 1);
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    summary.abandoned.push(AttemptRecord::failed(
                        name,
                        Phase::Upload,
                        1,
                        e.code(),
                        e.to_string(),
                    ));
                }
            }
        }
        fatal
    }

    fn record_cancelled(&self, summary: &mut RunSummary, name: String, phase: Phase, attempts: u32) {
        tracing::info!(item = %name, ?phase, "Cancelled");
        self.emit_event(Event::Cancelled {
            name: name.clone(),
            phase,
        });
        summary
            .cancelled
            .push(AttemptRecord::cancelled(name, phase, attempts));
    }

    fn emit_event(&self, event: Event) {
        // send() only fails when nobody is subscribed
        self.event_tx.send(event).ok();
    }
}

/// Keep the first item for each canonical name
fn dedupe(items: Vec<WorkItem>) -> Vec<WorkItem> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| {
            let name = item.canonical_name();
            if seen.insert(name.clone()) {
                true
            } else {
                tracing::warn!(item = %name, "Duplicate work item ignored");
                false
            }
        })
        .collect()
}

/// Restore enumeration order inside each partition (pool outcomes arrive in completion order)
fn sort_by_order(summary: &mut RunSummary, order: &HashMap<String, usize>) {
    let key = |record: &AttemptRecord| order.get(&record.name).copied().unwrap_or(usize::MAX);
    summary.delivered.sort_by_key(key);
    summary.abandoned.sort_by_key(key);
    summary.fetch_failed.sort_by_key(key);
    summary.cancelled.sort_by_key(key);
}
