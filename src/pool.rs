//! Bounded worker pool used by both pipeline phases.
//!
//! Every item runs on its own tokio task, and a semaphore keeps at most `width` of
//! them alive at once. Every input item produces exactly one [`PoolOutcome`]: a
//! worker error is just another value of `T`, and a worker that panics comes back
//! as [`PoolOutcome::Failed`], so one item can never abort its siblings. Once the
//! cancellation token fires, items that have not started yet come back as
//! [`PoolOutcome::Skipped`]; items already running are left to finish.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Result of dispatching one item
#[derive(Debug)]
pub enum PoolOutcome<I, T> {
    /// The worker ran to completion
    Completed(T),
    /// Cancellation was signalled before the item started
    Skipped(I),
    /// The worker task died (panicked or was aborted) before producing a value
    Failed {
        /// Item the task was working on
        item: I,
        /// Why the task ended
        reason: String,
    },
}

/// Fixed-width pool of concurrent workers
#[derive(Clone, Debug)]
pub struct WorkerPool {
    width: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool running at most `width` items at once (minimum 1)
    pub fn new(width: usize, cancel: CancellationToken) -> Self {
        Self {
            width: width.max(1),
            cancel,
        }
    }

    /// Pool width
    pub fn width(&self) -> usize {
        self.width
    }

    /// Token observed before each item starts
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `worker` over `items`; outcomes come back in input order
    ///
    /// Each item is spawned as a separate task once a slot is free, so workers make
    /// progress in parallel on a multi-threaded runtime.
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, worker: F) -> Vec<PoolOutcome<I, T>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let slots = Arc::new(Semaphore::new(self.width));
        let mut dispatched: Vec<(I, Option<JoinHandle<T>>)> = Vec::with_capacity(items.len());

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&slots).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                dispatched.push((item, None));
                continue;
            };
            if self.cancel.is_cancelled() {
                dispatched.push((item, None));
                continue;
            }

            let task = worker(item.clone());
            let handle = tokio::spawn(async move {
                let _permit = permit;
                task.await
            });
            dispatched.push((item, Some(handle)));
        }

        let mut outcomes = Vec::with_capacity(dispatched.len());
        for (item, handle) in dispatched {
            let outcome = match handle {
                None => PoolOutcome::Skipped(item),
                Some(handle) => match handle.await {
                    Ok(value) => PoolOutcome::Completed(value),
                    Err(e) => {
                        tracing::error!(error = %e, "Worker task failed");
                        PoolOutcome::Failed {
                            item,
                            reason: e.to_string(),
                        }
                    }
                },
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}
