//! Uploader: transfers a staged artifact and verifies it, retrying the whole cycle.
//!
//! Each attempt re-sends the complete file under the item's canonical key and then
//! asks the [`Verifier`] about that key. An attempt counts as delivered only when the
//! check made right after its own transmit confirms the object, so a verification
//! from an earlier attempt is never reused.
//!
//! ```text
//! Attempting(n) --put ok--> Verifying(n) --present--> Delivered(n)
//!      |                         |
//!      +--put failed-------------+--absent/mismatch--> n < max ? backoff, Attempting(n+1)
//!                                                              : Abandoned(n)
//! ```
//!
//! Permission errors are not retried: they surface as
//! [`Error::DestinationUnreachable`] and end the run.

use crate::config::RetryConfig;
use crate::error::{Error, UploadError};
use crate::retry::{RetryError, retry_with_backoff};
use crate::store::DestinationStore;
use crate::types::{Event, RemoteArtifact, StagedArtifact, WorkItem};
use crate::verifier::{Verification, Verifier};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Terminal state of one upload
#[derive(Debug)]
pub enum UploadOutcome {
    /// Object confirmed at the destination after attempt `attempts`
    Delivered {
        /// Destination identity
        remote: RemoteArtifact,
        /// Attempt whose verification succeeded
        attempts: u32,
        /// Verified size in bytes
        size_bytes: u64,
    },
    /// Every attempt failed
    Abandoned {
        /// Destination identity
        remote: RemoteArtifact,
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        error: UploadError,
    },
    /// Cancellation stopped the retry loop
    Cancelled {
        /// Destination identity
        remote: RemoteArtifact,
        /// Attempts made before stopping
        attempts: u32,
    },
}

impl UploadOutcome {
    /// Attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            UploadOutcome::Delivered { attempts, .. }
            | UploadOutcome::Abandoned { attempts, .. }
            | UploadOutcome::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// True for [`UploadOutcome::Delivered`]
    pub fn is_delivered(&self) -> bool {
        matches!(self, UploadOutcome::Delivered { .. })
    }
}

/// Uploads staged artifacts to the destination store
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn DestinationStore>,
    verifier: Verifier,
    retry: RetryConfig,
    prefix: Option<String>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl Uploader {
    /// Create an uploader over `store` with the given retry policy and key prefix
    pub fn new(store: Arc<dyn DestinationStore>, retry: RetryConfig, prefix: Option<String>) -> Self {
        Self {
            verifier: Verifier::new(Arc::clone(&store)),
            store,
            retry,
            prefix,
            event_tx: None,
        }
    }

    /// Replace the retry policy
    pub fn with_policy(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    /// Publish per-attempt events on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Destination identity for a work item
    pub fn remote_for(&self, item: &WorkItem) -> RemoteArtifact {
        RemoteArtifact::for_item(self.store.container(), self.prefix.as_deref(), item)
    }

    /// Upload and verify `staged`
    ///
    /// Item-level failures are returned as [`UploadOutcome::Abandoned`]; only a fatal
    /// destination error is returned as `Err`.
    pub async fn upload(
        &self,
        staged: &StagedArtifact,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, Error> {
        let remote = self.remote_for(&staged.item);

        if cancel.is_cancelled() {
            return Ok(UploadOutcome::Cancelled {
                remote,
                attempts: 0,
            });
        }

        let remote_ref = &remote;
        let result = retry_with_backoff(&self.retry, cancel, |attempt| async move {
            self.attempt(staged, remote_ref, attempt).await
        })
        .await;

        match result {
            Ok((size_bytes, attempts)) => {
                tracing::info!(remote = %remote, attempts, size_bytes, "Uploaded and verified");
                Ok(UploadOutcome::Delivered {
                    remote,
                    attempts,
                    size_bytes,
                })
            }
            Err(RetryError::Exhausted { error, attempts }) => {
                tracing::error!(remote = %remote, attempts, error = %error, "Giving up after all attempts");
                Ok(UploadOutcome::Abandoned {
                    remote,
                    attempts,
                    error,
                })
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                Ok(UploadOutcome::Cancelled { remote, attempts })
            }
            Err(RetryError::Permanent { error, .. }) => Err(Error::DestinationUnreachable {
                container: remote.container,
                reason: error.to_string(),
            }),
        }
    }

    /// One transmit-then-verify cycle
    async fn attempt(
        &self,
        staged: &StagedArtifact,
        remote: &RemoteArtifact,
        attempt: u32,
    ) -> Result<u64, UploadError> {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(Event::UploadAttempt {
                name: staged.item.canonical_name(),
                attempt,
            });
        }
        tracing::info!(
            path = %staged.path.display(),
            remote = %remote,
            attempt,
            "Uploading"
        );

        let receipt = self.store.put_file(&remote.key, &staged.path).await?;

        match self
            .verifier
            .confirm_write(remote, staged.size_bytes, receipt.e_tag.as_deref())
            .await?
        {
            Verification::Present { size } => Ok(size),
            Verification::Absent => {
                tracing::warn!(remote = %remote, attempt, "Verification failed: object absent");
                Err(UploadError::VerificationMismatch {
                    key: remote.key.clone(),
                    expected: staged.size_bytes,
                    found: None,
                })
            }
            Verification::SizeMismatch { expected, found } => {
                tracing::warn!(remote = %remote, attempt, expected, found, "Verification failed: size mismatch");
                Err(UploadError::VerificationMismatch {
                    key: remote.key.clone(),
                    expected,
                    found: Some(found),
                })
            }
            Verification::ETagMismatch { expected, found } => {
                tracing::warn!(remote = %remote, attempt, %expected, %found, "Verification failed: stored version differs from the one written");
                Err(UploadError::StaleObject {
                    key: remote.key.clone(),
                    expected,
                    found,
                })
            }
        }
    }
}
