//! # tripdata-loader
//!
//! Moves monthly NYC TLC trip-record files from the public HTTP archive into a
//! durable object store.
//!
//! ## Design Philosophy
//!
//! - **Verified delivery** - an item counts as delivered only after the destination
//!   confirmed the object written by the very attempt that reported success
//! - **Isolated failures** - a missing month or a flaky upload never stops its siblings;
//!   only an unreachable destination aborts a run
//! - **Resumable** - staged files are reused, so an interrupted run picks up where it
//!   stopped
//! - **Event-driven** - consumers subscribe to progress events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use tripdata_loader::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.destination.container = "nyc-taxi-raw".to_string();
//!
//!     let pipeline = Pipeline::new(config)?;
//!
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = pipeline.run().await?;
//!     print!("{}", summary);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Work item enumeration
pub mod enumerator;
/// Error types
pub mod error;
/// HTTP download into staging storage
pub mod fetcher;
/// Run coordination
pub mod pipeline;
/// Bounded worker pool
pub mod pool;
/// Retry logic with configurable backoff
pub mod retry;
/// Destination object store abstraction
pub mod store;
/// Core types and events
pub mod types;
/// Upload-then-verify state machine
pub mod uploader;
/// Destination presence checks
pub mod verifier;

#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use config::{Config, DestinationConfig, RetryConfig, StoreBackend};
pub use enumerator::{DateRange, enumerate, months_between};
pub use error::{Error, FetchCause, FetchError, Result, StoreError, UploadError};
pub use fetcher::Fetcher;
pub use pipeline::Pipeline;
pub use pool::{PoolOutcome, WorkerPool};
pub use store::{DestinationStore, ObjectInfo, ObjectStoreDestination, PutReceipt};
pub use types::{
    ArtifactFormat, AttemptRecord, Category, Event, Outcome, Period, Phase, RemoteArtifact,
    RunSummary, StagedArtifact, WorkItem,
};
pub use uploader::{UploadOutcome, Uploader};
pub use verifier::{Verification, Verifier};

/// Cancel `token` when the process receives a termination signal.
///
/// Returns once the signal arrived and the token was cancelled. Run it in a
/// background task next to [`Pipeline::run`]: unstarted items are then reported as
/// cancelled and in-flight transfers finish their current attempt.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to Ctrl+C if registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use tripdata_loader::{Config, Pipeline, cancel_on_signal};
///
/// # async fn example(config: Config) -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Pipeline::new(config)?;
/// tokio::spawn(cancel_on_signal(pipeline.cancel_token()));
/// let summary = pipeline.run().await?;
/// # Ok(())
/// # }
/// ```
pub async fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            tracing::warn!("Stopping: unstarted items will be reported as cancelled");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut term), Ok(mut int)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        tracing::warn!("Signal handlers unavailable, listening for Ctrl+C only");
        return ctrl_c_or_never().await;
    };

    let name = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    };
    tracing::info!(signal = name, "Received shutdown signal");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c_or_never().await;
}

/// Resolve on Ctrl+C; if that cannot be observed either, never resolve, so a
/// listener failure is not mistaken for a shutdown request
async fn ctrl_c_or_never() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl_c", "Received shutdown signal"),
        Err(e) => {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C; signal cancellation disabled");
            std::future::pending::<()>().await;
        }
    }
}
