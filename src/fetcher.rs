//! Fetcher: downloads one work item from the archive into staging storage.
//!
//! Staging is all-or-nothing. The body is streamed into `<name>.part` and renamed
//! to `<name>` only after the whole body was written and synced; any failure
//! removes the partial file. An existing, non-empty `<name>` is returned as-is so
//! interrupted runs resume without re-downloading.
//!
//! `request_timeout` bounds connecting and each wait for data (headers or the next
//! body chunk), not the whole transfer: a large file that keeps arriving is never cut
//! off.

use crate::config::{SourceConfig, StagingConfig};
use crate::error::{Error, FetchCause, FetchError, Result};
use crate::types::{StagedArtifact, WorkItem};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Suffix for in-progress downloads
const PARTIAL_SUFFIX: &str = ".part";

/// Downloads work items into the staging directory
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    source: SourceConfig,
    staging_dir: PathBuf,
}

impl Fetcher {
    /// Create a fetcher, building the HTTP client and creating the staging directory
    pub fn new(source: SourceConfig, staging: &StagingConfig) -> Result<Self> {
        std::fs::create_dir_all(&staging.dir).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create staging directory '{}': {}",
                    staging.dir.display(),
                    e
                ),
            ))
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(source.request_timeout)
            .build()?;

        Ok(Self {
            client,
            source,
            staging_dir: staging.dir.clone(),
        })
    }

    /// Source URL for an item
    pub fn url_for(&self, item: &WorkItem) -> String {
        self.source.url_for(&item.category, &item.canonical_name())
    }

    /// Staging path for an item
    pub fn staging_path(&self, item: &WorkItem) -> PathBuf {
        self.staging_dir.join(item.canonical_name())
    }

    /// Stage `item`, reusing an existing non-empty staged file
    ///
    /// Never retries; the caller decides what a failure means for the batch.
    pub async fn fetch(&self, item: &WorkItem) -> std::result::Result<StagedArtifact, FetchError> {
        let name = item.canonical_name();
        let url = self.url_for(item);
        let path = self.staging_path(item);

        let fail = |cause: FetchCause| FetchError {
            name: name.clone(),
            url: url.clone(),
            cause,
        };

        if let Some(size_bytes) = existing_size(&path).await {
            tracing::info!(item = %name, path = %path.display(), size_bytes, "File already staged, skipping download");
            return Ok(StagedArtifact {
                item: item.clone(),
                path,
                size_bytes,
                reused: true,
            });
        }

        tracing::info!(item = %name, url = %url, "Downloading");

        let idle = self.source.request_timeout;
        let response = match tokio::time::timeout(idle, self.client.get(&url).send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let reason = if e.is_timeout() {
                    idle_message(idle)
                } else if e.is_connect() {
                    format!("connection failed: {}", e)
                } else {
                    e.to_string()
                };
                return Err(fail(FetchCause::Transfer(reason)));
            }
            Err(_) => return Err(fail(FetchCause::Transfer(idle_message(idle)))),
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(item = %name, status = status.as_u16(), "Source unavailable, skipping");
            return Err(fail(FetchCause::Unavailable {
                status: status.as_u16(),
            }));
        }

        let partial = partial_path(&path);
        let size_bytes = match stream_to_file(response, &partial, idle).await {
            Ok(0) => {
                remove_partial(&partial).await;
                return Err(fail(FetchCause::Unavailable {
                    status: status.as_u16(),
                }));
            }
            Ok(size) => size,
            Err(cause) => {
                remove_partial(&partial).await;
                return Err(fail(cause));
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            remove_partial(&partial).await;
            return Err(fail(FetchCause::Staging(format!(
                "failed to move into place: {}",
                e
            ))));
        }

        tracing::info!(item = %name, path = %path.display(), size_bytes, "Downloaded");
        Ok(StagedArtifact {
            item: item.clone(),
            path,
            size_bytes,
            reused: false,
        })
    }
}

/// Size of an already staged file, if it exists and is non-empty
async fn existing_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn idle_message(idle: Duration) -> String {
    format!("no data received for {} seconds", idle.as_secs_f64())
}

/// Stream the body into `partial`; fails if no chunk arrives within `idle`
async fn stream_to_file(
    mut response: reqwest::Response,
    partial: &Path,
    idle: Duration,
) -> std::result::Result<u64, FetchCause> {
    let staging = |e: std::io::Error| FetchCause::Staging(e.to_string());

    let mut file = tokio::fs::File::create(partial).await.map_err(staging)?;
    let mut written = 0u64;

    loop {
        let next = tokio::time::timeout(idle, response.chunk())
            .await
            .map_err(|_| FetchCause::Transfer(idle_message(idle)))?
            .map_err(|e| FetchCause::Transfer(format!("body interrupted: {}", e)))?;
        let Some(chunk) = next else {
            break;
        };
        file.write_all(&chunk).await.map_err(staging)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(staging)?;
    file.sync_all().await.map_err(staging)?;
    Ok(written)
}

async fn remove_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => tracing::debug!(path = %partial.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %partial.display(), error = %e, "Failed to remove partial download")
        }
    }
}
