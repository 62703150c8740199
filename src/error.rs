//! Error types for tripdata-loader
//!
//! This module provides the error taxonomy for the pipeline:
//! - [`FetchError`] - a work item could not be staged (unavailable source, transfer failure)
//! - [`StoreError`] - the destination store rejected or failed an operation
//! - [`UploadError`] - a single upload attempt failed (transfer or verification mismatch)
//! - [`Error`] - crate-level error; the only variant that aborts a run mid-flight is
//!   [`Error::DestinationUnreachable`]
//!
//! Per-item failures are carried as data inside [`crate::types::AttemptRecord`]s and
//! never terminate sibling workers. Every error exposes a stable machine-readable
//! `code()` so reports can be grepped and aggregated.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tripdata-loader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tripdata-loader
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.max_attempts")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error while building or using the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error (configuration files)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A work item could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Destination store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The destination container itself is inaccessible; no item can succeed
    #[error("destination '{container}' is unreachable: {reason}")]
    DestinationUnreachable {
        /// Container (bucket) identifier from configuration
        container: String,
        /// Why the container is considered unreachable
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error for the given key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error must stop the whole run
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::DestinationUnreachable { .. } => true,
            Error::Store(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// Get the machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Fetch(e) => e.cause.code(),
            Error::Store(e) => e.code(),
            Error::DestinationUnreachable { .. } => "destination_unreachable",
            Error::Other(_) => "internal_error",
        }
    }
}

/// A work item could not be staged locally
#[derive(Debug, Error)]
#[error("failed to fetch {name} from {url}: {cause}")]
pub struct FetchError {
    /// Canonical artifact name of the work item
    pub name: String,
    /// Source URL that was requested
    pub url: String,
    /// Why the fetch failed
    pub cause: FetchCause,
}

/// Reason a fetch failed
#[derive(Debug, Error)]
pub enum FetchCause {
    /// The archive answered with a non-success status, or the body was not a usable artifact
    #[error("source unavailable (HTTP {status})")]
    Unavailable {
        /// HTTP status code returned by the archive
        status: u16,
    },

    /// Network failure while requesting or streaming the body
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Local staging storage could not be written
    #[error("staging failed: {0}")]
    Staging(String),
}

impl FetchCause {
    /// Get the machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            FetchCause::Unavailable { .. } => "source_unavailable",
            FetchCause::Transfer(_) => "transfer_failed",
            FetchCause::Staging(_) => "staging_failed",
        }
    }
}

/// Destination store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Access to the container or object was denied (permissions or credentials)
    #[error("permission denied for {target}: {reason}")]
    PermissionDenied {
        /// Object key or container the operation targeted
        target: String,
        /// Backend-provided reason
        reason: String,
    },

    /// The destination container does not exist
    #[error("container {container} does not exist")]
    ContainerMissing {
        /// Container (bucket) identifier
        container: String,
    },

    /// Network or backend failure that may succeed on a later attempt
    #[error("transfer of {key} failed: {reason}")]
    Transfer {
        /// Object key being written or checked
        key: String,
        /// Backend-provided reason
        reason: String,
    },

    /// Local file could not be read for upload
    #[error("failed to read {path}: {source}")]
    Io {
        /// Staged file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Whether this error means the destination as a whole is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::PermissionDenied { .. } | StoreError::ContainerMissing { .. }
        )
    }

    /// Get the machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::PermissionDenied { .. } => "permission_denied",
            StoreError::ContainerMissing { .. } => "container_missing",
            StoreError::Transfer { .. } => "transfer_failed",
            StoreError::Io { .. } => "staging_read_failed",
        }
    }

    /// Map a raw `object_store` error for the given key
    pub(crate) fn from_object_store(key: &str, err: object_store::Error) -> Self {
        match err {
            object_store::Error::PermissionDenied { source, .. }
            | object_store::Error::Unauthenticated { source, .. } => StoreError::PermissionDenied {
                target: key.to_string(),
                reason: source.to_string(),
            },
            other => StoreError::Transfer {
                key: key.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// A single upload attempt failed
#[derive(Debug, Error)]
pub enum UploadError {
    /// Transmit (or the verification request itself) failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transmit reported success but the object could not be confirmed at the destination
    #[error("verification failed for {key}: expected {expected} bytes, found {}", describe_found(.found))]
    VerificationMismatch {
        /// Object key that was checked
        key: String,
        /// Size of the staged artifact
        expected: u64,
        /// Size reported by the destination, `None` if the object is absent
        found: Option<u64>,
    },

    /// The stored object is not the version this attempt wrote
    #[error("verification failed for {key}: wrote version {expected}, destination holds {found}")]
    StaleObject {
        /// Object key that was checked
        key: String,
        /// Entity tag acknowledged by the write
        expected: String,
        /// Entity tag reported by the destination
        found: String,
    },
}

fn describe_found(found: &Option<u64>) -> String {
    match found {
        Some(size) => format!("{} bytes", size),
        None => "no object".to_string(),
    }
}

impl UploadError {
    /// Get the machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::Store(e) => e.code(),
            UploadError::VerificationMismatch { found: None, .. } => "verification_absent",
            UploadError::VerificationMismatch { .. } => "verification_size_mismatch",
            UploadError::StaleObject { .. } => "verification_etag_mismatch",
        }
    }
}
