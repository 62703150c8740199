//! Destination presence checks.
//!
//! The verifier only reads from the store. "Not found" is a normal answer
//! (`Ok(false)` / [`Verification::Absent`]); a failed request is an `Err` and must be
//! surfaced by the caller rather than treated as absence.
//!
//! Identity is the stored size. When both the write and the lookup report an entity
//! tag, the tags must also agree, which catches an object left over from an earlier
//! write that happens to have the same size.

use crate::error::StoreError;
use crate::store::DestinationStore;
use crate::types::RemoteArtifact;
use std::sync::Arc;

/// Result of checking an uploaded object against its staged source
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Object exists with the expected size
    Present {
        /// Stored size in bytes
        size: u64,
    },
    /// No object under the key
    Absent,
    /// Object exists but its size differs from the staged artifact
    SizeMismatch {
        /// Size of the staged artifact
        expected: u64,
        /// Size reported by the destination
        found: u64,
    },
    /// Object has the expected size but is not the version that was just written
    ETagMismatch {
        /// Tag acknowledged by the write
        expected: String,
        /// Tag of the object currently stored
        found: String,
    },
}

impl Verification {
    /// True only for [`Verification::Present`]
    pub fn is_present(&self) -> bool {
        matches!(self, Verification::Present { .. })
    }
}

/// Checks artifacts at the destination
#[derive(Clone)]
pub struct Verifier {
    store: Arc<dyn DestinationStore>,
}

impl Verifier {
    /// Create a verifier over `store`
    pub fn new(store: Arc<dyn DestinationStore>) -> Self {
        Self { store }
    }

    /// Whether the artifact exists at the destination
    pub async fn exists(&self, remote: &RemoteArtifact) -> Result<bool, StoreError> {
        self.store.object_exists(&remote.key).await
    }

    /// Check existence and size identity against the staged artifact
    pub async fn confirm(
        &self,
        remote: &RemoteArtifact,
        expected_size: u64,
    ) -> Result<Verification, StoreError> {
        self.confirm_write(remote, expected_size, None).await
    }

    /// Like [`Verifier::confirm`], additionally matching the entity tag the write
    /// acknowledged
    ///
    /// Tags are compared only when the write and the lookup both carry one.
    pub async fn confirm_write(
        &self,
        remote: &RemoteArtifact,
        expected_size: u64,
        written_e_tag: Option<&str>,
    ) -> Result<Verification, StoreError> {
        let verification = match self.store.head_object(&remote.key).await? {
            None => Verification::Absent,
            Some(info) if info.size != expected_size => Verification::SizeMismatch {
                expected: expected_size,
                found: info.size,
            },
            Some(info) => match (written_e_tag, info.e_tag) {
                (Some(expected), Some(found)) if expected != found => Verification::ETagMismatch {
                    expected: expected.to_string(),
                    found,
                },
                _ => Verification::Present { size: info.size },
            },
        };
        tracing::debug!(remote = %remote, ?verification, "Verified destination object");
        Ok(verification)
    }
}
