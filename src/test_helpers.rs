//! Shared fixtures for unit tests: staged files and destination stores that misbehave
//! on demand.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::error::StoreError;
use crate::store::{DestinationStore, ObjectInfo, ObjectStoreDestination, PutReceipt};
use crate::types::{ArtifactFormat, Category, Period, StagedArtifact, WorkItem};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory destination store named `trips`
pub(crate) fn memory_store() -> Arc<ObjectStoreDestination> {
    Arc::new(ObjectStoreDestination::new(
        "trips",
        Arc::new(object_store::memory::InMemory::new()),
        1024 * 1024,
    ))
}

/// Write `bytes` as the staged yellow parquet file for `year-month` inside `dir`
pub(crate) fn staged_file(dir: &Path, year: i32, month: u32, bytes: &[u8]) -> StagedArtifact {
    let item = WorkItem::new(
        Category::new("yellow").unwrap(),
        Period::new(year, month).unwrap(),
        ArtifactFormat::Parquet,
    );
    let path = dir.join(item.canonical_name());
    std::fs::write(&path, bytes).unwrap();
    StagedArtifact {
        item,
        path,
        size_bytes: bytes.len() as u64,
        reused: false,
    }
}

/// Misbehaviour applied to a single put
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StoreFault {
    /// Put reports success but the object never becomes visible
    HideAfterPut,
    /// Put fails with a transient transfer error
    FailPut,
    /// Put stores the payload minus its last byte
    Truncate,
    /// Put is rejected with a permission error
    DenyPut,
    /// Put acknowledges a version that never lands; whatever was stored stays
    LoseWrite,
}

/// Destination wrapper that applies queued faults to successive puts
///
/// Faults queued for a specific key are used for that key first; otherwise the shared
/// queue is consumed. Once the relevant queue is empty the store behaves normally.
pub(crate) struct FlakyStore {
    inner: Arc<ObjectStoreDestination>,
    faults: Mutex<VecDeque<StoreFault>>,
    keyed: Mutex<HashMap<String, VecDeque<StoreFault>>>,
    deny_container: bool,
    puts: AtomicU32,
    heads: AtomicU32,
}

impl FlakyStore {
    pub(crate) fn new(faults: Vec<StoreFault>) -> Self {
        Self {
            inner: memory_store(),
            faults: Mutex::new(faults.into()),
            keyed: Mutex::new(HashMap::new()),
            deny_container: false,
            puts: AtomicU32::new(0),
            heads: AtomicU32::new(0),
        }
    }

    /// Queue faults for puts to one key only
    pub(crate) fn with_key_faults(self, key: &str, faults: Vec<StoreFault>) -> Self {
        self.keyed
            .lock()
            .unwrap()
            .insert(key.to_string(), faults.into());
        self
    }

    /// Fail the container check with a permission error
    pub(crate) fn deny_container(mut self) -> Self {
        self.deny_container = true;
        self
    }

    /// Store an object directly, bypassing fault injection and counters
    pub(crate) async fn seed(&self, key: &str, bytes: &'static [u8]) {
        self.inner
            .put_object(key, Bytes::from_static(bytes))
            .await
            .unwrap();
    }

    pub(crate) fn puts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }

    pub(crate) fn heads(&self) -> u32 {
        self.heads.load(Ordering::SeqCst)
    }

    fn next_fault(&self, key: &str) -> Option<StoreFault> {
        if let Some(queue) = self.keyed.lock().unwrap().get_mut(key) {
            if let Some(fault) = queue.pop_front() {
                return Some(fault);
            }
        }
        self.faults.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl DestinationStore for FlakyStore {
    fn container(&self) -> &str {
        self.inner.container()
    }

    async fn ensure_container(&self) -> Result<(), StoreError> {
        if self.deny_container {
            return Err(StoreError::PermissionDenied {
                target: self.container().to_string(),
                reason: "access denied".into(),
            });
        }
        self.inner.ensure_container().await
    }

    async fn put_object(&self, key: &str, payload: Bytes) -> Result<PutReceipt, StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let size = payload.len() as u64;
        match self.next_fault(key) {
            None => self.inner.put_object(key, payload).await,
            Some(StoreFault::HideAfterPut) => Ok(PutReceipt { size, e_tag: None }),
            Some(StoreFault::FailPut) => Err(StoreError::Transfer {
                key: key.to_string(),
                reason: "connection reset by peer".into(),
            }),
            Some(StoreFault::Truncate) => {
                let cut = payload.len().saturating_sub(1);
                self.inner.put_object(key, payload.slice(..cut)).await
            }
            Some(StoreFault::DenyPut) => Err(StoreError::PermissionDenied {
                target: key.to_string(),
                reason: "access denied".into(),
            }),
            Some(StoreFault::LoseWrite) => Ok(PutReceipt {
                size,
                e_tag: Some("lost-write".into()),
            }),
        }
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        self.inner.head_object(key).await
    }
}
