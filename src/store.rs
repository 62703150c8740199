//! Destination object store abstraction.
//!
//! [`DestinationStore`] is the seam the uploader and verifier talk to.
//! [`ObjectStoreDestination`] implements it on top of the `object_store` crate so the
//! same pipeline can target an in-memory store, a local directory, S3 or GCS.

use crate::config::{DestinationConfig, StoreBackend};
use crate::error::StoreError;
use crate::retry::IsRetryable;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload, WriteMultipart};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Metadata returned by a presence check
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Stored size in bytes
    pub size: u64,
    /// Entity tag of the stored version, when the backend reports one
    pub e_tag: Option<String>,
}

/// What the destination acknowledged for a completed write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutReceipt {
    /// Bytes sent
    pub size: u64,
    /// Entity tag of the version just written, when the backend reports one
    pub e_tag: Option<String>,
}

/// Operations the pipeline needs from the destination
///
/// Implementations must report a missing object as `Ok(None)` / `Ok(false)`, never as
/// an error; errors are reserved for failed requests.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Container (bucket) identifier, for logs and reports
    fn container(&self) -> &str;

    /// Confirm the container exists and is accessible
    ///
    /// An existing, accessible container is success. Permission problems must be
    /// reported as [`StoreError::PermissionDenied`].
    async fn ensure_container(&self) -> Result<(), StoreError>;

    /// Write `payload` under `key`, replacing any existing object
    async fn put_object(&self, key: &str, payload: Bytes) -> Result<PutReceipt, StoreError>;

    /// Upload the file at `path` under `key`
    async fn put_file(&self, key: &str, path: &Path) -> Result<PutReceipt, StoreError> {
        let data = tokio::fs::read(path).await.map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.put_object(key, Bytes::from(data)).await
    }

    /// Look up an object; `Ok(None)` when it does not exist
    async fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError>;

    /// Whether an object exists under `key`
    async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.head_object(key).await?.is_some())
    }
}

impl IsRetryable for StoreError {
    fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }
}

/// [`DestinationStore`] backed by an `object_store` implementation
pub struct ObjectStoreDestination {
    container: String,
    store: Arc<dyn ObjectStore>,
    chunk_size: usize,
}

impl ObjectStoreDestination {
    /// Wrap an existing object store
    pub fn new(container: impl Into<String>, store: Arc<dyn ObjectStore>, chunk_size: usize) -> Self {
        Self {
            container: container.into(),
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Build the configured backend
    ///
    /// For the `local` backend the container directory is created if missing; remote
    /// containers are never provisioned here.
    pub fn from_config(config: &DestinationConfig) -> Result<Self, StoreError> {
        let container = config.container.clone();
        let store: Arc<dyn ObjectStore> = match &config.backend {
            StoreBackend::Memory => Arc::new(object_store::memory::InMemory::new()),
            StoreBackend::Local { root } => {
                let dir: PathBuf = root.join(&container);
                std::fs::create_dir_all(&dir).map_err(|source| match source.kind() {
                    std::io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                        target: dir.display().to_string(),
                        reason: source.to_string(),
                    },
                    _ => StoreError::Io {
                        path: dir.clone(),
                        source,
                    },
                })?;
                let local = object_store::local::LocalFileSystem::new_with_prefix(&dir)
                    .map_err(|e| StoreError::from_object_store(&container, e))?;
                Arc::new(local)
            }
            StoreBackend::S3 {
                region,
                endpoint,
                allow_http,
            } => {
                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(&container)
                    .with_allow_http(*allow_http);
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                let s3 = builder
                    .build()
                    .map_err(|e| StoreError::from_object_store(&container, e))?;
                Arc::new(s3)
            }
            StoreBackend::Gcs {
                service_account_path,
            } => {
                let mut builder = object_store::gcp::GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(&container);
                if let Some(path) = service_account_path {
                    builder = builder.with_service_account_path(path.display().to_string());
                }
                let gcs = builder
                    .build()
                    .map_err(|e| StoreError::from_object_store(&container, e))?;
                Arc::new(gcs)
            }
        };

        Ok(Self::new(container, store, config.chunk_size))
    }

    /// Access the underlying object store
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    async fn put_streaming(
        &self,
        key: &str,
        path: &Path,
        size: u64,
    ) -> Result<PutReceipt, StoreError> {
        let location = ObjectPath::from(key);
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let upload = self
            .store
            .put_multipart(&location)
            .await
            .map_err(|e| StoreError::from_object_store(key, e))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.chunk_size);
        let mut buf = vec![0u8; self.chunk_size];
        let mut sent = 0u64;

        loop {
            let n = match read_full(&mut file, &mut buf).await {
                Ok(n) => n,
                Err(source) => {
                    abort_quietly(writer, key).await;
                    return Err(io_err(source));
                }
            };
            if n == 0 {
                break;
            }
            // One part in flight at a time: a single file is never uploaded in parallel.
            if let Err(e) = writer.wait_for_capacity(1).await {
                abort_quietly(writer, key).await;
                return Err(StoreError::from_object_store(key, e));
            }
            writer.write(&buf[..n]);
            sent += n as u64;
        }

        let result = writer
            .finish()
            .await
            .map_err(|e| StoreError::from_object_store(key, e))?;

        tracing::debug!(key, bytes = sent, expected = size, "Multipart upload finished");
        Ok(PutReceipt {
            size: sent,
            e_tag: result.e_tag,
        })
    }
}

/// Fill `buf` as far as possible; returns fewer bytes only at end of file
async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn abort_quietly(writer: WriteMultipart, key: &str) {
    if let Err(e) = writer.abort().await {
        tracing::warn!(key, error = %e, "Failed to abort multipart upload");
    }
}

#[async_trait]
impl DestinationStore for ObjectStoreDestination {
    fn container(&self) -> &str {
        &self.container
    }

    async fn ensure_container(&self) -> Result<(), StoreError> {
        match self.store.list_with_delimiter(None).await {
            Ok(_) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Err(StoreError::ContainerMissing {
                container: self.container.clone(),
            }),
            Err(e) => Err(StoreError::from_object_store(&self.container, e)),
        }
    }

    async fn put_object(&self, key: &str, payload: Bytes) -> Result<PutReceipt, StoreError> {
        let size = payload.len() as u64;
        let result = self
            .store
            .put(&ObjectPath::from(key), PutPayload::from(payload))
            .await
            .map_err(|e| StoreError::from_object_store(key, e))?;
        Ok(PutReceipt {
            size,
            e_tag: result.e_tag,
        })
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<PutReceipt, StoreError> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        if size <= self.chunk_size as u64 {
            let data = tokio::fs::read(path).await.map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            return self.put_object(key, Bytes::from(data)).await;
        }

        self.put_streaming(key, path, size).await
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectInfo>, StoreError> {
        match self.store.head(&ObjectPath::from(key)).await {
            Ok(meta) => Ok(Some(ObjectInfo {
                key: key.to_string(),
                size: meta.size,
                e_tag: meta.e_tag,
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(StoreError::from_object_store(key, e)),
        }
    }
}
