//! Storage backends: where a cluster's backups live and how to tell whether
//! they still exist.
//!
//! Each storage type gets its own [`BackupBackend`]; [`select_handle`] is the
//! only place that maps a storage type to one.

use std::sync::Arc;

use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::debug;

use crate::crd::shared::BackupStorageType;
use crate::error::{Error, Result};
use crate::helpers::s3_backup_prefix;
use crate::sut::ClusterApi;
use crate::transport::MemberTransport;

/// An object store bound to the bucket backups are written to.
#[derive(Clone)]
pub struct ObjectStorageHandle {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
}

impl ObjectStorageHandle {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// S3 client configured from the standard `AWS_*` environment variables.
    pub fn s3_from_env(bucket: &str) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self::new(Arc::new(store), bucket))
    }
}

impl std::fmt::Debug for ObjectStorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorageHandle")
            .field("store", &self.store.to_string())
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Capability set for one storage type.
#[async_trait::async_trait]
pub trait BackupBackend: Send + Sync {
    fn storage_type(&self) -> BackupStorageType;

    /// Whether any backup artifact of `cluster` currently exists.
    async fn backup_exists(&self, api: &dyn ClusterApi, cluster: &str) -> Result<bool>;

    /// Whether the agent at `agent_url` has actually written a backup of
    /// `cluster`. Defaults to artifact presence.
    async fn backup_written(
        &self,
        api: &dyn ClusterApi,
        _transport: &dyn MemberTransport,
        cluster: &str,
        _agent_url: &str,
    ) -> Result<bool> {
        self.backup_exists(api, cluster).await
    }
}

/// Backups on the PVC the operator provisions next to the backup agent.
///
/// The PVC exists from cluster creation on, so it only answers teardown
/// questions. Whether a backup was written is asked of the agent.
pub struct VolumeBackend {
    storage_type: BackupStorageType,
}

#[async_trait::async_trait]
impl BackupBackend for VolumeBackend {
    fn storage_type(&self) -> BackupStorageType {
        self.storage_type
    }

    async fn backup_exists(&self, api: &dyn ClusterApi, cluster: &str) -> Result<bool> {
        api.backup_volume_exists(cluster).await
    }

    async fn backup_written(
        &self,
        _api: &dyn ClusterApi,
        transport: &dyn MemberTransport,
        cluster: &str,
        agent_url: &str,
    ) -> Result<bool> {
        let status = transport.backup_status(agent_url).await?;
        debug!(%cluster, backups = status.backups, "backup agent status");
        Ok(status.has_backup())
    }
}

/// Backups written as objects under the cluster's prefix.
pub struct ObjectStorageBackend {
    handle: ObjectStorageHandle,
}

#[async_trait::async_trait]
impl BackupBackend for ObjectStorageBackend {
    fn storage_type(&self) -> BackupStorageType {
        BackupStorageType::S3
    }

    async fn backup_exists(&self, api: &dyn ClusterApi, cluster: &str) -> Result<bool> {
        let prefix = Path::from(s3_backup_prefix(api.namespace(), cluster));
        let mut listing = self.handle.store.list(Some(&prefix));
        match listing.next().await {
            Some(Ok(meta)) => {
                debug!(bucket = %self.handle.bucket, key = %meta.location, "found backup object");
                Ok(true)
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(false),
        }
    }
}

/// Backend plus the object-storage reference (if any) it verifies against.
#[derive(Clone)]
pub struct StorageVerificationHandle {
    backend: Arc<dyn BackupBackend>,
    object_storage: Option<ObjectStorageHandle>,
}

impl StorageVerificationHandle {
    pub fn storage_type(&self) -> BackupStorageType {
        self.backend.storage_type()
    }

    /// `None` for volume backends.
    pub fn object_storage(&self) -> Option<&ObjectStorageHandle> {
        self.object_storage.as_ref()
    }

    pub async fn backup_exists(&self, api: &dyn ClusterApi, cluster: &str) -> Result<bool> {
        self.backend.backup_exists(api, cluster).await
    }

    pub async fn backup_written(
        &self,
        api: &dyn ClusterApi,
        transport: &dyn MemberTransport,
        cluster: &str,
        agent_url: &str,
    ) -> Result<bool> {
        self.backend
            .backup_written(api, transport, cluster, agent_url)
            .await
    }
}

impl std::fmt::Debug for StorageVerificationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageVerificationHandle")
            .field("storage_type", &self.storage_type())
            .field("object_storage", &self.object_storage)
            .finish()
    }
}

/// Map a storage type to its verification handle.
///
/// Volume types need nothing beyond the cluster API; S3 needs a configured
/// object store.
pub fn select_handle(
    storage_type: BackupStorageType,
    object_storage: Option<&ObjectStorageHandle>,
) -> Result<StorageVerificationHandle> {
    match storage_type {
        BackupStorageType::Default | BackupStorageType::PersistentVolume => {
            Ok(StorageVerificationHandle {
                backend: Arc::new(VolumeBackend { storage_type }),
                object_storage: None,
            })
        }
        BackupStorageType::S3 => {
            let handle = object_storage.cloned().ok_or_else(|| {
                Error::config("S3 backup verification requires a configured object store")
            })?;
            Ok(StorageVerificationHandle {
                backend: Arc::new(ObjectStorageBackend {
                    handle: handle.clone(),
                }),
                object_storage: Some(handle),
            })
        }
    }
}
