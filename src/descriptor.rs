//! Immutable cluster descriptors and the builder that validates them.
//!
//! A [`ClusterDescriptor`] is what the workflow submits to the API server.
//! It is built once per scenario phase and never mutated; the restore phase
//! derives a new descriptor via [`ClusterDescriptor::to_builder`].

use kube::api::ObjectMeta;

use crate::crd::etcd_cluster::{BackupPolicy, EtcdCluster, EtcdClusterSpec, RestorePolicy};
use crate::crd::shared::{BackupStorageType, PvSource, S3Source};
use crate::error::{Error, Result};

/// Backup cadence used by every policy the suite creates.
const BACKUP_INTERVAL_SECS: i32 = 60 * 60;
const MAX_BACKUPS: i32 = 5;
const PV_VOLUME_SIZE_MB: i32 = 512;

/// How a cluster is named: a fixed name, or a prefix the API server completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterIdentity {
    Fixed(String),
    Generated(String),
}

impl ClusterIdentity {
    pub fn fixed_name(&self) -> Option<&str> {
        match self {
            Self::Fixed(name) => Some(name),
            Self::Generated(_) => None,
        }
    }
}

impl std::fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(name) => f.write_str(name),
            Self::Generated(prefix) => write!(f, "{prefix}<generated>"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterDescriptor {
    identity: ClusterIdentity,
    size: i32,
    version: Option<String>,
    backup: Option<BackupPolicy>,
    restore: Option<RestorePolicy>,
}

impl ClusterDescriptor {
    /// Start a descriptor whose name is generated from `prefix`.
    pub fn generated(prefix: &str, size: i32) -> ClusterDescriptorBuilder {
        ClusterDescriptorBuilder::new(ClusterIdentity::Generated(prefix.to_string()), size)
    }

    /// Start a descriptor with a fixed name.
    pub fn named(name: &str, size: i32) -> ClusterDescriptorBuilder {
        ClusterDescriptorBuilder::new(ClusterIdentity::Fixed(name.to_string()), size)
    }

    pub fn identity(&self) -> &ClusterIdentity {
        &self.identity
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn backup(&self) -> Option<&BackupPolicy> {
        self.backup.as_ref()
    }

    pub fn restore(&self) -> Option<&RestorePolicy> {
        self.restore.as_ref()
    }

    /// Reopen this descriptor for derivation. The original stays untouched.
    pub fn to_builder(&self) -> ClusterDescriptorBuilder {
        ClusterDescriptorBuilder {
            identity: self.identity.clone(),
            size: self.size,
            version: self.version.clone(),
            backup: self.backup.clone(),
            restore: self.restore.clone(),
        }
    }

    /// Render the `EtcdCluster` resource submitted to the API server.
    pub fn to_resource(&self, namespace: &str) -> EtcdCluster {
        let (name, generate_name) = match &self.identity {
            ClusterIdentity::Fixed(name) => (Some(name.clone()), None),
            ClusterIdentity::Generated(prefix) => (None, Some(prefix.clone())),
        };
        EtcdCluster {
            metadata: ObjectMeta {
                name,
                generate_name,
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: EtcdClusterSpec {
                size: self.size,
                version: self.version.clone(),
                backup: self.backup.clone(),
                restore: self.restore.clone(),
            },
            status: None,
        }
    }
}

// ── ClusterDescriptorBuilder ────────────────────────────────────────────────

/// Builder for [`ClusterDescriptor`]. `build()` enforces the descriptor
/// invariants; nothing is checked before then.
#[derive(Clone, Debug)]
pub struct ClusterDescriptorBuilder {
    identity: ClusterIdentity,
    size: i32,
    version: Option<String>,
    backup: Option<BackupPolicy>,
    restore: Option<RestorePolicy>,
}

impl ClusterDescriptorBuilder {
    pub fn new(identity: ClusterIdentity, size: i32) -> Self {
        Self {
            identity,
            size,
            version: None,
            backup: None,
            restore: None,
        }
    }

    pub fn identity(mut self, identity: ClusterIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn backup(mut self, policy: BackupPolicy) -> Self {
        self.backup = Some(policy);
        self
    }

    pub fn restore(mut self, policy: RestorePolicy) -> Self {
        self.restore = Some(policy);
        self
    }

    pub fn build(self) -> Result<ClusterDescriptor> {
        match &self.identity {
            ClusterIdentity::Fixed(n) | ClusterIdentity::Generated(n) if n.is_empty() => {
                return Err(Error::invalid_descriptor("cluster name must not be empty"));
            }
            _ => {}
        }
        if self.size < 1 {
            return Err(Error::invalid_descriptor(format!(
                "cluster size must be positive, got {}",
                self.size
            )));
        }
        if let Some(ref restore) = self.restore {
            let backup = self.backup.as_ref().ok_or_else(|| {
                Error::invalid_descriptor("a restore policy requires a backup policy")
            })?;
            if !backup.storage_type.is_compatible_with(restore.storage_type) {
                return Err(Error::invalid_descriptor(format!(
                    "restore storage type {} does not match backup storage type {}",
                    restore.storage_type, backup.storage_type
                )));
            }
            if restore.backup_cluster_name.is_empty() {
                return Err(Error::invalid_descriptor(
                    "restore policy must name the backup source cluster",
                ));
            }
        }
        Ok(ClusterDescriptor {
            identity: self.identity,
            size: self.size,
            version: self.version,
            backup: self.backup,
            restore: self.restore,
        })
    }
}

// ── Backup policy constructors ──────────────────────────────────────────────

/// Hourly backups to a 512 MB persistent volume.
pub fn pv_backup_policy() -> BackupPolicy {
    BackupPolicy {
        backup_interval_in_second: BACKUP_INTERVAL_SECS,
        max_backups: MAX_BACKUPS,
        storage_type: BackupStorageType::PersistentVolume,
        pv: Some(PvSource {
            volume_size_in_mb: PV_VOLUME_SIZE_MB,
        }),
        s3: None,
        cleanup_backups_on_cluster_delete: false,
    }
}

/// Hourly backups to S3 using credentials scoped to this cluster.
pub fn s3_backup_policy(bucket: &str, aws_secret: &str) -> BackupPolicy {
    BackupPolicy {
        backup_interval_in_second: BACKUP_INTERVAL_SECS,
        max_backups: MAX_BACKUPS,
        storage_type: BackupStorageType::S3,
        pv: None,
        s3: Some(S3Source {
            s3_bucket: bucket.to_string(),
            aws_secret: aws_secret.to_string(),
        }),
        cleanup_backups_on_cluster_delete: false,
    }
}

/// Hourly backups to S3 using the operator's own S3 configuration.
pub fn operator_s3_backup_policy() -> BackupPolicy {
    BackupPolicy {
        backup_interval_in_second: BACKUP_INTERVAL_SECS,
        max_backups: MAX_BACKUPS,
        storage_type: BackupStorageType::S3,
        pv: None,
        s3: None,
        cleanup_backups_on_cluster_delete: false,
    }
}

/// Copy of `policy` with cleanup-on-delete set to `cleanup`.
pub fn with_cleanup(policy: &BackupPolicy, cleanup: bool) -> BackupPolicy {
    BackupPolicy {
        cleanup_backups_on_cluster_delete: cleanup,
        ..policy.clone()
    }
}
