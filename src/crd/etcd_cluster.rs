use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::shared::{BackupStorageType, MembersStatus, PvSource, S3Source};

// ── Spec sub-types ────────────────────────────────────────────────────────────

/// BackupPolicy configures the operator's backup agent for a cluster.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupPolicy {
    #[serde(default)]
    pub backup_interval_in_second: i32,

    #[serde(default)]
    pub max_backups: i32,

    #[serde(default)]
    pub storage_type: BackupStorageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv: Option<PvSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Source>,

    /// When set, deleting the cluster also deletes its backup artifacts.
    #[serde(default)]
    pub cleanup_backups_on_cluster_delete: bool,
}

/// RestorePolicy seeds a new cluster from the backup of `backup_cluster_name`.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestorePolicy {
    pub backup_cluster_name: String,
    #[serde(default)]
    pub storage_type: BackupStorageType,
}

// ── CRD ───────────────────────────────────────────────────────────────────────

/// EtcdCluster is the resource reconciled by etcd-operator.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "etcd.database.coreos.com",
    version = "v1beta2",
    kind = "EtcdCluster",
    shortname = "etcd",
    namespaced,
    status = "EtcdClusterStatus",
    printcolumn = r#"{"name": "Size", "type": "integer", "jsonPath": ".spec.size"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterSpec {
    pub size: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestorePolicy>,
}

/// EtcdClusterPhase mirrors the operator's coarse cluster phase.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum EtcdClusterPhase {
    Creating,
    Running,
    Failed,
}

/// EtcdClusterStatus is the observed state reported by the operator.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<EtcdClusterPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default)]
    pub size: i32,

    #[serde(default)]
    pub members: MembersStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
}

impl EtcdCluster {
    /// Names of members the operator reports as ready.
    pub fn ready_members(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.members.ready.as_slice())
            .unwrap_or(&[])
    }
}
