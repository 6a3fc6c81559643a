use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// BackupStorageType selects where the backup agent writes its artifacts.
///
/// `Default` serialises as the empty string and is treated by the operator as
/// a persistent volume.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum BackupStorageType {
    #[default]
    #[serde(rename = "")]
    Default,
    #[serde(rename = "PersistentVolume")]
    PersistentVolume,
    #[serde(rename = "S3")]
    S3,
}

impl BackupStorageType {
    /// Whether a backup written with `self` can be restored by a policy naming `other`.
    pub fn is_compatible_with(self, other: BackupStorageType) -> bool {
        (self.is_volume() && other.is_volume()) || self == other
    }

    pub fn is_volume(self) -> bool {
        matches!(self, Self::Default | Self::PersistentVolume)
    }
}

impl std::fmt::Display for BackupStorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::PersistentVolume => f.write_str("PersistentVolume"),
            Self::S3 => f.write_str("S3"),
        }
    }
}

/// PvSource sizes the persistent volume the backup agent writes to.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PvSource {
    #[serde(rename = "volumeSizeInMB")]
    pub volume_size_in_mb: i32,
}

/// S3Source holds per-cluster S3 credentials. Absent when the operator's own
/// (operator-wide) S3 configuration should be used.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct S3Source {
    #[serde(rename = "s3Bucket")]
    pub s3_bucket: String,
    #[serde(rename = "awsSecret")]
    pub aws_secret: String,
}

/// MembersStatus lists member pod names by readiness.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MembersStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ready: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unready: Vec<String>,
}
