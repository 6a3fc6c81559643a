//! Data-plane transport to etcd members and backup agents.

use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Trait abstracting the HTTP calls made against cluster members so tests
/// can substitute an in-memory data plane.
#[async_trait::async_trait]
pub trait MemberTransport: Send + Sync {
    /// Write `key=value` through the member at `endpoint`.
    async fn put(&self, endpoint: &str, key: &str, value: &str) -> Result<()>;

    /// Read `key` through the member at `endpoint`. `None` when absent.
    async fn get(&self, endpoint: &str, key: &str) -> Result<Option<String>>;

    /// Ask the backup agent at `agent_url` to take a backup now.
    async fn request_backup(&self, agent_url: &str) -> Result<()>;

    /// What the backup agent at `agent_url` has written so far.
    async fn backup_status(&self, agent_url: &str) -> Result<BackupServiceStatus>;
}

/// Body of the backup agent's `GET /v1/status`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupServiceStatus {
    /// Backups currently retained by the agent.
    #[serde(default)]
    pub backups: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_backup: Option<RecentBackup>,
}

impl BackupServiceStatus {
    /// Whether the agent has completed at least one backup.
    pub fn has_backup(&self) -> bool {
        self.backups > 0 || self.recent_backup.is_some()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecentBackup {
    #[serde(default)]
    pub creation_time: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub revision: i64,
}

#[derive(Serialize)]
struct PutRequest {
    key: ByteString,
    value: ByteString,
}

#[derive(Serialize)]
struct RangeRequest {
    key: ByteString,
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Deserialize)]
struct KeyValue {
    #[serde(default)]
    value: Option<ByteString>,
}

/// Production implementation speaking the etcd v3 JSON gateway and the
/// backup agent's HTTP API.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl MemberTransport for HttpTransport {
    async fn put(&self, endpoint: &str, key: &str, value: &str) -> Result<()> {
        let body = PutRequest {
            key: ByteString(key.as_bytes().to_vec()),
            value: ByteString(value.as_bytes().to_vec()),
        };
        self.http
            .post(format!("{endpoint}/v3/kv/put"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn get(&self, endpoint: &str, key: &str) -> Result<Option<String>> {
        let body = RangeRequest {
            key: ByteString(key.as_bytes().to_vec()),
        };
        let resp: RangeResponse = self
            .http
            .post(format!("{endpoint}/v3/kv/range"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp
            .kvs
            .into_iter()
            .next()
            .map(|kv| {
                kv.value
                    .map(|v| String::from_utf8_lossy(&v.0).into_owned())
                    .unwrap_or_default()
            }))
    }

    async fn request_backup(&self, agent_url: &str) -> Result<()> {
        self.http
            .get(format!("{agent_url}/v1/backupnow"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn backup_status(&self, agent_url: &str) -> Result<BackupServiceStatus> {
        Ok(self
            .http
            .get(format!("{agent_url}/v1/status"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
