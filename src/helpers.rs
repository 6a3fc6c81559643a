use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;

/// Client port every etcd member serves on.
pub const ETCD_CLIENT_PORT: u16 = 2379;

/// HTTP port of the backup agent sidecar.
pub const BACKUP_AGENT_PORT: u16 = 19999;

/// Label value the operator puts on backup agent pods under `app`.
pub const BACKUP_AGENT_APP: &str = "etcd_backup_tool";

/// Return the current UTC time as RFC 3339 with second precision.
pub fn utc_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

// ── Naming helpers ────────────────────────────────────────────────────────────

/// Name of the Deployment running the backup agent for a cluster.
pub fn backup_sidecar_name(cluster: &str) -> String {
    format!("{cluster}-backup-sidecar")
}

/// Name of the PVC holding volume backups for a cluster.
pub fn backup_pvc_name(cluster: &str) -> String {
    format!("{cluster}-pvc")
}

/// Labels selecting the backup agent pods of a cluster.
pub fn backup_agent_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), BACKUP_AGENT_APP.to_string()),
        ("etcd_cluster".to_string(), cluster.to_string()),
    ])
}

/// Render a label map as a `key=value,...` selector string.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Object-storage prefix under which backups of a cluster are written.
pub fn s3_backup_prefix(namespace: &str, cluster: &str) -> String {
    format!("v1/{namespace}/{cluster}")
}

/// Client URL of a member reachable at `ip`.
pub fn member_url(ip: &str) -> String {
    format!("http://{ip}:{ETCD_CLIENT_PORT}")
}

/// Base URL of a backup agent reachable at `ip`.
pub fn backup_agent_url(ip: &str) -> String {
    format!("http://{ip}:{BACKUP_AGENT_PORT}")
}

// ── Polling ───────────────────────────────────────────────────────────────────

/// Poll `check` every `interval` until it yields `Some`, or `timeout` elapses.
///
/// `check` always runs at least once. Errors from `check` abort the poll.
pub async fn poll_until<T, E, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    loop {
        if let Some(v) = check().await? {
            return Ok(Some(v));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        tokio::time::sleep(interval).await;
    }
}
