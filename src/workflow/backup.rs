//! Backup orchestration: wait for the backup agent, ask it for a backup, and
//! optionally wait until the artifact shows up in storage.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::helpers::{backup_agent_url, poll_until};

use super::storage::StorageVerificationHandle;
use super::Context;

/// Poll until a running backup agent pod with an address exists.
/// Returns the agent's base URL.
pub async fn await_backup_agent_ready(
    ctx: &Context,
    cluster: &str,
    timeout: Duration,
) -> Result<String> {
    let api = ctx.api.as_ref();
    let ip = poll_until(timeout, ctx.config.timing.poll_interval, move || async move {
        let ip = api.backup_agent_ip(cluster).await?;
        if ip.is_none() {
            debug!(%cluster, "backup agent not ready");
        }
        Ok::<_, Error>(ip)
    })
    .await?
    .ok_or_else(|| Error::convergence_timeout(cluster, "backup agent readiness", timeout))?;

    info!(%cluster, agent = %ip, "backup agent is up");
    Ok(backup_agent_url(&ip))
}

/// Ask the agent at `agent_url` (as returned by
/// [`await_backup_agent_ready`]) for an immediate backup. Acceptance of the
/// request is all this step checks; see [`confirm_backup`] for the artifact.
pub async fn trigger_backup(ctx: &Context, cluster: &str, agent_url: &str) -> Result<()> {
    ctx.transport
        .request_backup(agent_url)
        .await
        .map_err(|e| Error::BackupRequest {
            cluster: cluster.into(),
            reason: e.to_string(),
        })?;
    info!(%cluster, agent = %agent_url, "backup requested");
    Ok(())
}

/// Poll until the storage backend reports a backup of `cluster` written by
/// the agent at `agent_url`.
pub async fn confirm_backup(
    ctx: &Context,
    cluster: &str,
    agent_url: &str,
    handle: &StorageVerificationHandle,
    timeout: Duration,
) -> Result<()> {
    let api = ctx.api.as_ref();
    let transport = ctx.transport.as_ref();
    let found = poll_until(timeout, ctx.config.timing.poll_interval, move || async move {
        let written = handle
            .backup_written(api, transport, cluster, agent_url)
            .await?;
        Ok::<_, Error>(written.then_some(()))
    })
    .await?;
    if found.is_none() {
        return Err(Error::convergence_timeout(
            cluster,
            format!("{} backup artifact", handle.storage_type()),
            timeout,
        ));
    }
    info!(%cluster, storage = %handle.storage_type(), "backup artifact present");
    Ok(())
}
