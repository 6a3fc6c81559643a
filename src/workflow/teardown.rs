//! Teardown: delete a cluster, check that its backups followed the
//! cleanup-on-delete flag, and guarantee that provisioned clusters are torn
//! down on every exit path.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::helpers::poll_until;

use super::lifecycle::{self, ProvisionedCluster};
use super::storage::StorageVerificationHandle;
use super::Context;

/// Delete `cluster` and verify what happened to its backups.
///
/// With cleanup-on-delete set the artifacts must disappear within the
/// teardown timeout; without it they must still be there once the backup
/// agent is gone.
pub async fn delete_and_verify(
    ctx: &Context,
    cluster: &ProvisionedCluster,
    handle: &StorageVerificationHandle,
) -> Result<()> {
    lifecycle::delete(ctx, &cluster.name).await?;
    verify_deleted(ctx, cluster, handle).await
}

/// The verification half of [`delete_and_verify`], for a delete already issued.
async fn verify_deleted(
    ctx: &Context,
    cluster: &ProvisionedCluster,
    handle: &StorageVerificationHandle,
) -> Result<()> {
    let name = cluster.name.as_str();
    let api = ctx.api.as_ref();
    let timing = &ctx.config.timing;

    let gone = poll_until(timing.teardown_timeout, timing.poll_interval, move || async move {
        let cluster_gone = api.get_cluster(name).await?.is_none();
        let agent_gone = !api.backup_agent_exists(name).await?;
        Ok::<_, Error>((cluster_gone && agent_gone).then_some(()))
    })
    .await?;
    if gone.is_none() {
        return Err(Error::teardown(
            name,
            format!(
                "cluster or backup agent still present after {:?}",
                timing.teardown_timeout
            ),
        ));
    }

    if cluster.descriptor.backup().is_none() {
        return Ok(());
    }

    if cluster.cleanup_on_delete() {
        let removed = poll_until(timing.teardown_timeout, timing.poll_interval, move || async move {
            Ok::<_, Error>((!handle.backup_exists(api, name).await?).then_some(()))
        })
        .await?;
        if removed.is_none() {
            return Err(Error::teardown(
                name,
                format!(
                    "{} backup artifacts still present although cleanup-on-delete is set",
                    handle.storage_type()
                ),
            ));
        }
        info!(cluster = %name, "backup artifacts removed with cluster");
    } else if handle.backup_exists(api, name).await? {
        info!(cluster = %name, "backup artifacts preserved");
    } else {
        return Err(Error::teardown(
            name,
            format!(
                "{} backup artifacts removed although cleanup-on-delete is unset",
                handle.storage_type()
            ),
        ));
    }
    Ok(())
}

// ── ClusterLease ────────────────────────────────────────────────────────────

/// Ownership of a provisioned cluster.
///
/// [`ClusterLease::release`] deletes and verifies. A lease dropped without
/// being released (e.g. the owning task was cancelled) spawns a best-effort
/// delete on the current runtime.
pub struct ClusterLease {
    ctx: Arc<Context>,
    cluster: ProvisionedCluster,
    handle: StorageVerificationHandle,
    released: bool,
}

impl ClusterLease {
    pub fn new(
        ctx: Arc<Context>,
        cluster: ProvisionedCluster,
        handle: StorageVerificationHandle,
    ) -> Self {
        Self {
            ctx,
            cluster,
            handle,
            released: false,
        }
    }

    pub fn cluster(&self) -> &ProvisionedCluster {
        &self.cluster
    }

    /// Delete and verify. Until the delete has been issued the lease stays
    /// armed, so dropping this future early still falls back to the
    /// background delete.
    pub async fn release(mut self) -> Result<()> {
        lifecycle::delete(&self.ctx, &self.cluster.name).await?;
        self.released = true;
        verify_deleted(&self.ctx, &self.cluster, &self.handle).await
    }
}

impl Drop for ClusterLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let name = self.cluster.name.clone();
        let api = self.ctx.api.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                warn!(cluster = %name, "lease dropped without release, deleting in background");
                rt.spawn(async move {
                    if let Err(e) = api.delete_cluster(&name).await {
                        warn!(cluster = %name, %e, "background delete failed");
                    }
                });
            }
            Err(_) => warn!(cluster = %name, "lease dropped outside a runtime, cluster leaked"),
        }
    }
}

/// Result of a leased body plus the release that always followed it.
#[must_use]
pub struct Scoped<T, E> {
    pub body: std::result::Result<T, E>,
    pub release: Result<()>,
}

impl<T, E: std::fmt::Display> Scoped<T, E> {
    /// Collapse into one result. A body failure wins; a release failure that
    /// follows it is logged.
    pub fn into_result(self, map_release: impl FnOnce(Error) -> E) -> std::result::Result<T, E> {
        match (self.body, self.release) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => Err(map_release(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(error = %release_err, "teardown failed after an earlier failure");
                Err(e)
            }
        }
    }
}

/// Run `body` against the leased cluster, then release the lease whether
/// the body succeeded, failed or panicked. Panics resume after release.
pub async fn with_lease<T, E, F, Fut>(lease: ClusterLease, body: F) -> Scoped<T, E>
where
    F: FnOnce(ProvisionedCluster) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let outcome = AssertUnwindSafe(body(lease.cluster().clone()))
        .catch_unwind()
        .await;
    let release = lease.release().await;
    match outcome {
        Ok(body) => Scoped { body, release },
        Err(panic) => {
            if let Err(e) = release {
                warn!(error = %e, "teardown failed while unwinding");
            }
            std::panic::resume_unwind(panic)
        }
    }
}
