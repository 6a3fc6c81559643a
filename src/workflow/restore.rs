//! Restore orchestration: derive the restore descriptor from the original,
//! size the convergence timeout, submit and wait.
//!
//! Restoring under the source cluster's own name reuses the backup already
//! bound to that name. Restoring under a different name makes the operator
//! clone the backup into the new cluster first, which takes longer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::crd::etcd_cluster::RestorePolicy;
use crate::crd::shared::BackupStorageType;
use crate::descriptor::{with_cleanup, ClusterDescriptor, ClusterIdentity};
use crate::error::{Error, Result};

use super::lifecycle::{self, MemberEndpoint};
use super::storage::StorageVerificationHandle;
use super::teardown::ClusterLease;
use super::Context;

/// Convergence budget for a restore that reuses the source's identity.
pub const RESTORE_BASE_WAIT: Duration = Duration::from_secs(60);

/// Extra budget for cloning backup data into a new identity.
pub const DATA_CLONE_EXTRA_WAIT: Duration = Duration::from_secs(60);

pub fn calculate_restore_wait_time(needs_clone: bool) -> Duration {
    if needs_clone {
        RESTORE_BASE_WAIT + DATA_CLONE_EXTRA_WAIT
    } else {
        RESTORE_BASE_WAIT
    }
}

/// Derive the descriptor that restores `source_name`'s backup.
///
/// Without a clone the identity is pinned to `source_name` so the operator
/// finds the existing backup by name. With a clone the original identity is
/// kept and the restore policy points across to the source. Either way the
/// restored cluster cleans up its backups when deleted.
pub fn build_restore_descriptor(
    original: &ClusterDescriptor,
    needs_clone: bool,
    source_name: &str,
    storage_type: BackupStorageType,
) -> Result<ClusterDescriptor> {
    let backup = original.backup().ok_or_else(|| {
        Error::invalid_descriptor("cannot restore a cluster that had no backup policy")
    })?;

    let mut builder = original
        .to_builder()
        .backup(with_cleanup(backup, true))
        .restore(RestorePolicy {
            backup_cluster_name: source_name.to_string(),
            storage_type,
        });
    if !needs_clone {
        builder = builder.identity(ClusterIdentity::Fixed(source_name.to_string()));
    } else if original.identity().fixed_name() == Some(source_name) {
        return Err(Error::invalid_descriptor(format!(
            "a cloning restore needs an identity distinct from its source {source_name}"
        )));
    }
    builder.build()
}

/// A restored cluster that reached its size, still owned by its lease.
pub struct RestoredCluster {
    pub lease: ClusterLease,
    pub endpoints: Vec<MemberEndpoint>,
    pub timeout: Duration,
}

/// A restore that failed, named after the cluster it was creating.
///
/// `cluster` is the concrete name once the API server accepted the restore,
/// or the requested identity if submission itself failed.
#[derive(Debug)]
pub struct RestoreFailure {
    pub cluster: String,
    pub error: Error,
}

impl std::fmt::Display for RestoreFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "restore into {}: {}", self.cluster, self.error)
    }
}

/// Submit `descriptor` and wait for it to converge within the restore budget.
///
/// The cluster is leased as soon as it is accepted; if it never converges the
/// lease is released here before the timeout is returned.
pub async fn execute(
    ctx: &Arc<Context>,
    descriptor: &ClusterDescriptor,
    needs_clone: bool,
    handle: StorageVerificationHandle,
) -> Result<RestoredCluster, RestoreFailure> {
    let timeout = calculate_restore_wait_time(needs_clone);
    let cluster = lifecycle::provision(ctx, descriptor)
        .await
        .map_err(|error| RestoreFailure {
            cluster: descriptor.identity().to_string(),
            error,
        })?;
    info!(
        cluster = %cluster.name,
        source = descriptor.restore().map(|r| r.backup_cluster_name.as_str()).unwrap_or_default(),
        needs_clone,
        ?timeout,
        "submitted restore"
    );

    let name = cluster.name.clone();
    let lease = ClusterLease::new(ctx.clone(), cluster, handle);
    let target = usize::try_from(descriptor.size()).unwrap_or_default();
    match lifecycle::await_size(ctx, &name, target, timeout).await {
        Ok(endpoints) => Ok(RestoredCluster {
            lease,
            endpoints,
            timeout,
        }),
        Err(error) => {
            if let Err(release_err) = lease.release().await {
                warn!(cluster = %name, error = %release_err, "teardown failed after restore timeout");
            }
            Err(RestoreFailure {
                cluster: name,
                error,
            })
        }
    }
}
