//! Cluster lifecycle: submit a descriptor, wait for it to converge, delete it.

use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::descriptor::ClusterDescriptor;
use crate::error::{Error, Result};
use crate::helpers::{member_url, poll_until};

use super::Context;

/// A cluster the API server accepted, with its concrete name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedCluster {
    pub name: String,
    pub descriptor: ClusterDescriptor,
}

impl ProvisionedCluster {
    /// Whether deleting this cluster should also delete its backups.
    pub fn cleanup_on_delete(&self) -> bool {
        self.descriptor
            .backup()
            .is_some_and(|b| b.cleanup_backups_on_cluster_delete)
    }
}

/// A ready member and the client URL it serves on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberEndpoint {
    pub name: String,
    pub url: String,
}

/// Submit `descriptor`. A generated identity is resolved by the API server.
pub async fn provision(ctx: &Context, descriptor: &ClusterDescriptor) -> Result<ProvisionedCluster> {
    let resource = descriptor.to_resource(ctx.api.namespace());
    let created = ctx.api.create_cluster(&resource).await?;
    let name = created.name_any();
    if name.is_empty() {
        return Err(Error::Submission {
            cluster: descriptor.identity().to_string(),
            reason: "API server returned a cluster without a name".into(),
        });
    }
    info!(cluster = %name, size = descriptor.size(), "created etcd cluster");
    Ok(ProvisionedCluster {
        name,
        descriptor: descriptor.clone(),
    })
}

/// Poll until exactly `target` members are ready and addressable.
///
/// Endpoints come back sorted by member name so callers can rely on a stable
/// first element.
pub async fn await_size(
    ctx: &Context,
    name: &str,
    target: usize,
    timeout: Duration,
) -> Result<Vec<MemberEndpoint>> {
    let api = ctx.api.as_ref();
    let found = poll_until(timeout, ctx.config.timing.poll_interval, move || async move {
        let Some(cluster) = api.get_cluster(name).await? else {
            debug!(cluster = %name, "cluster not visible yet");
            return Ok(None);
        };
        let mut ready = cluster.ready_members().to_vec();
        if ready.len() != target {
            debug!(cluster = %name, ready = ready.len(), target, "waiting for members");
            return Ok(None);
        }
        ready.sort();
        let mut endpoints = Vec::with_capacity(ready.len());
        for member in ready {
            match api.pod_ip(&member).await? {
                Some(ip) => endpoints.push(MemberEndpoint {
                    url: member_url(&ip),
                    name: member,
                }),
                None => {
                    debug!(cluster = %name, %member, "member has no pod IP yet");
                    return Ok(None);
                }
            }
        }
        Ok::<_, Error>(Some(endpoints))
    })
    .await?;

    match found {
        Some(endpoints) => {
            info!(cluster = %name, size = target, "cluster reached target size");
            Ok(endpoints)
        }
        None => Err(Error::convergence_timeout(
            name,
            format!("{target} ready members"),
            timeout,
        )),
    }
}

/// Best-effort delete. Returns `false` if the cluster was already gone.
pub async fn delete(ctx: &Context, name: &str) -> Result<bool> {
    let deleted = ctx.api.delete_cluster(name).await?;
    if deleted {
        info!(cluster = %name, "deleted etcd cluster");
    } else {
        warn!(cluster = %name, "cluster already absent");
    }
    Ok(deleted)
}
