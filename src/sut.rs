//! Access to the system under test: the Kubernetes API server and the
//! resources etcd-operator creates for each cluster.

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Pod},
};
use kube::api::{Api, DeleteParams, ListParams, PostParams, ResourceExt};
use kube::Client;
use tracing::debug;

use crate::crd::etcd_cluster::EtcdCluster;
use crate::error::{Error, Result};
use crate::helpers::{backup_agent_labels, backup_pvc_name, backup_sidecar_name, label_selector};

/// Trait abstracting the operator-facing API so tests can substitute a
/// simulated operator.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Namespace every cluster of this run lives in.
    fn namespace(&self) -> &str;

    /// Submit a cluster resource. Rejections map to [`Error::Submission`].
    async fn create_cluster(&self, cluster: &EtcdCluster) -> Result<EtcdCluster>;

    async fn get_cluster(&self, name: &str) -> Result<Option<EtcdCluster>>;

    /// Delete a cluster resource. Returns `false` when it was already absent.
    async fn delete_cluster(&self, name: &str) -> Result<bool>;

    /// IP address of a member pod, once assigned.
    async fn pod_ip(&self, pod: &str) -> Result<Option<String>>;

    /// IP address of a running backup agent pod for `cluster`.
    async fn backup_agent_ip(&self, cluster: &str) -> Result<Option<String>>;

    /// Whether the backup agent deployment of `cluster` still exists.
    async fn backup_agent_exists(&self, cluster: &str) -> Result<bool>;

    /// Whether the backup PVC of `cluster` still exists.
    async fn backup_volume_exists(&self, cluster: &str) -> Result<bool>;
}

/// Production implementation backed by a kube `Client`.
pub struct KubeClusterApi {
    client: Client,
    namespace: String,
}

impl KubeClusterApi {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn clusters(&self) -> Api<EtcdCluster> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeClusterApi {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create_cluster(&self, cluster: &EtcdCluster) -> Result<EtcdCluster> {
        match self.clusters().create(&PostParams::default(), cluster).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(resp)) => Err(Error::Submission {
                cluster: cluster
                    .metadata
                    .name
                    .clone()
                    .or_else(|| cluster.metadata.generate_name.clone())
                    .unwrap_or_default(),
                reason: format!("{} ({})", resp.message, resp.code),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<EtcdCluster>> {
        Ok(self.clusters().get_opt(name).await?)
    }

    async fn delete_cluster(&self, name: &str) -> Result<bool> {
        match self.clusters().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let e = Error::from(e);
                if e.is_not_found() {
                    Ok(false)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn pod_ip(&self, pod: &str) -> Result<Option<String>> {
        Ok(self
            .pods()
            .get_opt(pod)
            .await?
            .and_then(|p| p.status)
            .and_then(|s| s.pod_ip))
    }

    async fn backup_agent_ip(&self, cluster: &str) -> Result<Option<String>> {
        let selector = label_selector(&backup_agent_labels(cluster));
        let pods = self
            .pods()
            .list(&ListParams::default().labels(&selector))
            .await?;
        for pod in pods.items {
            let name = pod.name_any();
            let Some(status) = pod.status else { continue };
            if status.phase.as_deref() != Some("Running") {
                debug!(pod = %name, phase = ?status.phase, "backup agent not running yet");
                continue;
            }
            if let Some(ip) = status.pod_ip {
                return Ok(Some(ip));
            }
        }
        Ok(None)
    }

    async fn backup_agent_exists(&self, cluster: &str) -> Result<bool> {
        let deps: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(deps.get_opt(&backup_sidecar_name(cluster)).await?.is_some())
    }

    async fn backup_volume_exists(&self, cluster: &str) -> Result<bool> {
        let pvcs: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &self.namespace);
        // A PVC held by the protection finalizer is already on its way out.
        Ok(pvcs
            .get_opt(&backup_pvc_name(cluster))
            .await?
            .is_some_and(|pvc| pvc.metadata.deletion_timestamp.is_none()))
    }
}
