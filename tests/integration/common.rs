//! Shared test harness: a simulated etcd-operator, plus an envtest API
//! server for the production Kubernetes adapter.
//!
//! `SimOperator` stands in for both the API server and the member data
//! plane. It converges clusters after a configurable number of status polls,
//! keeps backups on simulated PVCs or in an in-memory object store, and
//! restores (or clones) them into new clusters the way the real operator
//! does.  Knobs on `Behaviour` make it misbehave for failure-path tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use envtest::Environment;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config, CustomResourceExt};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

use etcd_restore_e2e::config::{RunnerConfig, S3Settings, Timing};
use etcd_restore_e2e::crd::etcd_cluster::{EtcdCluster, EtcdClusterPhase, EtcdClusterStatus};
use etcd_restore_e2e::crd::shared::{BackupStorageType, MembersStatus};
use etcd_restore_e2e::error::{Error, Result};
use etcd_restore_e2e::helpers::{backup_agent_url, member_url, s3_backup_prefix};
use etcd_restore_e2e::sut::{ClusterApi, KubeClusterApi};
use etcd_restore_e2e::transport::{BackupServiceStatus, MemberTransport, RecentBackup};
use etcd_restore_e2e::workflow::backup::{await_backup_agent_ready, trigger_backup};
use etcd_restore_e2e::workflow::storage::ObjectStorageHandle;
use etcd_restore_e2e::workflow::Context;

pub const NAMESPACE: &str = "e2e";
pub const BUCKET: &str = "test-bucket";

/// Knobs that make the simulated operator misbehave.
#[derive(Clone, Debug)]
pub struct Behaviour {
    /// Status polls before members report ready.
    pub ready_after_polls: u32,
    /// Members never become ready.
    pub never_ready: bool,
    /// The backup agent pod never reaches Running.
    pub agent_never_up: bool,
    /// The backup agent answers backup requests with an error.
    pub reject_backups: bool,
    /// Backups vanish on delete even without cleanup-on-delete.
    pub always_drop_backups: bool,
    /// Backups survive delete even with cleanup-on-delete.
    pub never_drop_backups: bool,
    /// Restored clusters come up empty.
    pub lose_data_on_restore: bool,
    /// The backup agent accepts backup requests but never writes anything.
    pub discard_backups: bool,
    /// Clusters carrying a restore policy are rejected at submission.
    pub reject_restores: bool,
    /// Time the API server takes to act on a delete.
    pub delete_delay: Duration,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            ready_after_polls: 2,
            never_ready: false,
            agent_never_up: false,
            reject_backups: false,
            always_drop_backups: false,
            never_drop_backups: false,
            lose_data_on_restore: false,
            discard_backups: false,
            reject_restores: false,
            delete_delay: Duration::ZERO,
        }
    }
}

struct SimCluster {
    resource: EtcdCluster,
    index: usize,
    polls: u32,
    data: BTreeMap<String, String>,
    /// Backups the agent of this cluster has written.
    backups_taken: u32,
}

#[derive(Default)]
struct SimState {
    next_index: usize,
    clusters: BTreeMap<String, SimCluster>,
    /// Backup PVCs that exist, by cluster name.
    volumes: BTreeSet<String>,
    /// Backed-up key/value data, by source cluster name.
    backups: BTreeMap<String, BTreeMap<String, String>>,
    /// Every cluster name ever created, in order.
    created: Vec<String>,
    deleted: Vec<String>,
    clones: u32,
    backup_requests: u32,
}

pub struct SimOperator {
    pub behaviour: Behaviour,
    pub store: Arc<InMemory>,
    state: Mutex<SimState>,
}

impl SimOperator {
    pub fn new() -> Arc<Self> {
        Self::with_behaviour(Behaviour::default())
    }

    pub fn with_behaviour(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            store: Arc::new(InMemory::new()),
            state: Mutex::new(SimState::default()),
        })
    }

    pub fn clone_count(&self) -> u32 {
        self.state.lock().unwrap().clones
    }

    pub fn backup_requests(&self) -> u32 {
        self.state.lock().unwrap().backup_requests
    }

    pub fn live_clusters(&self) -> Vec<String> {
        self.state.lock().unwrap().clusters.keys().cloned().collect()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn has_volume(&self, cluster: &str) -> bool {
        self.state.lock().unwrap().volumes.contains(cluster)
    }

    pub async fn s3_objects(&self, cluster: &str) -> usize {
        let prefix = Path::from(s3_backup_prefix(NAMESPACE, cluster));
        self.store.list(Some(&prefix)).count().await
    }

    /// Write `key=value` directly into a live cluster.
    pub fn put_direct(&self, cluster: &str, key: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.clusters.get_mut(cluster) {
            c.data.insert(key.into(), value.into());
        }
    }

    fn member_names(name: &str, size: i32) -> Vec<String> {
        (0..size).map(|i| format!("{name}-{i:04}")).collect()
    }

    fn member_ip(index: usize, member: usize) -> String {
        format!("10.0.{index}.{member}")
    }

    fn agent_ip(index: usize) -> String {
        format!("10.1.{index}.1")
    }

    fn storage_type(resource: &EtcdCluster) -> Option<BackupStorageType> {
        resource.spec.backup.as_ref().map(|b| b.storage_type)
    }

    /// Find the cluster whose backup agent serves `agent_url`.
    fn cluster_for_agent<'a>(
        state: &'a mut SimState,
        agent_url: &str,
    ) -> Result<(&'a String, &'a mut SimCluster)> {
        state
            .clusters
            .iter_mut()
            .find(|(_, c)| {
                c.resource.spec.backup.is_some()
                    && backup_agent_url(&Self::agent_ip(c.index)) == agent_url
            })
            .ok_or_else(|| Error::config(format!("connection refused: {agent_url}")))
    }

    /// Find the cluster whose member serves `endpoint`.
    fn cluster_for_endpoint<'a>(state: &'a mut SimState, endpoint: &str) -> Option<&'a mut SimCluster> {
        state.clusters.values_mut().find(|c| {
            (0..c.resource.spec.size as usize)
                .any(|m| member_url(&Self::member_ip(c.index, m)) == endpoint)
        })
    }
}

#[async_trait::async_trait]
impl ClusterApi for SimOperator {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    async fn create_cluster(&self, cluster: &EtcdCluster) -> Result<EtcdCluster> {
        let mut state = self.state.lock().unwrap();
        let index = state.next_index;
        let name = match (&cluster.metadata.name, &cluster.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => format!("{prefix}{index:05}"),
            (None, None) => {
                return Err(Error::Submission {
                    cluster: String::new(),
                    reason: "name or generateName is required".into(),
                })
            }
        };
        if state.clusters.contains_key(&name) {
            return Err(Error::Submission {
                cluster: name.clone(),
                reason: format!("etcdclusters \"{name}\" already exists (409)"),
            });
        }
        state.next_index += 1;

        let mut resource = cluster.clone();
        resource.metadata.name = Some(name.clone());
        resource.metadata.generate_name = None;

        let mut data = BTreeMap::new();
        if let Some(ref restore) = resource.spec.restore {
            if self.behaviour.reject_restores {
                return Err(Error::Submission {
                    cluster: name,
                    reason: "admission webhook denied the restore".into(),
                });
            }
            match state.backups.get(&restore.backup_cluster_name) {
                Some(backup) if !self.behaviour.lose_data_on_restore => data = backup.clone(),
                Some(_) => {}
                None => {
                    return Err(Error::Submission {
                        cluster: name,
                        reason: format!("no backup of {} found", restore.backup_cluster_name),
                    })
                }
            }
            if restore.backup_cluster_name != name {
                state.clones += 1;
            }
        }
        if Self::storage_type(&resource).is_some_and(BackupStorageType::is_volume) {
            state.volumes.insert(name.clone());
        }

        state.created.push(name.clone());
        state.clusters.insert(
            name,
            SimCluster {
                resource: resource.clone(),
                index,
                polls: 0,
                data,
                backups_taken: 0,
            },
        );
        Ok(resource)
    }

    async fn get_cluster(&self, name: &str) -> Result<Option<EtcdCluster>> {
        let mut state = self.state.lock().unwrap();
        let behaviour = &self.behaviour;
        Ok(state.clusters.get_mut(name).map(|c| {
            c.polls += 1;
            let ready = !behaviour.never_ready && c.polls > behaviour.ready_after_polls;
            let members = Self::member_names(name, c.resource.spec.size);
            let mut resource = c.resource.clone();
            resource.status = Some(EtcdClusterStatus {
                phase: Some(if ready {
                    EtcdClusterPhase::Running
                } else {
                    EtcdClusterPhase::Creating
                }),
                size: c.resource.spec.size,
                members: if ready {
                    MembersStatus {
                        ready: members,
                        unready: vec![],
                    }
                } else {
                    MembersStatus {
                        ready: vec![],
                        unready: members,
                    }
                },
                ..Default::default()
            });
            resource
        }))
    }

    async fn delete_cluster(&self, name: &str) -> Result<bool> {
        if !self.behaviour.delete_delay.is_zero() {
            tokio::time::sleep(self.behaviour.delete_delay).await;
        }
        let removed = {
            let mut state = self.state.lock().unwrap();
            let Some(cluster) = state.clusters.remove(name) else {
                return Ok(false);
            };
            state.deleted.push(name.to_string());
            cluster
        };

        let cleanup = removed
            .resource
            .spec
            .backup
            .as_ref()
            .is_some_and(|b| b.cleanup_backups_on_cluster_delete);
        let drop_backups = !self.behaviour.never_drop_backups
            && (cleanup || self.behaviour.always_drop_backups);
        if drop_backups {
            {
                let mut state = self.state.lock().unwrap();
                state.volumes.remove(name);
                state.backups.remove(name);
            }
            let prefix = Path::from(s3_backup_prefix(NAMESPACE, name));
            let keys: Vec<Path> = self
                .store
                .list(Some(&prefix))
                .filter_map(|m| async move { m.ok().map(|m| m.location) })
                .collect()
                .await;
            for key in keys {
                self.store.delete(&key).await?;
            }
        }
        Ok(true)
    }

    async fn pod_ip(&self, pod: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.clusters.iter().find_map(|(name, c)| {
            Self::member_names(name, c.resource.spec.size)
                .iter()
                .position(|m| m == pod)
                .map(|i| Self::member_ip(c.index, i))
        }))
    }

    async fn backup_agent_ip(&self, cluster: &str) -> Result<Option<String>> {
        if self.behaviour.agent_never_up {
            return Ok(None);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .clusters
            .get(cluster)
            .filter(|c| c.resource.spec.backup.is_some())
            .map(|c| Self::agent_ip(c.index)))
    }

    async fn backup_agent_exists(&self, cluster: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .clusters
            .get(cluster)
            .is_some_and(|c| c.resource.spec.backup.is_some()))
    }

    async fn backup_volume_exists(&self, cluster: &str) -> Result<bool> {
        Ok(self.has_volume(cluster))
    }
}

#[async_trait::async_trait]
impl MemberTransport for SimOperator {
    async fn put(&self, endpoint: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let cluster = Self::cluster_for_endpoint(&mut state, endpoint)
            .ok_or_else(|| Error::config(format!("connection refused: {endpoint}")))?;
        cluster.data.insert(key.into(), value.into());
        Ok(())
    }

    async fn get(&self, endpoint: &str, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        let cluster = Self::cluster_for_endpoint(&mut state, endpoint)
            .ok_or_else(|| Error::config(format!("connection refused: {endpoint}")))?;
        Ok(cluster.data.get(key).cloned())
    }

    async fn request_backup(&self, agent_url: &str) -> Result<()> {
        if self.behaviour.reject_backups {
            return Err(Error::config("backup agent returned 500"));
        }
        let (name, storage) = {
            let mut state = self.state.lock().unwrap();
            state.backup_requests += 1;
            let discard = self.behaviour.discard_backups;
            let (name, cluster) = Self::cluster_for_agent(&mut state, agent_url)?;
            let (name, data) = (name.clone(), cluster.data.clone());
            let storage = Self::storage_type(&cluster.resource);
            if discard {
                return Ok(());
            }
            cluster.backups_taken += 1;
            state.backups.insert(name.clone(), data);
            (name, storage)
        };
        if storage == Some(BackupStorageType::S3) {
            let key = Path::from(format!("{}/backup-0001", s3_backup_prefix(NAMESPACE, &name)));
            self.store
                .put(&key, PutPayload::from_static(b"snapshot"))
                .await?;
        }
        Ok(())
    }

    async fn backup_status(&self, agent_url: &str) -> Result<BackupServiceStatus> {
        let mut state = self.state.lock().unwrap();
        let (_, cluster) = Self::cluster_for_agent(&mut state, agent_url)?;
        Ok(BackupServiceStatus {
            backups: cluster.backups_taken,
            recent_backup: (cluster.backups_taken > 0).then(|| RecentBackup {
                creation_time: "2026-01-01T00:00:00Z".into(),
                size: 8,
                revision: 2,
            }),
        })
    }
}

/// Timings small enough for the simulated operator.
pub fn fast_timing() -> Timing {
    Timing {
        poll_interval: Duration::from_millis(5),
        create_timeout: Duration::from_secs(2),
        backup_agent_timeout: Duration::from_millis(200),
        backup_confirm_timeout: Duration::from_millis(200),
        settle_delay: Duration::from_millis(10),
        teardown_timeout: Duration::from_millis(200),
    }
}

/// Config with every scenario enabled against the simulated operator.
pub fn test_config() -> RunnerConfig {
    RunnerConfig {
        namespace: NAMESPACE.into(),
        aws_test_enabled: true,
        s3: Some(S3Settings {
            bucket: BUCKET.into(),
            aws_secret: "aws-credentials".into(),
        }),
        timing: fast_timing(),
        ..Default::default()
    }
}

pub fn test_context(sim: &Arc<SimOperator>, config: RunnerConfig) -> Arc<Context> {
    Arc::new(Context {
        api: sim.clone(),
        transport: sim.clone(),
        object_storage: Some(ObjectStorageHandle::new(sim.store.clone(), BUCKET)),
        config,
    })
}

/// Wait for the backup agent of `cluster` and request a backup from it.
pub async fn backup_now(ctx: &Context, cluster: &str) -> Result<String> {
    let agent = await_backup_agent_ready(ctx, cluster, fast_timing().backup_agent_timeout).await?;
    trigger_backup(ctx, cluster, &agent).await?;
    Ok(agent)
}

/// Poll `check` every few milliseconds for up to a second.
pub async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared API server (one envtest server per test binary)
// ═══════════════════════════════════════════════════════════════════════════════

/// Counter for generating unique namespace names.
static NS_COUNTER: AtomicU32 = AtomicU32::new(0);

/// The envtest server, a kube Client, and the runtime that keeps the client's
/// connections alive across individual `#[tokio::test]` runtimes.
struct SharedApiServer {
    client: Client,
    _runtime: tokio::runtime::Runtime,
    _server: envtest::Server,
}

// SAFETY: envtest::Server only holds the kubeconfig of the spawned server.
unsafe impl Send for SharedApiServer {}
unsafe impl Sync for SharedApiServer {}

static API_SERVER: OnceLock<SharedApiServer> = OnceLock::new();

fn init_api_server() -> SharedApiServer {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build shared runtime");

    let (client, server) = rt.block_on(async {
        let mut env = Environment::default();
        let env = env
            .with_crds(vec![EtcdCluster::crd()])
            .expect("failed to configure CRDs");

        let server = env.create().expect("failed to start envtest server");
        let kubeconfig = server.kubeconfig().expect("failed to get kubeconfig");
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .expect("failed to build config");
        let client = Client::try_from(config).expect("failed to create client");
        (client, server)
    });

    SharedApiServer {
        client,
        _runtime: rt,
        _server: server,
    }
}

/// Started on its own OS thread so `block_on` never runs inside a test runtime.
fn api_server() -> &'static SharedApiServer {
    API_SERVER.get_or_init(|| {
        std::thread::spawn(init_api_server)
            .join()
            .expect("API server init thread panicked")
    })
}

/// A fresh namespace on the shared API server and an adapter bound to it.
pub struct ApiNamespace {
    pub client: Client,
    pub ns: String,
    pub api: KubeClusterApi,
}

impl ApiNamespace {
    pub async fn create() -> Self {
        let client = api_server().client.clone();
        let id = NS_COUNTER.fetch_add(1, Ordering::SeqCst);
        let ns = format!("e2e-{id}");

        let namespaces: Api<Namespace> = Api::all(client.clone());
        let obj: Namespace = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": &ns }
        }))
        .unwrap();
        namespaces
            .create(&PostParams::default(), &obj)
            .await
            .expect("failed to create test namespace");

        Self {
            api: KubeClusterApi::new(client.clone(), ns.clone()),
            client,
            ns,
        }
    }

    /// Typed API for core resources in this namespace.
    pub fn typed<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.ns)
    }
}
