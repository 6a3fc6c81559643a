//! Scenario runner: the end-to-end restore scenarios, their skip
//! conditions, and sequential or parallel execution.
//!
//! One scenario is:
//!
//! 1. provision a 3-member cluster with a backup policy and wait for it,
//! 2. seed `foo=bar` on the first member,
//! 3. wait for the backup agent, request a backup (and confirm the artifact),
//! 4. delete the cluster and check its backup survived,
//! 5. settle, then restore under the same or a new name,
//! 6. wait for 3 members and read `foo` back from the first one,
//! 7. delete the restored cluster and check its backup was cleaned up.
//!
//! Provisioned clusters are leased, so steps 4 and 7 also run when anything
//! before them fails.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, Instrument};

use crate::config::RunnerConfig;
use crate::crd::etcd_cluster::BackupPolicy;
use crate::descriptor::{
    operator_s3_backup_policy, pv_backup_policy, s3_backup_policy, ClusterDescriptor,
};
use crate::error::{Error, Result};
use crate::helpers::utc_now;

use super::storage::select_handle;
use super::teardown::{with_lease, ClusterLease};
use super::{backup, lifecycle, probe, restore, Context};

/// Name prefix of every cluster the runner creates.
pub const CLUSTER_PREFIX: &str = "test-etcd-";
pub const CLUSTER_SIZE: i32 = 3;

/// Where a scenario's backups go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    PersistentVolume,
    /// S3 with credentials scoped to the cluster.
    S3PerCluster,
    /// S3 with the operator's own credentials.
    S3OperatorWide,
}

impl BackendKind {
    pub fn needs_aws(self) -> bool {
        !matches!(self, Self::PersistentVolume)
    }

    fn slug(self) -> &'static str {
        match self {
            Self::PersistentVolume => "pv",
            Self::S3PerCluster => "s3-per-cluster",
            Self::S3OperatorWide => "s3-operator-wide",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub backend: BackendKind,
    /// Restore under a new name, which makes the operator clone the data.
    pub needs_clone: bool,
}

impl Scenario {
    pub fn new(backend: BackendKind, needs_clone: bool) -> Self {
        let target = if needs_clone { "different-name" } else { "same-name" };
        Self {
            name: format!("restore/{}/{target}", backend.slug()),
            backend,
            needs_clone,
        }
    }

    /// Every scenario the suite knows about.
    pub fn catalog() -> Vec<Scenario> {
        vec![
            Scenario::new(BackendKind::PersistentVolume, false),
            Scenario::new(BackendKind::PersistentVolume, true),
            Scenario::new(BackendKind::S3PerCluster, false),
            Scenario::new(BackendKind::S3OperatorWide, false),
            Scenario::new(BackendKind::S3PerCluster, true),
            Scenario::new(BackendKind::S3OperatorWide, true),
        ]
    }

    fn backup_policy(&self, ctx: &Context) -> Result<BackupPolicy> {
        match self.backend {
            BackendKind::PersistentVolume => Ok(pv_backup_policy()),
            BackendKind::S3OperatorWide => Ok(operator_s3_backup_policy()),
            BackendKind::S3PerCluster => {
                let s3 = ctx.config.s3.as_ref().filter(|s| !s.aws_secret.is_empty());
                let s3 = s3.ok_or_else(|| {
                    Error::config("per-cluster S3 scenarios need a bucket and an AWS secret")
                })?;
                Ok(s3_backup_policy(&s3.bucket, &s3.aws_secret))
            }
        }
    }
}

// ── Reports ─────────────────────────────────────────────────────────────────

/// The step a scenario was in when it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Provision,
    AwaitSize,
    Seed,
    AwaitBackupAgent,
    TriggerBackup,
    ConfirmBackup,
    Teardown,
    Restore,
    AwaitRestore,
    Verify,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A failure tagged with where it happened.
#[derive(Debug)]
pub struct StepError {
    pub phase: Phase,
    pub cluster: Option<String>,
    pub source: Error,
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cluster {
            Some(c) => write!(f, "[{}] cluster {c}: {}", self.phase, self.source),
            None => write!(f, "[{}] {}", self.phase, self.source),
        }
    }
}

fn step(phase: Phase, cluster: Option<&str>) -> impl FnOnce(Error) -> StepError + '_ {
    move |source| StepError {
        phase,
        cluster: cluster.map(str::to_string),
        source,
    }
}

#[derive(Debug)]
pub enum Outcome {
    Passed,
    Failed(StepError),
    Skipped { reason: String },
    /// The scenario task panicked.
    Aborted { message: String },
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    /// `Some(true)` once read-back matched, `Some(false)` on a mismatch.
    pub data_matched: Option<bool>,
    pub source_cluster: Option<String>,
    pub restored_cluster: Option<String>,
    pub restore_timeout: Option<Duration>,
    pub started_at: String,
    pub finished_at: String,
}

impl ScenarioReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::Passed,
            data_matched: None,
            source_cluster: None,
            restored_cluster: None,
            restore_timeout: None,
            started_at: utc_now(),
            finished_at: String::new(),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed)
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_) | Outcome::Aborted { .. })
    }
}

// ── ScenarioRunner ──────────────────────────────────────────────────────────

pub struct ScenarioRunner {
    ctx: Arc<Context>,
}

impl ScenarioRunner {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Scenarios selected by the configured filter, in catalogue order.
    pub fn selected(&self) -> Vec<Scenario> {
        Scenario::catalog()
            .into_iter()
            .filter(|s| {
                self.ctx
                    .config
                    .filter
                    .as_deref()
                    .is_none_or(|f| s.name.contains(f))
            })
            .collect()
    }

    /// Why `scenario` cannot run in this environment, if it cannot.
    pub fn skip_reason(&self, scenario: &Scenario) -> Option<String> {
        skip_reason(&self.ctx.config, scenario)
    }

    /// Run every selected scenario, concurrently only when configured to.
    pub async fn run_all(&self) -> Vec<ScenarioReport> {
        let scenarios = self.selected();
        if self.ctx.config.parallel {
            info!(count = scenarios.len(), "running scenarios in parallel");
            let handles: Vec<_> = scenarios
                .into_iter()
                .map(|s| {
                    let ctx = self.ctx.clone();
                    let name = s.name.clone();
                    (name, tokio::spawn(run_one(ctx, s)))
                })
                .collect();
            let mut reports = Vec::with_capacity(handles.len());
            for (name, handle) in handles {
                reports.push(join_report(&name, handle.await));
            }
            reports
        } else {
            let mut reports = Vec::with_capacity(scenarios.len());
            for s in scenarios {
                let name = s.name.clone();
                let handle = tokio::spawn(run_one(self.ctx.clone(), s));
                reports.push(join_report(&name, handle.await));
            }
            reports
        }
    }

    /// Run one scenario on the current task.
    pub async fn run(&self, scenario: Scenario) -> ScenarioReport {
        run_one(self.ctx.clone(), scenario).await
    }
}

fn skip_reason(config: &RunnerConfig, scenario: &Scenario) -> Option<String> {
    if !config.pod_ip_reachable() {
        return Some(format!(
            "relies on pod IP reachability, unavailable on cloud provider {}",
            config.cloud_provider.as_deref().unwrap_or_default()
        ));
    }
    if scenario.backend.needs_aws() && !config.aws_test_enabled {
        return Some("AWS tests are not enabled".into());
    }
    None
}

fn join_report(
    name: &str,
    joined: std::result::Result<ScenarioReport, tokio::task::JoinError>,
) -> ScenarioReport {
    joined.unwrap_or_else(|e| {
        error!(scenario = %name, error = %e, "scenario task aborted");
        let mut report = ScenarioReport::new(name);
        report.outcome = Outcome::Aborted {
            message: e.to_string(),
        };
        report.finished_at = utc_now();
        report
    })
}

async fn run_one(ctx: Arc<Context>, scenario: Scenario) -> ScenarioReport {
    let span = info_span!("scenario", name = %scenario.name);
    async move {
        let mut report = ScenarioReport::new(&scenario.name);
        if let Some(reason) = skip_reason(&ctx.config, &scenario) {
            info!(%reason, "skipping scenario");
            report.outcome = Outcome::Skipped { reason };
        } else {
            match run_scenario(&ctx, &scenario, &mut report).await {
                Ok(()) => info!("scenario passed"),
                Err(e) => {
                    error!(error = %e, "scenario failed");
                    if matches!(e.source, Error::DataMismatch { .. }) {
                        report.data_matched = Some(false);
                    }
                    report.outcome = Outcome::Failed(e);
                }
            }
        }
        report.finished_at = utc_now();
        report
    }
    .instrument(span)
    .await
}

async fn run_scenario(
    ctx: &Arc<Context>,
    scenario: &Scenario,
    report: &mut ScenarioReport,
) -> std::result::Result<(), StepError> {
    let timing = &ctx.config.timing;

    let policy = scenario
        .backup_policy(ctx)
        .map_err(step(Phase::Prepare, None))?;
    let handle = select_handle(policy.storage_type, ctx.object_storage.as_ref())
        .map_err(step(Phase::Prepare, None))?;
    let original = ClusterDescriptor::generated(CLUSTER_PREFIX, CLUSTER_SIZE)
        .backup(policy.clone())
        .build()
        .map_err(step(Phase::Prepare, None))?;

    // ── Original cluster: seed and back up ──────────────────────────────
    let provisioned = lifecycle::provision(ctx, &original)
        .await
        .map_err(step(Phase::Provision, None))?;
    let source = provisioned.name.clone();
    report.source_cluster = Some(source.clone());

    let ctx_ref: &Context = ctx;
    let handle_ref = &handle;
    let size = usize::try_from(CLUSTER_SIZE).unwrap_or_default();
    let lease = ClusterLease::new(ctx.clone(), provisioned, handle.clone());
    with_lease(lease, move |cluster| async move {
        let name = cluster.name.as_str();
        let at = Some(name);
        let members = lifecycle::await_size(ctx_ref, name, size, timing.create_timeout)
            .await
            .map_err(step(Phase::AwaitSize, at))?;
        probe::seed(ctx_ref, &members[0])
            .await
            .map_err(step(Phase::Seed, at))?;
        let agent = backup::await_backup_agent_ready(ctx_ref, name, timing.backup_agent_timeout)
            .await
            .map_err(step(Phase::AwaitBackupAgent, at))?;
        backup::trigger_backup(ctx_ref, name, &agent)
            .await
            .map_err(step(Phase::TriggerBackup, at))?;
        if ctx_ref.config.confirm_backup {
            backup::confirm_backup(
                ctx_ref,
                name,
                &agent,
                handle_ref,
                timing.backup_confirm_timeout,
            )
            .await
            .map_err(step(Phase::ConfirmBackup, at))?;
        }
        Ok::<_, StepError>(())
    })
    .await
    .into_result(step(Phase::Teardown, Some(&source)))?;

    // Let the API server finish its own deletion bookkeeping.
    tokio::time::sleep(timing.settle_delay).await;

    // ── Restored cluster: converge and read back ────────────────────────
    let restore_desc = restore::build_restore_descriptor(
        &original,
        scenario.needs_clone,
        &source,
        policy.storage_type,
    )
    .map_err(step(Phase::Restore, Some(&source)))?;
    report.restore_timeout = Some(restore::calculate_restore_wait_time(scenario.needs_clone));

    let restored = restore::execute(ctx, &restore_desc, scenario.needs_clone, handle.clone())
        .await
        .map_err(|failure| {
            let phase = match failure.error {
                Error::ConvergenceTimeout { .. } => {
                    // Accepted by the API server, so the name is concrete.
                    report.restored_cluster = Some(failure.cluster.clone());
                    Phase::AwaitRestore
                }
                _ => Phase::Restore,
            };
            step(phase, Some(&failure.cluster))(failure.error)
        })?;
    let restored_name = restored.lease.cluster().name.clone();
    report.restored_cluster = Some(restored_name.clone());

    let first = restored.endpoints.into_iter().next();
    let verified = with_lease(restored.lease, move |cluster| async move {
        let at = Some(cluster.name.as_str());
        let first = first.ok_or_else(|| {
            step(Phase::Verify, at)(Error::ProbeRead {
                endpoint: cluster.name.clone(),
                reason: "restored cluster reported no members".into(),
            })
        })?;
        probe::verify(ctx_ref, &first)
            .await
            .map_err(step(Phase::Verify, at))
    })
    .await;
    if verified.body.is_ok() {
        report.data_matched = Some(true);
    }
    verified.into_result(step(Phase::Teardown, Some(&restored_name)))?;
    Ok(())
}
