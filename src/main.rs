//! etcd-restore-e2e: runs the backup/restore scenarios against a live
//! cluster and exits non-zero when any of them failed.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tracing::{error, info, warn};

use etcd_restore_e2e::config::{RunnerConfig, S3Settings, Timing};
use etcd_restore_e2e::sut::KubeClusterApi;
use etcd_restore_e2e::transport::HttpTransport;
use etcd_restore_e2e::workflow::scenario::{Outcome, ScenarioRunner};
use etcd_restore_e2e::workflow::storage::ObjectStorageHandle;
use etcd_restore_e2e::workflow::Context;

#[derive(Parser, Debug)]
#[command(
    name = "etcd-restore-e2e",
    about = "Verify etcd-operator backup and restore end to end"
)]
struct Args {
    /// Namespace the test clusters are created in.
    #[arg(long, default_value = "default", env = "TEST_NAMESPACE")]
    namespace: String,

    /// Cloud provider the cluster runs on; "aws" skips every scenario.
    #[arg(long, env = "CLOUD_PROVIDER")]
    cloud_provider: Option<String>,

    /// Enable scenarios that need live S3 credentials.
    #[arg(long, env = "AWS_TEST_ENABLED")]
    aws_test_enabled: bool,

    /// Run scenarios concurrently.
    #[arg(long, env = "PARALLEL_TEST")]
    parallel: bool,

    /// Bucket backups are written to and verified in.
    #[arg(long, env = "TEST_S3_BUCKET")]
    s3_bucket: Option<String>,

    /// Secret holding per-cluster AWS credentials.
    #[arg(long, env = "TEST_AWS_SECRET")]
    aws_secret: Option<String>,

    /// Only run scenarios whose name contains this string.
    #[arg(long)]
    filter: Option<String>,

    /// Proceed as soon as the backup request is accepted.
    #[arg(long)]
    skip_backup_confirmation: bool,

    /// Seconds between status polls.
    #[arg(long, default_value_t = 10)]
    poll_interval_secs: u64,

    /// Log format: "text" for human-readable, "json" for structured.
    #[arg(long, default_value = "text", env = "LOG_FORMAT")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn,hyper=warn,tower=warn".into());

    if args.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let client = Client::try_default().await?;

    // Operator-wide S3 scenarios need only the bucket.
    let aws_secret = args.aws_secret.unwrap_or_default();
    let s3 = args.s3_bucket.map(|bucket| S3Settings { bucket, aws_secret });

    let object_storage = match (&s3, args.aws_test_enabled) {
        (Some(s3), true) => Some(ObjectStorageHandle::s3_from_env(&s3.bucket)?),
        (None, true) => {
            warn!("AWS tests enabled without a bucket, S3 scenarios will fail to prepare");
            None
        }
        _ => None,
    };

    let config = RunnerConfig {
        namespace: args.namespace,
        cloud_provider: args.cloud_provider,
        aws_test_enabled: args.aws_test_enabled,
        parallel: args.parallel,
        s3,
        filter: args.filter,
        confirm_backup: !args.skip_backup_confirmation,
        timing: Timing {
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            ..Default::default()
        },
    };

    info!(
        ns = %config.namespace,
        parallel = config.parallel,
        aws = config.aws_test_enabled,
        "starting etcd restore e2e"
    );

    let ctx = Arc::new(Context {
        api: Arc::new(KubeClusterApi::new(client, config.namespace.clone())),
        transport: Arc::new(HttpTransport::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()?,
        )),
        object_storage,
        config,
    });

    let reports = ScenarioRunner::new(ctx).run_all().await;

    let mut failed = 0;
    for report in &reports {
        match &report.outcome {
            Outcome::Passed => info!(scenario = %report.name, "PASS"),
            Outcome::Skipped { reason } => info!(scenario = %report.name, %reason, "SKIP"),
            Outcome::Failed(e) => {
                failed += 1;
                error!(scenario = %report.name, error = %e, "FAIL");
            }
            Outcome::Aborted { message } => {
                failed += 1;
                error!(scenario = %report.name, %message, "ABORT");
            }
        }
    }
    info!(total = reports.len(), failed, "finished");

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
