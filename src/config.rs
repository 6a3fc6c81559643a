//! Run configuration handed to the scenario runner at startup.
//!
//! The binary fills this once from CLI flags and the environment; nothing
//! below reads the environment itself.

use std::time::Duration;

/// Cloud provider on which member pod IPs are not reachable from the runner.
pub const POD_IP_UNREACHABLE_PROVIDER: &str = "aws";

/// Poll intervals and bounded waits used across the workflow.
#[derive(Clone, Debug)]
pub struct Timing {
    pub poll_interval: Duration,
    /// Wait for a freshly created cluster to reach its size.
    pub create_timeout: Duration,
    pub backup_agent_timeout: Duration,
    /// Wait for a backup artifact to appear after the backup request.
    pub backup_confirm_timeout: Duration,
    /// Pause between original teardown and restore submission.
    pub settle_delay: Duration,
    pub teardown_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            create_timeout: Duration::from_secs(60),
            backup_agent_timeout: Duration::from_secs(60),
            backup_confirm_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(60),
        }
    }
}

/// Test bucket and the Secret carrying per-cluster AWS credentials.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub aws_secret: String,
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub namespace: String,
    pub cloud_provider: Option<String>,
    /// Enables scenarios that need live S3 credentials.
    pub aws_test_enabled: bool,
    /// Run scenarios concurrently. Never implied.
    pub parallel: bool,
    pub s3: Option<S3Settings>,
    /// Only run scenarios whose name contains this substring.
    pub filter: Option<String>,
    /// Poll for a backup artifact after the backup request is accepted.
    pub confirm_backup: bool,
    pub timing: Timing,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".into(),
            cloud_provider: None,
            aws_test_enabled: false,
            parallel: false,
            s3: None,
            filter: None,
            confirm_backup: true,
            timing: Timing::default(),
        }
    }
}

impl RunnerConfig {
    /// Whether member pod IPs can be reached from where the runner executes.
    pub fn pod_ip_reachable(&self) -> bool {
        self.cloud_provider.as_deref() != Some(POD_IP_UNREACHABLE_PROVIDER)
    }
}
