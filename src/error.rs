use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid cluster descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("cluster {cluster} rejected by the API server: {reason}")]
    Submission { cluster: String, reason: String },

    #[error("cluster {cluster}: timed out after {timeout:?} waiting for {waiting_for}")]
    ConvergenceTimeout {
        cluster: String,
        waiting_for: String,
        timeout: Duration,
    },

    #[error("failed to write probe data to {endpoint}: {reason}")]
    ProbeWrite { endpoint: String, reason: String },

    #[error("failed to read probe data from {endpoint}: {reason}")]
    ProbeRead { endpoint: String, reason: String },

    #[error("data mismatch at {endpoint} for key {key:?}: expected {expected:?}, observed {observed:?}")]
    DataMismatch {
        endpoint: String,
        key: String,
        expected: String,
        observed: Option<String>,
    },

    #[error("backup request for cluster {cluster} failed: {reason}")]
    BackupRequest { cluster: String, reason: String },

    #[error("teardown verification for cluster {cluster} failed: {reason}")]
    TeardownVerification { cluster: String, reason: String },
}

/// Short alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_descriptor(msg: impl Into<String>) -> Self {
        Self::InvalidDescriptor(msg.into())
    }

    pub fn convergence_timeout(
        cluster: impl Into<String>,
        waiting_for: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self::ConvergenceTimeout {
            cluster: cluster.into(),
            waiting_for: waiting_for.into(),
            timeout,
        }
    }

    pub fn teardown(cluster: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TeardownVerification {
            cluster: cluster.into(),
            reason: reason.into(),
        }
    }

    /// True for a 404 from the API server.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}
