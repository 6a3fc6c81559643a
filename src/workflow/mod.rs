//! The verification workflow: each submodule owns one step of the
//! backup/restore scenario, and [`scenario`] composes them.
//!
//! Every step takes the shared [`Context`]. Nothing in it is mutated after
//! startup, so concurrent scenarios can share one `Arc<Context>`.

use std::sync::Arc;

use crate::config::RunnerConfig;
use crate::sut::ClusterApi;
use crate::transport::MemberTransport;

pub mod backup;
pub mod lifecycle;
pub mod probe;
pub mod restore;
pub mod scenario;
pub mod storage;
pub mod teardown;

use storage::ObjectStorageHandle;

// ── Shared context passed to every step ─────────────────────────────────────

pub struct Context {
    pub api: Arc<dyn ClusterApi>,
    pub transport: Arc<dyn MemberTransport>,
    /// Configured only when S3 scenarios can run.
    pub object_storage: Option<ObjectStorageHandle>,
    pub config: RunnerConfig,
}
