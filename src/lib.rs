//! etcd-restore-e2e: verification workflow for etcd-operator's backup and
//! restore lifecycle.
//!
//! The operator is the system under test; this crate only drives it through
//! the Kubernetes API and checks the results.

pub mod config;
pub mod crd;
pub mod descriptor;
pub mod error;
pub mod helpers;
pub mod sut;
pub mod transport;
pub mod workflow;
