//! Object store seam for the reconciliation loop
//!
//! The core only talks to the cluster through these traits:
//! - `WorkloadStore` - get/update workloads, list/create/delete generations
//! - `NodeInventory` - list nodes with their labels and conditions
//!
//! `KubeStore` implements both against the Kubernetes API; `MemoryStore`
//! keeps everything in process for tests.

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

use crate::crd::generation::Generation;
use crate::crd::workload::{Workload, WorkloadStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use thiserror::Error;

/// Errors returned at the store boundary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Read and write access to workloads and their generations
///
/// Every call is a single synchronous round-trip that either succeeds or
/// returns a `StoreError`; implementations never retry internally.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload, StoreError>;

    /// Replace the workload's metadata and spec, guarded by its resourceVersion
    async fn replace_workload(&self, workload: &Workload) -> Result<Workload, StoreError>;

    /// Write the status subresource, guarded by the workload's resourceVersion
    async fn update_workload_status(
        &self,
        workload: &Workload,
        status: &WorkloadStatus,
    ) -> Result<Workload, StoreError>;

    /// List the generations owned by a workload, including terminating ones
    async fn list_generations(
        &self,
        namespace: &str,
        workload_name: &str,
    ) -> Result<Vec<Generation>, StoreError>;

    async fn create_generation(&self, generation: &Generation) -> Result<Generation, StoreError>;

    async fn delete_generation(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Cluster node listing
#[async_trait]
pub trait NodeInventory: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;
}
