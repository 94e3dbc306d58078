//! The abstract collaborators the core calls out to (§6). None of these are
//! wire-bound — concrete CRD/REST/gRPC plumbing lives outside this crate's
//! scope (§1); implementors adapt whatever backing store or cluster API they
//! have to these traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Node, NodeFlavor, NodeFlavorId, Workload, WorkloadId, Workspace, WorkspaceId};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>>;
    async fn list_unfinished_workloads(&self, workspace_id: WorkspaceId) -> Result<Vec<Workload>>;
    async fn get_node_flavor(&self, id: NodeFlavorId) -> Result<Option<NodeFlavor>>;
    async fn list_nodes(&self, workspace_id: WorkspaceId) -> Result<Vec<Node>>;
    async fn get_workload(&self, id: WorkloadId) -> Result<Option<Workload>>;

    /// Appends a condition, updates phase/scheduler-order/message.
    /// Transactional; a conflict surfaces as `SchedulerError::Transient`.
    async fn update_workload_status(&self, workload: &Workload) -> Result<()>;

    /// Merge-patch for `scheduled-at` / `preempted-at` style annotations.
    async fn patch_workload_annotations(
        &self,
        workload_id: WorkloadId,
        annotations: &[(&str, String)],
    ) -> Result<()>;

    async fn index_dependents(&self, prerequisite_id: WorkloadId) -> Result<Vec<Workload>>;
}

/// Receives admitted workloads; opaque to the core which concrete runtime
/// resource (job controller, pytorch operator, plain pod) it creates (§1,
/// §9 admission/execution separation).
#[async_trait]
pub trait ResourceTranslator: Send + Sync {
    async fn translate(&self, workload: &Workload) -> Result<()>;
}

/// Control-plane to data-plane mirror operations (§6), each idempotent over
/// `(cluster, kind, name)`.
#[async_trait]
pub trait MirrorClient: Send + Sync {
    async fn ensure_namespace(&self, cluster: &str, name: &str) -> Result<()>;
    async fn delete_namespace(&self, cluster: &str, name: &str) -> Result<()>;

    async fn copy_secret(
        &self,
        cluster: &str,
        source_secret: &str,
        target_namespace: &str,
    ) -> Result<()>;
    async fn update_secret(
        &self,
        cluster: &str,
        name: &str,
        source_secret: &str,
        target_namespace: &str,
    ) -> Result<()>;
    async fn delete_secret(&self, cluster: &str, name: &str, target_namespace: &str)
        -> Result<()>;

    async fn create_pvc(&self, cluster: &str, claim_spec: &crate::types::VolumeSpec, namespace: &str) -> Result<()>;
    async fn delete_pvc(&self, cluster: &str, name: &str, namespace: &str) -> Result<()>;
}
