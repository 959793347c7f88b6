//! Collaborator trait definitions

use async_trait::async_trait;
use futures::stream::BoxStream;
use gpusched_core::{AcceleratorInfo, GpuSchedResult, NodeInfo, WorkloadEvent, WorkloadKey};

/// Stream of admission events; `Err` items report a disconnect or watch error
pub type WorkloadEventStream = BoxStream<'static, GpuSchedResult<WorkloadEvent>>;

/// Orchestrator control plane used for node listing and binding
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// List every node with its advertised capacity and labels
    async fn list_nodes(&self) -> GpuSchedResult<Vec<NodeInfo>>;

    /// Commit a binding of `workload` to `node_name`
    ///
    /// Returns `GpuSchedError::BindingConflict` when the orchestrator rejects
    /// the binding because the workload was claimed elsewhere.
    async fn bind(&self, workload: &WorkloadKey, node_name: &str) -> GpuSchedResult<()>;

    /// Get the orchestrator name
    fn name(&self) -> &'static str;
}

/// Source of per-node accelerator inventory
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Query the accelerators currently present on `node`
    async fn query(&self, node: &str) -> GpuSchedResult<Vec<AcceleratorInfo>>;

    /// Get the inventory source name
    fn name(&self) -> &'static str;
}

/// Source of workload admission events
#[async_trait]
pub trait WorkloadEventSource: Send + Sync {
    /// Open a new subscription; the stream ends when the server closes it
    async fn subscribe(&self) -> GpuSchedResult<WorkloadEventStream>;
}
