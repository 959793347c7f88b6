//! gpusched-cluster: Cluster-facing collaborators
//!
//! This crate provides the seams the scheduler talks through and their
//! production implementations:
//! - Orchestrator node listing and binding (Kubernetes)
//! - Workload admission event stream (Kubernetes pod watch)
//! - GPU inventory queries (dcgm-exporter)

pub mod dcgm;
pub mod kubernetes;
pub mod traits;

pub use dcgm::DcgmInventory;
pub use kubernetes::KubeOrchestrator;
pub use traits::{InventorySource, Orchestrator, WorkloadEventSource, WorkloadEventStream};
