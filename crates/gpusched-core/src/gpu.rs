//! Accelerator inventory and per-node GPU state

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::workload::parse_quantity;

/// Minimum free framebuffer (MiB) for an accelerator to count as free
pub const MIN_FREE_MEMORY_MB: u64 = 1000;

/// Node label that marks NVLink-class interconnect between the node's GPUs
pub const INTERCONNECT_LABEL: &str = "gpu.nvlink";

/// Node label carrying the CPU socket count
pub const SOCKET_COUNT_LABEL: &str = "cpu.sockets";

/// One accelerator as reported by the inventory source
///
/// Snapshots are replaced wholesale on refresh; fields are never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    /// Node hosting the device
    pub node: String,
    /// Device index on the node
    pub index: u32,
    /// Total framebuffer in MiB
    pub memory_total_mb: u64,
    /// Used framebuffer in MiB
    pub memory_used_mb: u64,
    /// Free framebuffer in MiB
    pub memory_free_mb: u64,
    /// Compute utilization percentage (0-100)
    pub utilization: f64,
    /// Product / class tag (e.g. "NVIDIA H100 80GB HBM3")
    pub product: String,
}

impl AcceleratorInfo {
    /// Whether the device has enough free memory to take new work
    pub fn is_free(&self) -> bool {
        self.memory_free_mb > MIN_FREE_MEMORY_MB
    }

    /// Fraction of the framebuffer that is free, in `[0, 1]`
    pub fn free_fraction(&self) -> f64 {
        if self.memory_total_mb == 0 {
            return 0.0;
        }
        (self.memory_free_mb as f64 / self.memory_total_mb as f64).clamp(0.0, 1.0)
    }
}

/// GPU state of a single node within one snapshot generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAcceleratorState {
    /// Node name
    pub node_name: String,
    /// Accelerators in ascending index order
    pub accelerators: Vec<AcceleratorInfo>,
    /// Number of accelerators on the node
    pub total_count: u32,
    /// Number of accelerators with free memory above `MIN_FREE_MEMORY_MB`
    pub free_count: u32,
    /// Whether the node's accelerators share a high-bandwidth interconnect
    pub interconnect: bool,
    /// CPU socket count
    pub socket_count: u32,
}

impl NodeAcceleratorState {
    /// Build the state for a node, deriving the counts from `accelerators`
    pub fn new(
        node_name: impl Into<String>,
        mut accelerators: Vec<AcceleratorInfo>,
        interconnect: bool,
        socket_count: u32,
    ) -> Self {
        accelerators.sort_by_key(|a| a.index);
        let total_count = accelerators.len() as u32;
        let free_count = accelerators.iter().filter(|a| a.is_free()).count() as u32;

        Self {
            node_name: node_name.into(),
            accelerators,
            total_count,
            free_count,
            interconnect,
            socket_count,
        }
    }

    /// Free accelerators in ascending index order
    pub fn free_accelerators(&self) -> impl Iterator<Item = &AcceleratorInfo> {
        self.accelerators.iter().filter(|a| a.is_free())
    }
}

/// A node as listed by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// Advertised capacity by resource name (quantity strings)
    pub capacity: BTreeMap<String, String>,
    /// Node labels
    pub labels: BTreeMap<String, String>,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Number of accelerators the node advertises under `resource`
    ///
    /// Absent or unparseable capacity counts as zero.
    pub fn advertised(&self, resource: &str) -> u32 {
        self.capacity
            .get(resource)
            .and_then(|q| parse_quantity(q).ok())
            .unwrap_or(0)
    }

    /// Whether the node is labelled as interconnect-enabled
    pub fn interconnect_enabled(&self) -> bool {
        self.labels
            .get(INTERCONNECT_LABEL)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// CPU socket count from labels, defaulting to one
    pub fn socket_count(&self) -> u32 {
        self.labels
            .get(SOCKET_COUNT_LABEL)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1)
    }
}
