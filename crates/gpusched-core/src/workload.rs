//! Workload, admission event and scheduling decision types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{GpuSchedError, GpuSchedResult};

/// Identity of a workload in the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadKey {
    /// Namespace
    pub namespace: String,
    /// Name within the namespace
    pub name: String,
    /// Orchestrator-assigned UID, used as a precondition on binding
    pub uid: Option<String>,
}

impl WorkloadKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
        }
    }
}

impl std::fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Environment variable on a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: Option<String>,
}

/// The parts of a container spec the scheduler reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Environment variables
    pub env: Vec<EnvVar>,
    /// Launch arguments
    pub args: Vec<String>,
    /// Resource requests (quantity strings)
    pub requests: BTreeMap<String, String>,
    /// Resource limits (quantity strings)
    pub limits: BTreeMap<String, String>,
}

/// A schedulable unit of compute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Identity
    pub key: WorkloadKey,
    /// Scheduler that owns placement of this workload
    pub scheduler_name: Option<String>,
    /// Node the workload is already assigned to
    pub node_name: Option<String>,
    /// Set once the workload is being deleted
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Containers in declaration order
    pub containers: Vec<ContainerSpec>,
}

impl Workload {
    pub fn new(key: WorkloadKey) -> Self {
        Self {
            key,
            scheduler_name: None,
            node_name: None,
            deletion_timestamp: None,
            containers: Vec::new(),
        }
    }

    /// Whether the workload already has a node or is being deleted
    pub fn is_settled(&self) -> bool {
        self.node_name.as_deref().is_some_and(|n| !n.is_empty())
            || self.deletion_timestamp.is_some()
    }

    /// Total number of `resource` units requested across containers
    ///
    /// A container that only declares a limit for an extended resource gets
    /// the limit as its request, matching orchestrator defaulting.
    pub fn accelerator_request(&self, resource: &str) -> GpuSchedResult<u32> {
        let mut total: u32 = 0;
        for container in &self.containers {
            let quantity = container
                .requests
                .get(resource)
                .or_else(|| container.limits.get(resource));
            if let Some(q) = quantity {
                let count = parse_quantity(q)?;
                total = total.checked_add(count).ok_or_else(|| {
                    GpuSchedError::MalformedRequest(format!(
                        "{} request overflows on {}",
                        resource, self.key
                    ))
                })?;
            }
        }
        Ok(total)
    }

    /// Co-placement group size hinted on the workload
    ///
    /// The env key on any container wins over a `--flag=value` token in the
    /// first container's args. Unparseable values are treated as absent.
    pub fn co_placement_hint(&self, env_key: &str, flag: &str) -> Option<u32> {
        let from_env = self
            .containers
            .iter()
            .flat_map(|c| c.env.iter())
            .find(|e| e.name == env_key)
            .and_then(|e| e.value.as_deref())
            .and_then(|v| v.trim().parse::<u32>().ok());

        if from_env.is_some() {
            return from_env;
        }

        let prefix = format!("{}=", flag);
        self.containers.first().and_then(|c| {
            c.args
                .iter()
                .find_map(|arg| arg.strip_prefix(prefix.as_str()))
                .and_then(|v| v.trim().parse::<u32>().ok())
        })
    }
}

/// Kind of admission event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadEventKind {
    /// Workload was created or updated
    Applied,
    /// Workload was removed
    Deleted,
}

/// Workload admission event from the orchestrator's stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadEvent {
    pub kind: WorkloadEventKind,
    pub workload: Workload,
}

impl WorkloadEvent {
    pub fn applied(workload: Workload) -> Self {
        Self {
            kind: WorkloadEventKind::Applied,
            workload,
        }
    }

    pub fn deleted(workload: Workload) -> Self {
        Self {
            kind: WorkloadEventKind::Deleted,
            workload,
        }
    }
}

/// Outcome of a successful placement attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingDecision {
    /// Chosen node
    pub node: String,
    /// Chosen accelerator indices on the node
    pub accelerators: Vec<u32>,
    /// Placement score
    pub score: f64,
    /// Human-readable rationale
    pub reason: String,
}

/// Parse an integer resource quantity such as `"4"`
///
/// Accelerator resources are whole units; fractional or suffixed quantities
/// are rejected.
pub fn parse_quantity(quantity: &str) -> GpuSchedResult<u32> {
    let trimmed = quantity.trim();
    trimmed
        .parse::<u32>()
        .map_err(|_| GpuSchedError::MalformedRequest(format!("invalid quantity {:?}", quantity)))
}
