//! In-crate fakes for the cluster collaborators

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use gpusched_cluster::{InventorySource, Orchestrator, WorkloadEventSource, WorkloadEventStream};
use gpusched_core::{
    AcceleratorInfo, ContainerSpec, GpuSchedError, GpuSchedResult, InventoryConfig, NodeInfo,
    ScoringConfig, Workload, WorkloadEvent, WorkloadKey, INTERCONNECT_LABEL,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::gpu_cache::GpuStateCache;
use crate::placement::PlacementEngine;

pub(crate) const GPU_RESOURCE: &str = "nvidia.com/gpu";
pub(crate) const SCHEDULER_NAME: &str = "gpu-aware-scheduler";

/// How the fake orchestrator answers binding calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindBehavior {
    Succeed,
    Conflict,
    Fail,
    Hang,
}

pub(crate) struct FakeOrchestrator {
    nodes: Mutex<Vec<NodeInfo>>,
    list_calls: AtomicUsize,
    binds: Mutex<Vec<(WorkloadKey, String)>>,
    bind_behavior: Mutex<BindBehavior>,
    fail_list: AtomicBool,
}

impl FakeOrchestrator {
    pub(crate) fn new(nodes: Vec<NodeInfo>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            list_calls: AtomicUsize::new(0),
            binds: Mutex::new(Vec::new()),
            bind_behavior: Mutex::new(BindBehavior::Succeed),
            fail_list: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    pub(crate) fn set_bind_behavior(&self, behavior: BindBehavior) {
        *self.bind_behavior.lock().unwrap() = behavior;
    }

    pub(crate) fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn binds(&self) -> Vec<(WorkloadKey, String)> {
        self.binds.lock().unwrap().clone()
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn list_nodes(&self) -> GpuSchedResult<Vec<NodeInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(GpuSchedError::Orchestrator("connection refused".to_string()));
        }
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn bind(&self, workload: &WorkloadKey, node_name: &str) -> GpuSchedResult<()> {
        let behavior = *self.bind_behavior.lock().unwrap();
        match behavior {
            BindBehavior::Succeed => {
                self.binds
                    .lock()
                    .unwrap()
                    .push((workload.clone(), node_name.to_string()));
                Ok(())
            }
            BindBehavior::Conflict => Err(GpuSchedError::BindingConflict {
                workload: workload.to_string(),
                message: "pod already assigned".to_string(),
            }),
            BindBehavior::Fail => Err(GpuSchedError::Rejected("pods/binding is forbidden".to_string())),
            BindBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub(crate) struct FakeInventory {
    gpus: Mutex<BTreeMap<String, Vec<AcceleratorInfo>>>,
    failing: Mutex<BTreeSet<String>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeInventory {
    pub(crate) fn new() -> Self {
        Self {
            gpus: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(BTreeSet::new()),
            calls: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    pub(crate) fn set_gpus(&self, node: &str, gpus: Vec<AcceleratorInfo>) {
        self.gpus.lock().unwrap().insert(node.to_string(), gpus);
    }

    pub(crate) fn fail_node(&self, node: &str) {
        self.failing.lock().unwrap().insert(node.to_string());
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventorySource for FakeInventory {
    async fn query(&self, node: &str) -> GpuSchedResult<Vec<AcceleratorInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(node) {
            return Err(GpuSchedError::InventoryQuery {
                node: node.to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(self
            .gpus
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Event source that hands out one scripted batch per subscription
///
/// A `None` batch fails the subscribe call. Once the script runs out the
/// stream stays open without yielding.
pub(crate) struct FakeEventSource {
    batches: Mutex<VecDeque<Option<Vec<GpuSchedResult<WorkloadEvent>>>>>,
    subscribe_calls: AtomicUsize,
}

impl FakeEventSource {
    pub(crate) fn new(batches: Vec<Option<Vec<GpuSchedResult<WorkloadEvent>>>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadEventSource for FakeEventSource {
    async fn subscribe(&self) -> GpuSchedResult<WorkloadEventStream> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        match self.batches.lock().unwrap().pop_front() {
            Some(Some(batch)) => Ok(stream::iter(batch).boxed()),
            Some(None) => Err(GpuSchedError::StreamDisconnected(
                "watch request failed".to_string(),
            )),
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// An 80GB H100 with the given free memory and utilization
pub(crate) fn h100(node: &str, index: u32, free_mb: u64, utilization: f64) -> AcceleratorInfo {
    AcceleratorInfo {
        node: node.to_string(),
        index,
        memory_total_mb: 81920,
        memory_used_mb: 81920 - free_mb,
        memory_free_mb: free_mb,
        utilization,
        product: "NVIDIA H100 80GB HBM3".to_string(),
    }
}

/// A node advertising `count` GPUs
pub(crate) fn gpu_node(name: &str, count: u32, interconnect: bool) -> NodeInfo {
    let mut node = NodeInfo::new(name);
    node.capacity
        .insert(GPU_RESOURCE.to_string(), count.to_string());
    if interconnect {
        node.labels
            .insert(INTERCONNECT_LABEL.to_string(), "true".to_string());
    }
    node
}

/// Fakes for a cluster of nodes whose GPUs are all idle
pub(crate) fn idle_cluster(nodes: &[(&str, u32, bool)]) -> (Arc<FakeOrchestrator>, Arc<FakeInventory>) {
    let inventory = FakeInventory::new();
    let infos = nodes
        .iter()
        .map(|(name, count, interconnect)| {
            inventory.set_gpus(
                name,
                (0..*count).map(|i| h100(name, i, 80000, 0.0)).collect(),
            );
            gpu_node(name, *count, *interconnect)
        })
        .collect();
    (Arc::new(FakeOrchestrator::new(infos)), Arc::new(inventory))
}

pub(crate) fn cache(orchestrator: &Arc<FakeOrchestrator>, inventory: &Arc<FakeInventory>) -> GpuStateCache {
    GpuStateCache::new(
        orchestrator.clone(),
        inventory.clone(),
        GPU_RESOURCE,
        &InventoryConfig::default(),
    )
}

pub(crate) fn engine(orchestrator: &Arc<FakeOrchestrator>, inventory: &Arc<FakeInventory>) -> PlacementEngine {
    PlacementEngine::new(cache(orchestrator, inventory), ScoringConfig::default())
}

/// A pending workload owned by this scheduler requesting `gpus`
pub(crate) fn gpu_workload(name: &str, gpus: &str) -> Workload {
    let mut workload = Workload::new(WorkloadKey::new("default", name));
    workload.scheduler_name = Some(SCHEDULER_NAME.to_string());
    let mut container = ContainerSpec {
        name: "vllm".to_string(),
        ..Default::default()
    };
    container
        .requests
        .insert(GPU_RESOURCE.to_string(), gpus.to_string());
    workload.containers.push(container);
    workload
}
