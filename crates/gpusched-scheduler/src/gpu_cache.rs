//! TTL-bounded cache of per-node GPU state

use arc_swap::ArcSwap;
use futures::future::join_all;
use gpusched_cluster::{InventorySource, Orchestrator};
use gpusched_core::{
    GpuSchedError, GpuSchedResult, InventoryConfig, NodeAcceleratorState, NodeInfo,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// One generation of GPU state across the cluster
///
/// Nodes are keyed by name, so iteration order is stable between calls.
#[derive(Debug, Clone, Default)]
pub struct GpuSnapshot {
    /// Per-node state
    pub nodes: BTreeMap<String, NodeAcceleratorState>,
    /// When the snapshot was built; `None` for the initial empty snapshot
    pub refreshed_at: Option<Instant>,
}

impl GpuSnapshot {
    /// Build a snapshot stamped with the current instant
    pub fn new(nodes: impl IntoIterator<Item = NodeAcceleratorState>) -> Self {
        Self {
            nodes: nodes
                .into_iter()
                .map(|n| (n.node_name.clone(), n))
                .collect(),
            refreshed_at: Some(Instant::now()),
        }
    }

    pub fn age(&self) -> Option<Duration> {
        self.refreshed_at.map(|t| t.elapsed())
    }

    /// Whether the snapshot is younger than `ttl`
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age().is_some_and(|age| age < ttl)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Lazily refreshed GPU state shared by the placement engine
///
/// Readers load the current snapshot without locking. Refreshes are
/// serialized and publish a complete new snapshot in a single swap.
pub struct GpuStateCache {
    orchestrator: Arc<dyn Orchestrator>,
    inventory: Arc<dyn InventorySource>,
    gpu_resource: String,
    ttl: Duration,
    query_timeout: Duration,
    snapshot: ArcSwap<GpuSnapshot>,
    refresh_lock: Mutex<()>,
}

impl GpuStateCache {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        inventory: Arc<dyn InventorySource>,
        gpu_resource: impl Into<String>,
        config: &InventoryConfig,
    ) -> Self {
        Self {
            orchestrator,
            inventory,
            gpu_resource: gpu_resource.into(),
            ttl: config.cache_ttl(),
            query_timeout: config.query_timeout(),
            snapshot: ArcSwap::from_pointee(GpuSnapshot::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current snapshot, without refreshing
    pub fn peek(&self) -> Arc<GpuSnapshot> {
        self.snapshot.load_full()
    }

    /// Current GPU state, refreshing first if the snapshot is older than the TTL
    pub async fn get_state(&self) -> Arc<GpuSnapshot> {
        let current = self.snapshot.load_full();
        if current.is_fresh(self.ttl) {
            return current;
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        let current = self.snapshot.load_full();
        if current.is_fresh(self.ttl) {
            return current;
        }

        match self.refresh().await {
            Ok(next) => {
                let next = Arc::new(next);
                self.snapshot.store(next.clone());
                next
            }
            Err(e) => {
                warn!(
                    error = %e,
                    orchestrator = self.orchestrator.name(),
                    "Node listing failed, keeping previous GPU snapshot"
                );
                current
            }
        }
    }

    async fn refresh(&self) -> GpuSchedResult<GpuSnapshot> {
        let nodes = timeout(self.query_timeout, self.orchestrator.list_nodes())
            .await
            .map_err(|_| GpuSchedError::Timeout("listing nodes".to_string()))??;

        let candidates: Vec<NodeInfo> = nodes
            .into_iter()
            .filter(|node| {
                let advertised = node.advertised(&self.gpu_resource);
                if advertised == 0 {
                    debug!(node = %node.name, "Node advertises no GPUs, skipping");
                }
                advertised > 0
            })
            .collect();

        let queries = candidates.iter().map(|node| async move {
            let result = match timeout(self.query_timeout, self.inventory.query(&node.name)).await
            {
                Ok(result) => result,
                Err(_) => Err(GpuSchedError::Timeout(format!(
                    "inventory query for node {}",
                    node.name
                ))),
            };
            (node, result)
        });

        let mut states = Vec::with_capacity(candidates.len());
        for (node, result) in join_all(queries).await {
            match result {
                Ok(accelerators) if accelerators.is_empty() => {
                    warn!(
                        node = %node.name,
                        source = self.inventory.name(),
                        "Inventory reported no GPUs, skipping node"
                    );
                }
                Ok(accelerators) => {
                    states.push(NodeAcceleratorState::new(
                        node.name.clone(),
                        accelerators,
                        node.interconnect_enabled(),
                        node.socket_count(),
                    ));
                }
                Err(e) => {
                    warn!(
                        node = %node.name,
                        source = self.inventory.name(),
                        error = %e,
                        "Inventory query failed, skipping node"
                    );
                }
            }
        }

        info!(
            nodes = states.len(),
            candidates = candidates.len(),
            "GPU state refreshed"
        );

        Ok(GpuSnapshot::new(states))
    }
}
