//! Admission event loop and binder

use gpusched_cluster::{Orchestrator, WorkloadEventSource};
use gpusched_core::{
    GpuSchedError, GpuSchedResult, SchedulerConfig, SchedulingDecision, Workload, WorkloadEvent,
    WorkloadEventKind, WorkloadKey,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::events::EventPump;
use crate::placement::PlacementEngine;

/// Why an event was dropped before placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The workload was removed
    Deleted,
    /// Another scheduler owns the workload
    OtherScheduler,
    /// The workload already has a node
    AlreadyAssigned,
    /// The workload is being deleted
    Terminating,
}

/// Result of handling one admission event
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Ignored(IgnoreReason),
    /// The workload does not request accelerators
    NoAcceleratorRequested,
    /// No node can take the request right now
    Unschedulable { requested: u32, group_size: u32 },
    Bound(SchedulingDecision),
    /// The orchestrator rejected the binding because the workload was claimed
    BindConflict,
    BindFailed,
}

/// Event loop counters
#[derive(Debug, Default)]
pub struct SchedulerStats {
    events: AtomicU64,
    ignored: AtomicU64,
    skipped: AtomicU64,
    unschedulable: AtomicU64,
    bound: AtomicU64,
    bind_conflicts: AtomicU64,
    bind_failures: AtomicU64,
}

/// Point-in-time copy of `SchedulerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events: u64,
    pub ignored: u64,
    pub skipped: u64,
    pub unschedulable: u64,
    pub bound: u64,
    pub bind_conflicts: u64,
    pub bind_failures: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            unschedulable: self.unschedulable.load(Ordering::Relaxed),
            bound: self.bound.load(Ordering::Relaxed),
            bind_conflicts: self.bind_conflicts.load(Ordering::Relaxed),
            bind_failures: self.bind_failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &EventOutcome) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            EventOutcome::Ignored(_) => &self.ignored,
            EventOutcome::NoAcceleratorRequested => &self.skipped,
            EventOutcome::Unschedulable { .. } => &self.unschedulable,
            EventOutcome::Bound(_) => &self.bound,
            EventOutcome::BindConflict => &self.bind_conflicts,
            EventOutcome::BindFailed => &self.bind_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Scheduler consumes admission events and binds workloads to GPU nodes
pub struct Scheduler {
    config: SchedulerConfig,
    engine: PlacementEngine,
    orchestrator: Arc<dyn Orchestrator>,
    stats: SchedulerStats,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        config: SchedulerConfig,
        engine: PlacementEngine,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        info!(
            scheduler_name = %config.scheduler_name,
            resource = %config.gpu_resource_name,
            orchestrator = orchestrator.name(),
            cache_ttl_secs = engine.cache().ttl().as_secs(),
            "Scheduler initialized"
        );

        Self {
            config,
            engine,
            orchestrator,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn engine(&self) -> &PlacementEngine {
        &self.engine
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Consume events in delivery order until the source is gone
    pub async fn run(&self, source: Arc<dyn WorkloadEventSource>) {
        let mut events = EventPump::new(
            source,
            self.config.event_queue_capacity,
            self.config.reconnect_backoff(),
        )
        .spawn();

        info!(
            scheduler_name = %self.config.scheduler_name,
            "Scheduler event loop started"
        );

        while let Some(event) = events.recv().await {
            self.handle_event(&event).await;
        }

        info!("Scheduler event loop stopped");
    }

    /// Filter, place and bind a single admission event
    pub async fn handle_event(&self, event: &WorkloadEvent) -> EventOutcome {
        let outcome = self.process(event).await;
        self.stats.record(&outcome);
        outcome
    }

    /// Co-placement group size for `workload`, defaulting to the whole request
    pub fn group_size_for(&self, workload: &Workload, requested: u32) -> u32 {
        workload
            .co_placement_hint(&self.config.co_placement_env, &self.config.co_placement_flag)
            .unwrap_or(requested)
    }

    async fn process(&self, event: &WorkloadEvent) -> EventOutcome {
        let workload = &event.workload;

        if let Some(reason) = self.ignore_reason(event) {
            debug!(workload = %workload.key, reason = ?reason, "Ignoring event");
            return EventOutcome::Ignored(reason);
        }

        let requested = match workload.accelerator_request(&self.config.gpu_resource_name) {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    workload = %workload.key,
                    error = %e,
                    "Unparseable GPU request, treating as none"
                );
                0
            }
        };
        if requested == 0 {
            debug!(workload = %workload.key, "No GPUs requested, skipping");
            return EventOutcome::NoAcceleratorRequested;
        }

        let group_size = self.group_size_for(workload, requested);
        debug!(
            workload = %workload.key,
            requested = requested,
            group_size = group_size,
            "Placing workload"
        );

        let Some(decision) = self.engine.place(requested, group_size).await else {
            warn!(
                workload = %workload.key,
                requested = requested,
                group_size = group_size,
                "No feasible placement, waiting for redelivery"
            );
            return EventOutcome::Unschedulable {
                requested,
                group_size,
            };
        };

        match self.bind(&workload.key, &decision).await {
            Ok(()) => {
                info!(
                    workload = %workload.key,
                    node = %decision.node,
                    gpus = ?decision.accelerators,
                    score = decision.score,
                    reason = %decision.reason,
                    "Workload bound"
                );
                EventOutcome::Bound(decision)
            }
            Err(GpuSchedError::BindingConflict { .. }) => EventOutcome::BindConflict,
            Err(_) => EventOutcome::BindFailed,
        }
    }

    fn ignore_reason(&self, event: &WorkloadEvent) -> Option<IgnoreReason> {
        let workload = &event.workload;
        if event.kind == WorkloadEventKind::Deleted {
            return Some(IgnoreReason::Deleted);
        }
        if workload.scheduler_name.as_deref() != Some(self.config.scheduler_name.as_str()) {
            return Some(IgnoreReason::OtherScheduler);
        }
        if workload.deletion_timestamp.is_some() {
            return Some(IgnoreReason::Terminating);
        }
        if workload.is_settled() {
            return Some(IgnoreReason::AlreadyAssigned);
        }
        None
    }

    async fn bind(&self, key: &WorkloadKey, decision: &SchedulingDecision) -> GpuSchedResult<()> {
        let result = match timeout(
            self.config.bind_timeout(),
            self.orchestrator.bind(key, &decision.node),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GpuSchedError::Timeout(format!(
                "binding {} to {}",
                key, decision.node
            ))),
        };

        if let Err(e) = &result {
            match e {
                GpuSchedError::BindingConflict { .. } => warn!(
                    workload = %key,
                    node = %decision.node,
                    error = %e,
                    "Binding rejected, workload claimed elsewhere"
                ),
                e if e.is_transient() => warn!(
                    workload = %key,
                    node = %decision.node,
                    error = %e,
                    "Binding failed, waiting for redelivery"
                ),
                e => error!(
                    workload = %key,
                    node = %decision.node,
                    error = %e,
                    "Binding failed"
                ),
            }
        }
        result
    }
}
