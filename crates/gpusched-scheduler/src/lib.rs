//! gpusched-scheduler: GPU-aware placement for unscheduled workloads
//!
//! This crate provides the scheduling core:
//! - A TTL-bounded GPU state cache with atomic snapshot swaps
//! - Topology-aware placement scoring for single and grouped requests
//! - The admission event loop that filters, places and binds workloads

pub mod events;
pub mod gpu_cache;
pub mod placement;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use events::EventPump;
pub use gpu_cache::{GpuSnapshot, GpuStateCache};
pub use placement::{PlacementEngine, CONTIGUOUS_RUN_MULTIPLIER};
pub use scheduler::{EventOutcome, IgnoreReason, Scheduler, SchedulerStats, StatsSnapshot};
