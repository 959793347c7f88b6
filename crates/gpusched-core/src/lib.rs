//! gpusched-core: Core types and configuration for the GPU-aware scheduler
//!
//! This crate provides the fundamental types shared by every gpusched crate:
//! - Accelerator inventory snapshots and per-node GPU state
//! - Workloads, admission events and scheduling decisions
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod gpu;
pub mod workload;

pub use config::*;
pub use error::*;
pub use gpu::*;
pub use workload::*;
