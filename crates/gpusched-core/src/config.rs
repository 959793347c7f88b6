//! Configuration types for gpusched

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Event loop and binder configuration
    pub scheduler: SchedulerConfig,
    /// GPU inventory source and cache configuration
    pub inventory: InventoryConfig,
    /// Placement scoring weights
    pub scoring: ScoringConfig,
    /// Operator API configuration
    pub api: ApiConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::GpuSchedError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GpuSchedError::Config(format!("Failed to read config file: {}", e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::GpuSchedError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<(), crate::GpuSchedError> {
        if self.scheduler.scheduler_name.trim().is_empty() {
            return Err(crate::GpuSchedError::Config(
                "scheduler.scheduler_name must not be empty".to_string(),
            ));
        }
        if self.scheduler.gpu_resource_name.trim().is_empty() {
            return Err(crate::GpuSchedError::Config(
                "scheduler.gpu_resource_name must not be empty".to_string(),
            ));
        }
        if self.scheduler.event_queue_capacity == 0 {
            return Err(crate::GpuSchedError::Config(
                "scheduler.event_queue_capacity must be at least 1".to_string(),
            ));
        }
        if !self.scheduler.co_placement_flag.starts_with("--") {
            return Err(crate::GpuSchedError::Config(format!(
                "scheduler.co_placement_flag must start with \"--\", got {:?}",
                self.scheduler.co_placement_flag
            )));
        }
        let weights = [
            self.scoring.free_memory_weight,
            self.scoring.utilization_weight,
            self.scoring.class_bonus,
            self.scoring.interconnect_bonus,
        ];
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(crate::GpuSchedError::Config(
                "scoring weights must be finite numbers".to_string(),
            ));
        }
        if self.inventory.endpoint.trim().is_empty() {
            return Err(crate::GpuSchedError::Config(
                "inventory.endpoint must not be empty".to_string(),
            ));
        }
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(crate::GpuSchedError::Config(format!(
                "logging.format must be \"text\" or \"json\", got {:?}",
                other
            ))),
        }
    }
}

/// Event loop and binder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Identity matched against a workload's `schedulerName`
    pub scheduler_name: String,
    /// Extended resource that counts accelerators
    pub gpu_resource_name: String,
    /// Container env key carrying the co-placement group size
    pub co_placement_env: String,
    /// Launch argument flag carrying the co-placement group size
    pub co_placement_flag: String,
    /// Capacity of the bounded queue between the event source and the loop
    pub event_queue_capacity: usize,
    /// Deadline for a single binding call
    pub bind_timeout_secs: u64,
    /// Delay before resubscribing after the event stream ends
    pub reconnect_backoff_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "gpu-aware-scheduler".to_string(),
            gpu_resource_name: "nvidia.com/gpu".to_string(),
            co_placement_env: "TENSOR_PARALLEL_SIZE".to_string(),
            co_placement_flag: "--tensor-parallel-size".to_string(),
            event_queue_capacity: 64,
            bind_timeout_secs: 10,
            reconnect_backoff_secs: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn bind_timeout(&self) -> Duration {
        Duration::from_secs(self.bind_timeout_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

/// GPU inventory source and cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// dcgm-exporter metrics URL; `{node}` is replaced with the node name
    pub endpoint: String,
    /// Maximum age of the cached GPU snapshot in seconds
    pub cache_ttl_secs: u64,
    /// Deadline for a single node inventory query
    pub query_timeout_secs: u64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://dcgm-exporter.default.svc:9400/metrics".to_string(),
            cache_ttl_secs: 10,
            query_timeout_secs: 5,
        }
    }
}

impl InventoryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

/// Weights for scoring a single accelerator
///
/// The free-memory fraction dominates, utilization is weighted moderately,
/// and the class and interconnect bonuses are flat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Multiplier for `memory_free / memory_total`
    pub free_memory_weight: f64,
    /// Multiplier for `100 - utilization`
    pub utilization_weight: f64,
    /// Substring of the product name that earns the class bonus
    pub preferred_class: String,
    /// Flat bonus for the preferred accelerator class
    pub class_bonus: f64,
    /// Flat per-accelerator bonus on interconnect-enabled nodes
    pub interconnect_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            free_memory_weight: 50.0,
            utilization_weight: 0.3,
            preferred_class: "H100".to_string(),
            class_bonus: 30.0,
            interconnect_bonus: 10.0,
        }
    }
}

/// Operator API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Serve the operator API
    pub enabled: bool,
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
