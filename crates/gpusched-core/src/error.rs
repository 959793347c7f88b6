//! Error types for gpusched

use thiserror::Error;

/// Main error type for gpusched
#[derive(Error, Debug)]
pub enum GpuSchedError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inventory query for a single node failed
    #[error("Inventory query failed for node {node}: {message}")]
    InventoryQuery { node: String, message: String },

    /// Orchestrator API error
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// The orchestrator rejected a binding because the workload was claimed elsewhere
    #[error("Binding conflict for {workload}: {message}")]
    BindingConflict { workload: String, message: String },

    /// The orchestrator refused a request in a way retrying will not fix
    #[error("Orchestrator rejected request: {0}")]
    Rejected(String),

    /// Event stream closed or errored
    #[error("Event stream disconnected: {0}")]
    StreamDisconnected(String),

    /// Unparseable resource quantity or hint
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GpuSchedError {
    /// Whether the failure is expected to clear on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GpuSchedError::InventoryQuery { .. }
                | GpuSchedError::Orchestrator(_)
                | GpuSchedError::BindingConflict { .. }
                | GpuSchedError::StreamDisconnected(_)
                | GpuSchedError::Timeout(_)
        )
    }
}

/// Result type for gpusched operations
pub type GpuSchedResult<T> = Result<T, GpuSchedError>;

impl From<serde_json::Error> for GpuSchedError {
    fn from(err: serde_json::Error) -> Self {
        GpuSchedError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuSchedError {
    fn from(err: toml::de::Error) -> Self {
        GpuSchedError::Config(err.to_string())
    }
}
