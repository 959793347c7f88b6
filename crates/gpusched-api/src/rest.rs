//! REST API handlers

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use gpusched_core::{NodeAcceleratorState, SchedulingDecision};
use gpusched_scheduler::{Scheduler, StatsSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Largest accelerator count a dry run will consider
const MAX_DRY_RUN_COUNT: u32 = 1024;

/// Application state shared across handlers
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

/// Create the API router
pub fn create_router(scheduler: Arc<Scheduler>) -> Router {
    let state = Arc::new(AppState { scheduler });

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/gpus", get(get_gpus))
        .route("/api/v1/placements", post(dry_run_placement))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Scheduler status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub scheduler_name: String,
    pub stats: StatsSnapshot,
    pub cached_nodes: usize,
    pub snapshot_age_secs: Option<f64>,
}

/// Get scheduler status
async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let snapshot = state.scheduler.engine().cache().peek();

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        scheduler_name: state.scheduler.config().scheduler_name.clone(),
        stats: state.scheduler.stats(),
        cached_nodes: snapshot.len(),
        snapshot_age_secs: snapshot.age().map(|d| d.as_secs_f64()),
    }))
}

/// Cached GPU state response
#[derive(Debug, Serialize)]
pub struct GpusResponse {
    pub snapshot_age_secs: Option<f64>,
    pub nodes: Vec<NodeAcceleratorState>,
}

/// Get the cached GPU state without forcing a refresh
async fn get_gpus(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GpusResponse>, (StatusCode, String)> {
    let snapshot = state.scheduler.engine().cache().peek();

    Ok(Json(GpusResponse {
        snapshot_age_secs: snapshot.age().map(|d| d.as_secs_f64()),
        nodes: snapshot.nodes.values().cloned().collect(),
    }))
}

/// Dry-run placement request
#[derive(Debug, Deserialize)]
pub struct PlacementRequest {
    /// Number of accelerators requested
    pub count: u32,
    /// Co-placement group size; defaults to `count`
    #[serde(default)]
    pub group_size: Option<u32>,
}

/// Compute where a request would land without binding anything
async fn dry_run_placement(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlacementRequest>,
) -> Result<Json<Option<SchedulingDecision>>, (StatusCode, String)> {
    let group_size = req.group_size.unwrap_or(req.count);
    if req.count > MAX_DRY_RUN_COUNT || group_size > MAX_DRY_RUN_COUNT {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("count and group_size must not exceed {}", MAX_DRY_RUN_COUNT),
        ));
    }

    info!(count = req.count, group_size = group_size, "Dry-run placement");

    let decision = state.scheduler.engine().place(req.count, group_size).await;
    Ok(Json(decision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use gpusched_cluster::{InventorySource, Orchestrator};
    use gpusched_core::{
        AcceleratorInfo, GpuSchedResult, InventoryConfig, NodeInfo, SchedulerConfig,
        ScoringConfig, WorkloadKey, INTERCONNECT_LABEL,
    };
    use gpusched_scheduler::{GpuStateCache, PlacementEngine};
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct StaticCluster {
        binds: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Orchestrator for StaticCluster {
        async fn list_nodes(&self) -> GpuSchedResult<Vec<NodeInfo>> {
            let mut node = NodeInfo::new("gpu-node-1");
            node.capacity
                .insert("nvidia.com/gpu".to_string(), "2".to_string());
            node.labels
                .insert(INTERCONNECT_LABEL.to_string(), "true".to_string());
            Ok(vec![node])
        }

        async fn bind(&self, workload: &WorkloadKey, _node_name: &str) -> GpuSchedResult<()> {
            self.binds.lock().unwrap().push(workload.to_string());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "static"
        }
    }

    #[async_trait]
    impl InventorySource for StaticCluster {
        async fn query(&self, node: &str) -> GpuSchedResult<Vec<AcceleratorInfo>> {
            Ok((0..2)
                .map(|index| AcceleratorInfo {
                    node: node.to_string(),
                    index,
                    memory_total_mb: 81920,
                    memory_used_mb: 1920,
                    memory_free_mb: 80000,
                    utilization: 0.0,
                    product: "NVIDIA H100 80GB HBM3".to_string(),
                })
                .collect())
        }

        fn name(&self) -> &'static str {
            "static"
        }
    }

    fn app() -> (Router, Arc<StaticCluster>) {
        let cluster = Arc::new(StaticCluster {
            binds: Mutex::new(Vec::new()),
        });
        let cache = GpuStateCache::new(
            cluster.clone(),
            cluster.clone(),
            "nvidia.com/gpu",
            &InventoryConfig::default(),
        );
        let engine = PlacementEngine::new(cache, ScoringConfig::default());
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig::default(),
            engine,
            cluster.clone(),
        ));
        (create_router(scheduler), cluster)
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let (router, _) = app();
        let response = router.oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_before_first_refresh() {
        let (router, _) = app();
        let (status, body) = call(&router, get("/api/v1/status")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scheduler_name"], "gpu-aware-scheduler");
        assert_eq!(body["cached_nodes"], 0);
        assert!(body["snapshot_age_secs"].is_null());
        assert_eq!(body["stats"]["events"], 0);
    }

    #[tokio::test]
    async fn test_dry_run_places_without_binding() {
        let (router, cluster) = app();
        let (status, body) = call(
            &router,
            post_json("/api/v1/placements", r#"{"count": 2}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node"], "gpu-node-1");
        assert_eq!(body["accelerators"], serde_json::json!([0, 1]));
        assert!(cluster.binds.lock().unwrap().is_empty());

        // The dry run populated the cache
        let (_, gpus) = call(&router, get("/api/v1/gpus")).await;
        assert_eq!(gpus["nodes"][0]["node_name"], "gpu-node-1");
        assert_eq!(gpus["nodes"][0]["free_count"], 2);
    }

    #[tokio::test]
    async fn test_dry_run_infeasible_is_null() {
        let (router, _) = app();
        let (status, body) = call(
            &router,
            post_json("/api/v1/placements", r#"{"count": 4, "group_size": 4}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());
    }

    #[tokio::test]
    async fn test_dry_run_rejects_oversized_request() {
        let (router, _) = app();
        let (status, _) = call(
            &router,
            post_json("/api/v1/placements", r#"{"count": 100000}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
