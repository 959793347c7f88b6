//! Kubernetes-backed orchestrator and pod event source

use async_trait::async_trait;
use futures::StreamExt;
use gpusched_core::{
    ContainerSpec, EnvVar, GpuSchedError, GpuSchedResult, NodeInfo, Workload, WorkloadEvent,
    WorkloadKey,
};
use k8s_openapi::api::core::v1::{Binding, Container, Node, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::traits::{Orchestrator, WorkloadEventSource, WorkloadEventStream};

/// Orchestrator backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    scheduler_name: String,
}

impl KubeOrchestrator {
    /// Create from an existing client
    pub fn new(client: Client, scheduler_name: impl Into<String>) -> Self {
        Self {
            client,
            scheduler_name: scheduler_name.into(),
        }
    }

    /// Create from in-cluster config, falling back to the local kubeconfig
    pub async fn try_default(scheduler_name: impl Into<String>) -> GpuSchedResult<Self> {
        let client = Client::try_default().await.map_err(|e| {
            GpuSchedError::Config(format!("Failed to create Kubernetes client: {}", e))
        })?;
        Ok(Self::new(client, scheduler_name))
    }

    /// Field selector limiting the watch to unassigned pods of this scheduler
    fn watch_selector(&self) -> String {
        format!("spec.schedulerName={},spec.nodeName=", self.scheduler_name)
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn list_nodes(&self) -> GpuSchedResult<Vec<NodeInfo>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| GpuSchedError::Orchestrator(format!("Failed to list nodes: {}", e)))?;

        debug!(count = list.items.len(), "Listed nodes");
        Ok(list.items.iter().map(node_info_from).collect())
    }

    async fn bind(&self, workload: &WorkloadKey, node_name: &str) -> GpuSchedResult<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        let body = serde_json::to_vec(&binding_for(workload, node_name))?;

        pods.create_subresource::<serde_json::Value>(
            "binding",
            &workload.name,
            &PostParams::default(),
            body,
        )
        .await
        .map_err(|e| bind_error(workload, e))?;

        info!(workload = %workload, node = node_name, "Binding committed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}

#[async_trait]
impl WorkloadEventSource for KubeOrchestrator {
    async fn subscribe(&self) -> GpuSchedResult<WorkloadEventStream> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let selector = self.watch_selector();
        let config = watcher::Config::default().fields(&selector);

        info!(selector = %selector, "Watching pods");

        let stream = watcher(pods, config)
            .default_backoff()
            .filter_map(|res| async move {
                match res {
                    Ok(watcher::Event::Apply(pod)) | Ok(watcher::Event::InitApply(pod)) => {
                        Some(Ok(WorkloadEvent::applied(workload_from_pod(&pod))))
                    }
                    Ok(watcher::Event::Delete(pod)) => {
                        Some(Ok(WorkloadEvent::deleted(workload_from_pod(&pod))))
                    }
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                    Err(e) => Some(Err(GpuSchedError::StreamDisconnected(e.to_string()))),
                }
            })
            .boxed();

        Ok(stream)
    }
}

/// Map a binding failure
///
/// HTTP 409 is a conflict; other client errors except 429 are rejections.
fn bind_error(workload: &WorkloadKey, err: kube::Error) -> GpuSchedError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => GpuSchedError::BindingConflict {
            workload: workload.to_string(),
            message: resp.message,
        },
        kube::Error::Api(resp) if (400..500).contains(&resp.code) && resp.code != 429 => {
            GpuSchedError::Rejected(format!(
                "binding {} ({} {}): {}",
                workload, resp.code, resp.reason, resp.message
            ))
        }
        other => GpuSchedError::Orchestrator(format!("Failed to bind {}: {}", workload, other)),
    }
}

/// Build the binding object for the pods/binding subresource
fn binding_for(workload: &WorkloadKey, node_name: &str) -> Binding {
    Binding {
        metadata: ObjectMeta {
            name: Some(workload.name.clone()),
            namespace: Some(workload.namespace.clone()),
            uid: workload.uid.clone(),
            ..Default::default()
        },
        target: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Node".to_string()),
            name: Some(node_name.to_string()),
            ..Default::default()
        },
    }
}

fn quantities(map: Option<&BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    map.map(|m| m.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default()
}

fn container_from(container: &Container) -> ContainerSpec {
    let resources = container.resources.as_ref();
    ContainerSpec {
        name: container.name.clone(),
        env: container
            .env
            .iter()
            .flatten()
            .map(|e| EnvVar {
                name: e.name.clone(),
                value: e.value.clone(),
            })
            .collect(),
        args: container.args.clone().unwrap_or_default(),
        requests: quantities(resources.and_then(|r| r.requests.as_ref())),
        limits: quantities(resources.and_then(|r| r.limits.as_ref())),
    }
}

/// Convert a pod into the scheduler's workload view
pub fn workload_from_pod(pod: &Pod) -> Workload {
    let meta = &pod.metadata;
    let spec = pod.spec.as_ref();

    Workload {
        key: WorkloadKey {
            namespace: meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
            name: meta.name.clone().unwrap_or_default(),
            uid: meta.uid.clone(),
        },
        scheduler_name: spec.and_then(|s| s.scheduler_name.clone()),
        node_name: spec.and_then(|s| s.node_name.clone()),
        deletion_timestamp: meta.deletion_timestamp.as_ref().map(|t| t.0),
        containers: spec
            .map(|s| s.containers.iter().map(container_from).collect())
            .unwrap_or_default(),
    }
}

/// Convert a node into the scheduler's node view
pub fn node_info_from(node: &Node) -> NodeInfo {
    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        capacity: quantities(node.status.as_ref().and_then(|s| s.capacity.as_ref())),
        labels: node.metadata.labels.clone().unwrap_or_default(),
    }
}
