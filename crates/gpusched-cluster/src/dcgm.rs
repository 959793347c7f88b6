//! GPU inventory from a dcgm-exporter metrics endpoint
//!
//! dcgm-exporter publishes Prometheus text samples such as
//! `DCGM_FI_DEV_FB_FREE{gpu="0",modelName="NVIDIA H100 80GB HBM3",Hostname="node-1"} 80896`.
//! Framebuffer values are in MiB and utilization is a percentage.

use async_trait::async_trait;
use gpusched_core::{AcceleratorInfo, GpuSchedError, GpuSchedResult};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::traits::InventorySource;

/// Placeholder replaced with the node name in per-node endpoints
pub const NODE_PLACEHOLDER: &str = "{node}";

const FB_FREE: &str = "DCGM_FI_DEV_FB_FREE";
const FB_USED: &str = "DCGM_FI_DEV_FB_USED";
const FB_RESERVED: &str = "DCGM_FI_DEV_FB_RESERVED";
const GPU_UTIL: &str = "DCGM_FI_DEV_GPU_UTIL";

/// Inventory source reading dcgm-exporter metrics over HTTP
pub struct DcgmInventory {
    /// HTTP client for metric scrapes
    client: reqwest::Client,
    /// Metrics URL, optionally containing `{node}`
    endpoint: String,
}

impl DcgmInventory {
    /// Create a new inventory source with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> GpuSchedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GpuSchedError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Metrics URL for `node`
    pub fn url_for(&self, node: &str) -> String {
        self.endpoint.replace(NODE_PLACEHOLDER, node)
    }

    /// Whether each node has its own exporter endpoint
    fn per_node(&self) -> bool {
        self.endpoint.contains(NODE_PLACEHOLDER)
    }
}

#[async_trait]
impl InventorySource for DcgmInventory {
    async fn query(&self, node: &str) -> GpuSchedResult<Vec<AcceleratorInfo>> {
        let url = self.url_for(node);
        let query_error = |message: String| GpuSchedError::InventoryQuery {
            node: node.to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| query_error(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            warn!(
                node = node,
                endpoint = %url,
                status = %response.status(),
                "Inventory query rejected"
            );
            return Err(query_error(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| query_error(format!("reading {} failed: {}", url, e)))?;

        let host_filter = if self.per_node() { None } else { Some(node) };
        let accelerators = parse_dcgm_metrics(&body, node, host_filter);

        debug!(
            node = node,
            accelerators = accelerators.len(),
            "Inventory query complete"
        );

        Ok(accelerators)
    }

    fn name(&self) -> &'static str {
        "dcgm-exporter"
    }
}

#[derive(Default)]
struct PartialDevice {
    free: Option<u64>,
    used: Option<u64>,
    reserved: u64,
    utilization: Option<f64>,
    product: Option<String>,
}

/// Build accelerator records from a dcgm-exporter scrape
///
/// When `hostname` is set only samples whose `Hostname` label matches are
/// used. Devices missing either framebuffer metric are dropped.
pub fn parse_dcgm_metrics(body: &str, node: &str, hostname: Option<&str>) -> Vec<AcceleratorInfo> {
    let mut devices: BTreeMap<u32, PartialDevice> = BTreeMap::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, labels, value)) = parse_sample(line) else {
            continue;
        };
        if !matches!(name, FB_FREE | FB_USED | FB_RESERVED | GPU_UTIL) {
            continue;
        }
        if let Some(host) = hostname {
            if labels.get("Hostname").map(String::as_str) != Some(host) {
                continue;
            }
        }
        let Some(index) = labels.get("gpu").and_then(|g| g.parse::<u32>().ok()) else {
            continue;
        };

        let device = devices.entry(index).or_default();
        if device.product.is_none() {
            device.product = labels.get("modelName").cloned();
        }
        let mib = value.max(0.0) as u64;
        match name {
            FB_FREE => device.free = Some(mib),
            FB_USED => device.used = Some(mib),
            FB_RESERVED => device.reserved = mib,
            _ => device.utilization = Some(value.clamp(0.0, 100.0)),
        }
    }

    devices
        .into_iter()
        .filter_map(|(index, d)| {
            let free = d.free?;
            let used = d.used?;
            Some(AcceleratorInfo {
                node: node.to_string(),
                index,
                memory_total_mb: free.saturating_add(used).saturating_add(d.reserved),
                memory_used_mb: used,
                memory_free_mb: free,
                utilization: d.utilization.unwrap_or(0.0),
                product: d.product.unwrap_or_else(|| "unknown".to_string()),
            })
        })
        .collect()
}

/// Split one exposition line into name, labels and value
fn parse_sample(line: &str) -> Option<(&str, BTreeMap<String, String>, f64)> {
    let (name, labels, rest) = match line.find('{') {
        Some(open) => {
            let (labels, rest) = parse_labels(&line[open + 1..])?;
            (line[..open].trim(), labels, rest)
        }
        None => {
            let split = line.find(char::is_whitespace)?;
            (&line[..split], BTreeMap::new(), &line[split..])
        }
    };
    // an optional timestamp may follow the value
    let value = rest.split_whitespace().next()?.parse::<f64>().ok()?;
    // NaN and +/-Inf are valid exposition values but carry no reading
    if !value.is_finite() {
        return None;
    }
    Some((name, labels, value))
}

/// Parse `key="value",...}` and return the labels plus the text after `}`
fn parse_labels(input: &str) -> Option<(BTreeMap<String, String>, &str)> {
    let mut labels = BTreeMap::new();
    let mut rest = input.trim_start();

    loop {
        if let Some(after) = rest.strip_prefix('}') {
            return Some((labels, after));
        }

        let eq = rest.find('=')?;
        let key = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start().strip_prefix('"')?;

        let mut value = String::new();
        let mut chars = rest.char_indices();
        let end = loop {
            let (i, c) = chars.next()?;
            match c {
                '\\' => {
                    let (_, escaped) = chars.next()?;
                    value.push(if escaped == 'n' { '\n' } else { escaped });
                }
                '"' => break i,
                other => value.push(other),
            }
        };

        labels.insert(key, value);
        rest = rest[end + 1..].trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after.trim_start();
        }
    }
}
