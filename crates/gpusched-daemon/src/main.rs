//! gpusched daemon
//!
//! Watches for unscheduled GPU workloads and binds them to nodes.

use anyhow::Context;
use clap::Parser;
use gpusched_api::create_router;
use gpusched_cluster::{DcgmInventory, KubeOrchestrator};
use gpusched_core::DaemonConfig;
use gpusched_scheduler::{GpuStateCache, PlacementEngine, Scheduler};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// gpuschedd - GPU-aware pod scheduler for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "gpuschedd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Scheduler identity matched against pod schedulerName
    #[arg(long, env = "SCHEDULER_NAME")]
    scheduler_name: Option<String>,

    /// dcgm-exporter metrics URL; `{node}` is replaced with the node name
    #[arg(long, env = "DCGM_ENDPOINT")]
    dcgm_endpoint: Option<String>,

    /// Maximum age of the GPU state cache in seconds
    #[arg(long)]
    cache_ttl_secs: Option<u64>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (text or json)
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    /// Load the file configuration (or defaults) and apply flag overrides
    fn into_config(self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => DaemonConfig::default(),
        };

        if let Some(name) = self.scheduler_name {
            config.scheduler.scheduler_name = name;
        }
        if let Some(endpoint) = self.dcgm_endpoint {
            config.inventory.endpoint = endpoint;
        }
        if let Some(ttl) = self.cache_ttl_secs {
            config.inventory.cache_ttl_secs = ttl;
        }
        if let Some(address) = self.address {
            config.api.address = address;
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(config: &DaemonConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.logging.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to set subscriber: {}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config)?;

    info!("Starting gpusched daemon v{}", env!("CARGO_PKG_VERSION"));

    let orchestrator =
        Arc::new(KubeOrchestrator::try_default(config.scheduler.scheduler_name.clone()).await?);
    let inventory = Arc::new(DcgmInventory::new(
        config.inventory.endpoint.clone(),
        config.inventory.query_timeout(),
    )?);

    let cache = GpuStateCache::new(
        orchestrator.clone(),
        inventory,
        config.scheduler.gpu_resource_name.clone(),
        &config.inventory,
    );
    let engine = PlacementEngine::new(cache, config.scoring.clone());
    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.clone(),
        engine,
        orchestrator.clone(),
    ));

    if config.api.enabled {
        let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
            .parse()
            .context("invalid API address")?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {}", addr))?;
        let router = create_router(scheduler.clone());

        info!("API server listening on {}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });
    }

    info!(
        scheduler_name = %config.scheduler.scheduler_name,
        endpoint = %config.inventory.endpoint,
        "Watching for unscheduled pods"
    );

    tokio::select! {
        _ = scheduler.run(orchestrator) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for shutdown signal")?;
            info!("Shutting down");
        }
    }

    Ok(())
}
