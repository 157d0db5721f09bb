//! Coffer - container metadata service for a distributed object-storage pool.
//!
//! Coffer keeps the authoritative record of which containers exist in a
//! pool, which clients hold handles on them, and the epoch and snapshot
//! state of each container. It runs next to the pool service and keeps the
//! pool's storage targets in step with committed metadata.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RPC surface: axum server | reqwest client | CLI            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pool service: pool handles | leadership | bootstrap        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Container service: dispatch | lifecycle | attrs | OIDs     │
//! ├───────────────────────────────┬─────────────────────────────┤
//! │  Metadata store (rdb)         │  Target broadcast           │
//! │  transactional KVS tree       │  local or HTTP targets      │
//! └───────────────────────────────┴─────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use coffer::config::CofferConfig;
//!
//! #[tokio::main]
//! async fn main() -> coffer::Result<()> {
//!     // Use development configuration
//!     let config = CofferConfig::development();
//!
//!     // Start the coffer node
//!     coffer::run(config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod container;
pub mod pool;
pub mod rdb;
pub mod rsvc;
pub mod server;
pub mod shutdown;
pub mod target;

pub mod cli;
pub mod client;
pub mod observability;

// Re-exports
pub use error::{CofferError, Result};
pub use types::*;

use config::{CofferConfig, StorageBackend};
use pool::{Pool, PoolService};
use rdb::Rdb;
use rsvc::ReplicatedService;
use shutdown::{shutdown_on_signal, ShutdownCoordinator, ShutdownManager, TeardownStep};
use std::sync::Arc;
use target::{HttpTransport, LocalTransport, RoutedTransport, TargetTransport};
use tracing::{error, info, warn};

/// Open the metadata store selected by the configuration.
fn open_rdb(config: &CofferConfig) -> Result<Arc<Rdb>> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Rdb::open_memory()),
        StorageBackend::RocksDb => {
            std::fs::create_dir_all(&config.storage.metadata_dir)?;
            Rdb::open_rocks(&config.storage.metadata_dir)
        }
    }
}

/// Build the pool and the in-process targets it reaches.
fn build_pool(config: &CofferConfig) -> Result<(Arc<Pool>, LocalTransport)> {
    let local = LocalTransport::with_id_range(config.target.first_id, config.target.local_targets);
    let remote = config.target.remote_endpoints()?;

    let (transport, targets) = if remote.is_empty() {
        let targets = local.targets();
        (Arc::new(local.clone()) as Arc<dyn TargetTransport>, targets)
    } else {
        let routed = RoutedTransport::new(local.clone(), HttpTransport::new(remote, &config.network));
        let targets = routed.targets();
        (Arc::new(routed) as Arc<dyn TargetTransport>, targets)
    };

    info!(pool = %config.service.pool_uuid, targets = targets.len(), "Pool targets resolved");
    let pool = Arc::new(Pool::new(config.service.pool_uuid, transport, targets));
    Ok((pool, local))
}

/// Run a coffer node with the given configuration.
pub async fn run(config: CofferConfig) -> Result<()> {
    info!("Starting coffer node: {}", config.node.name);

    // Initialize observability
    observability::init(&config.observability)?;
    config.validate()?;

    let db = open_rdb(&config)?;
    let (pool, local_targets) = build_pool(&config)?;
    let rsvc = ReplicatedService::new(db, config.node.id);
    let host = PoolService::new(pool, rsvc);

    // Single replica: elect ourselves
    host.step_up()?;
    if !host.is_bootstrapped()? {
        host.create()?;
    }

    // Create shutdown coordinator
    let coordinator = ShutdownCoordinator::new();
    let mut shutdown_manager = ShutdownManager::new(coordinator.clone());
    let mut handles = Vec::new();

    {
        let step_down_host = host.clone();
        shutdown_manager.register(TeardownStep::new("pool-service", async move {
            step_down_host.step_down(None);
        }));
    }

    info!("Starting container service on {}", config.service.bind_addr);
    let server_host = host.clone();
    let server_coordinator = coordinator.clone();
    let bind_addr = config.service.bind_addr;
    handles.push((
        "container",
        tokio::spawn(async move {
            let shutdown = async move { server_coordinator.wait_for_shutdown().await };
            if let Err(e) = server::run_container_server(bind_addr, server_host, shutdown).await {
                error!("Container server error: {}", e);
            }
        }),
    ));

    if let Some(target_addr) = config.target.bind_addr {
        info!("Starting target server on {}", target_addr);
        let target_coordinator = coordinator.clone();
        handles.push((
            "target",
            tokio::spawn(async move {
                let shutdown = async move { target_coordinator.wait_for_shutdown().await };
                if let Err(e) = target::run_target_server(target_addr, local_targets, shutdown).await {
                    error!("Target server error: {}", e);
                }
            }),
        ));
    }

    if config.observability.metrics_enabled {
        info!("Starting metrics server on {}", config.observability.metrics_addr);
        let obs_config = config.observability.clone();
        handles.push((
            "metrics",
            tokio::spawn(async move {
                if let Err(e) = observability::run_metrics_server(obs_config).await {
                    error!("Metrics server error: {}", e);
                }
            }),
        ));
    }

    // Start signal handler in background
    tokio::spawn(shutdown_on_signal(coordinator.clone()));

    // Wait for shutdown signal
    coordinator.wait_for_shutdown().await;

    info!("Shutting down coffer gracefully...");
    shutdown_manager.run().await;

    for (name, handle) in handles {
        if !handle.is_finished() {
            warn!(service = %name, "Force aborting service");
            handle.abort();
        }
    }

    info!("Coffer shutdown complete");
    Ok(())
}
