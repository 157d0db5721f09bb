//! Observability module for Coffer.
//!
//! Provides logging and Prometheus metrics.

use crate::config::ObservabilityConfig;
use crate::error::{CofferError, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging. `RUST_LOG` overrides the configured level.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| CofferError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| CofferError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server.
pub async fn run_metrics_server(config: ObservabilityConfig) -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| CofferError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route("/metrics", axum::routing::get(move || async move { handle.render() }))
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| CofferError::Network(e.to_string()))?;

    Ok(())
}

fn register_metrics() {
    gauge!("coffer_rsvc_term").set(0.0);
    gauge!("coffer_rsvc_leading").set(0.0);
    counter!("coffer_cont_rpc_total").absolute(0);
    counter!("coffer_bcast_rounds_total").absolute(0);
    counter!("coffer_bcast_target_failures_total").absolute(0);
    counter!("coffer_oid_allocated_total").absolute(0);
    counter!("coffer_cont_handles_closed_total").absolute(0);
}

/// Record a container RPC and its reply status.
pub fn record_cont_rpc(opcode: &str, status: i32) {
    counter!(
        "coffer_cont_rpc_total",
        "op" => opcode.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one broadcast round and how many targets failed it.
pub fn record_broadcast(opcode: &str, failed_targets: usize) {
    counter!("coffer_bcast_rounds_total", "op" => opcode.to_string()).increment(1);
    if failed_targets > 0 {
        counter!("coffer_bcast_target_failures_total", "op" => opcode.to_string())
            .increment(failed_targets as u64);
    }
}

/// Record object IDs handed out by the allocator.
pub fn record_oid_allocation(count: u64) {
    counter!("coffer_oid_allocated_total").increment(count);
}

/// Record container handles closed by a close or bulk close.
pub fn record_handles_closed(count: usize) {
    counter!("coffer_cont_handles_closed_total").increment(count as u64);
}

/// Update leadership metrics.
pub fn update_leadership(term: u64, leading: bool) {
    gauge!("coffer_rsvc_term").set(term as f64);
    gauge!("coffer_rsvc_leading").set(if leading { 1.0 } else { 0.0 });
}
