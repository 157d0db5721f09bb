//! HTTP endpoint exposing in-process targets to remote container services.

use super::rpc::{TargetReply, TargetRequest};
use super::transport::LocalTransport;
use crate::error::{status, CofferError, Result};
use crate::types::TargetId;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Deserialize)]
struct TargetSelector {
    #[serde(default)]
    target: Option<TargetId>,
}

/// Router for `/target/op` and `/health`. A request without a `target`
/// query parameter goes to the lowest-numbered local target.
pub fn target_router(targets: LocalTransport) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/target/op", post(handle_target_op))
        .with_state(targets)
}

/// Serve local targets until `shutdown` resolves.
pub async fn run_target_server<F>(
    addr: SocketAddr,
    targets: LocalTransport,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, targets = targets.targets().len(), "Target server listening");

    axum::serve(listener, target_router(targets))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CofferError::Network(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn handle_target_op(
    State(targets): State<LocalTransport>,
    Query(selector): Query<TargetSelector>,
    Json(request): Json<TargetRequest>,
) -> Json<TargetReply> {
    let id = selector
        .target
        .or_else(|| targets.targets().first().copied());
    let reply = match id.and_then(|id| targets.target(id)) {
        Some(service) => service.handle(&request),
        None => TargetReply::error(status::NONEXIST),
    };
    Json(reply)
}
