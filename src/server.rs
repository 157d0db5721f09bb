//! HTTP surface of a pool service node.
//!
//! Every reply carries a status code and the leadership hint, so a client
//! that reached a stale replica can redirect.

use crate::container::{
    cont_op_handler, oid_fetch_add, ContReply, ContRequest, OidFetchAddReply, OidFetchAddRequest,
};
use crate::error::{CofferError, Result};
use crate::observability;
use crate::pool::PoolService;
use crate::types::{LeaderHint, PoolCapas, PoolHandleId};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConnectRequest {
    pub pool_hdl: PoolHandleId,
    pub capas: PoolCapas,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDisconnectRequest {
    pub pool_hdls: Vec<PoolHandleId>,
}

/// Reply to pool connect and disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReply {
    pub rc: i32,
    pub hint: LeaderHint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PoolReply {
    fn from_result(host: &PoolService, result: Result<()>) -> Self {
        let (rc, error) = match result {
            Ok(()) => (0, None),
            Err(e) => (e.to_status(), Some(e.to_string())),
        };
        let mut reply = Self {
            rc,
            hint: LeaderHint::default(),
            error,
        };
        host.rsvc().set_hint(&mut reply.hint);
        reply
    }
}

/// Router for the container and pool endpoints.
pub fn container_router(host: Arc<PoolService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/cont/op", post(handle_cont_op))
        .route("/cont/oid", post(handle_oid_fetch_add))
        .route("/pool/connect", post(handle_pool_connect))
        .route("/pool/disconnect", post(handle_pool_disconnect))
        .with_state(host)
}

/// Serve `host` on `addr` until `shutdown` resolves.
pub async fn run_container_server<F>(
    addr: SocketAddr,
    host: Arc<PoolService>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, pool = %host.pool().uuid(), "Container service listening");

    axum::serve(listener, container_router(host))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CofferError::Network(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn handle_cont_op(
    State(host): State<Arc<PoolService>>,
    Json(request): Json<ContRequest>,
) -> Json<ContReply> {
    Json(cont_op_handler(&host, &request).await)
}

async fn handle_oid_fetch_add(
    State(host): State<Arc<PoolService>>,
    Json(request): Json<OidFetchAddRequest>,
) -> Json<OidFetchAddReply> {
    let result = oid_fetch_add(
        &host,
        request.pool_hdl,
        request.cont,
        request.hdl,
        request.count,
    )
    .await;

    let (rc, oid, error) = match result {
        Ok(oid) => (0, oid, None),
        Err(e) => (e.to_status(), 0, Some(e.to_string())),
    };
    observability::record_cont_rpc("oid_fetch_add", rc);

    let mut reply = OidFetchAddReply {
        rc,
        hint: LeaderHint::default(),
        oid,
        error,
    };
    host.rsvc().set_hint(&mut reply.hint);
    Json(reply)
}

async fn handle_pool_connect(
    State(host): State<Arc<PoolService>>,
    Json(request): Json<PoolConnectRequest>,
) -> Json<PoolReply> {
    debug!(pool_hdl = %request.pool_hdl, capas = ?request.capas, "Pool connect");
    let result = host.connect(request.pool_hdl, request.capas).map(|_| ());
    Json(PoolReply::from_result(&host, result))
}

async fn handle_pool_disconnect(
    State(host): State<Arc<PoolService>>,
    Json(request): Json<PoolDisconnectRequest>,
) -> Json<PoolReply> {
    debug!(count = request.pool_hdls.len(), "Pool disconnect");
    let result = host.disconnect(&request.pool_hdls).await;
    Json(PoolReply::from_result(&host, result))
}
