//! Routing of container RPCs to their handlers.
//!
//! Every request is resolved in three steps: pool handle and leader, then
//! container, then container handle. Each step happens under the metadata
//! lock, inside one transaction that commits only if the handler succeeds.

use super::attr;
use super::close;
use super::epoch;
use super::layout::ContainerHdl;
use super::ops;
use super::rpc::{ContReply, ContReplyBody, ContRequest, ContRequestBody};
use super::service::{ContService, Container};
use crate::error::{CofferError, Result};
use crate::observability;
use crate::pool::{PoolHandle, PoolService};
use crate::rdb::RdbTx;
use crate::types::LeaderHint;
use tracing::{debug, error};

/// Handle one container RPC. The reply always carries a leadership hint.
pub async fn cont_op_handler(host: &PoolService, req: &ContRequest) -> ContReply {
    let opcode = req.body.opcode();
    debug!(pool_hdl = %req.op.pool_hdl, cont = %req.op.cont, hdl = %req.op.hdl, %opcode, "Processing container RPC");

    let result = async {
        let pool_hdl = host.lookup_handle(req.op.pool_hdl)?;
        let svc = host.lookup_leader(pool_hdl.pool().uuid())?;
        op_with_svc(&svc, &pool_hdl, req).await
    }
    .await;

    let mut reply = match result {
        Ok(body) => ContReply {
            rc: 0,
            hint: LeaderHint::default(),
            body,
            error: None,
        },
        Err(e) => ContReply {
            rc: e.to_status(),
            hint: LeaderHint::default(),
            body: ContReplyBody::Empty,
            error: Some(e.to_string()),
        },
    };
    host.rsvc().set_hint(&mut reply.hint);

    observability::record_cont_rpc(opcode.as_str(), reply.rc);
    debug!(cont = %req.op.cont, %opcode, rc = reply.rc, "Replying container RPC");
    reply
}

/// Resolve the container, or call the handler directly for create and
/// destroy.
pub async fn op_with_svc(
    svc: &ContService,
    pool_hdl: &PoolHandle,
    req: &ContRequest,
) -> Result<ContReplyBody> {
    let mut tx = svc.rsvc().begin()?;
    let _guard = svc.lock().acquire(req.body.opcode().lock_mode()).await;

    let body = match &req.body {
        ContRequestBody::Create => {
            ops::create(svc, &mut tx, pool_hdl, req.op.cont)?;
            ContReplyBody::Empty
        }
        ContRequestBody::Destroy { force } => {
            ops::destroy(svc, &mut tx, pool_hdl, req.op.cont, *force).await?;
            ContReplyBody::Empty
        }
        _ => {
            let cont = svc.lookup_cont(&tx, req.op.cont)?;
            op_with_cont(&mut tx, pool_hdl, &cont, req).await?
        }
    };

    tx.commit()?;
    Ok(body)
}

/// Resolve the container handle, or call the handler directly for open and
/// close.
async fn op_with_cont(
    tx: &mut RdbTx,
    pool_hdl: &PoolHandle,
    cont: &Container<'_>,
    req: &ContRequest,
) -> Result<ContReplyBody> {
    let hdl_uuid = req.op.hdl;
    match &req.body {
        ContRequestBody::Open { capas } => {
            ops::open(tx, pool_hdl, cont, hdl_uuid, *capas).await?;
            return Ok(ContReplyBody::Empty);
        }
        ContRequestBody::Close => {
            close::close(tx, cont, hdl_uuid).await?;
            return Ok(ContReplyBody::Empty);
        }
        _ => {}
    }

    let mut hdl = match tx.lookup::<ContainerHdl>(cont.svc.hdls(), hdl_uuid.as_bytes()) {
        Ok(hdl) if hdl.cont == cont.uuid => hdl,
        Ok(hdl) => {
            error!(cont = %cont.uuid, hdl = %hdl_uuid, owner = %hdl.cont, "Rejecting handle of another container");
            return Err(CofferError::NoHandle(format!(
                "handle {} is not open on {}",
                hdl_uuid, cont.uuid
            )));
        }
        Err(CofferError::NotFound(_)) => {
            error!(cont = %cont.uuid, hdl = %hdl_uuid, "Rejecting unauthorized operation");
            return Err(CofferError::NoHandle(format!("handle {}", hdl_uuid)));
        }
        Err(e) => {
            error!(cont = %cont.uuid, hdl = %hdl_uuid, error = %e, "Failed to look up container handle");
            return Err(e);
        }
    };

    let body = match &req.body {
        ContRequestBody::Query => ContReplyBody::Query {
            info: ops::query(tx, pool_hdl, cont, hdl_uuid, &hdl).await?,
        },
        ContRequestBody::AttrList { bulk } => {
            let (size, bulk) = attr::list(tx, cont, bulk.clone())?;
            ContReplyBody::AttrList { size, bulk }
        }
        ContRequestBody::AttrGet {
            count,
            key_length,
            bulk,
        } => ContReplyBody::AttrGet {
            bulk: attr::get(tx, cont, *count, *key_length, bulk.clone())?,
        },
        ContRequestBody::AttrSet { count, bulk } => {
            attr::set(tx, cont, *count, bulk)?;
            ContReplyBody::Empty
        }
        ContRequestBody::EpochDiscard { epoch } => ContReplyBody::Epoch {
            state: epoch::discard(tx, cont, hdl_uuid, &hdl, *epoch).await?,
        },
        ContRequestBody::EpochCommit { epoch } => ContReplyBody::Epoch {
            state: epoch::commit(tx, cont, hdl_uuid, &mut hdl, *epoch, false)?,
        },
        ContRequestBody::SnapList { capacity } => {
            let (total, epochs) = epoch::snap_list(tx, cont, *capacity)?;
            ContReplyBody::SnapList { total, epochs }
        }
        ContRequestBody::SnapCreate { epoch } => ContReplyBody::Epoch {
            state: epoch::commit(tx, cont, hdl_uuid, &mut hdl, *epoch, true)?,
        },
        ContRequestBody::SnapDestroy { epoch } => {
            epoch::snap_destroy(tx, cont, *epoch)?;
            ContReplyBody::Empty
        }
        ContRequestBody::Create
        | ContRequestBody::Destroy { .. }
        | ContRequestBody::Open { .. }
        | ContRequestBody::Close => {
            return Err(CofferError::Internal(format!(
                "{} routed past the container",
                req.body.opcode()
            )))
        }
    };
    Ok(body)
}
