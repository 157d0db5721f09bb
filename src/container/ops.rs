//! Container lifecycle handlers: create, destroy, open and query.

use super::broadcast::broadcast;
use super::close;
use super::epoch;
use super::layout::{
    ContainerHdl, ATTR_GHCE, ATTR_GHPCE, ATTR_LHES, ATTR_LRES, ATTR_MAX_OID, ATTR_SNAPSHOTS,
    ATTR_USER,
};
use super::rpc::ContQueryInfo;
use super::service::{ContService, Container};
use crate::error::{CofferError, Result};
use crate::observability;
use crate::pool::PoolHandle;
use crate::rdb::{KvsAttr, RdbTx};
use crate::target::TargetRequest;
use crate::types::{ContHandleId, ContOpenFlags, ContainerId, EPOCH_MAX};
use tracing::debug;

fn check_pool_write(pool_hdl: &PoolHandle) -> Result<()> {
    if !pool_hdl.capas().can_write() {
        return Err(CofferError::NoPermission(format!(
            "pool handle {} lacks write capability",
            pool_hdl.uuid()
        )));
    }
    Ok(())
}

pub fn create(
    svc: &ContService,
    tx: &mut RdbTx,
    pool_hdl: &PoolHandle,
    uuid: ContainerId,
) -> Result<()> {
    debug!(pool = %svc.pool_uuid(), cont = %uuid, "Creating container");
    check_pool_write(pool_hdl)?;

    tx.create_kvs(svc.conts(), uuid.as_bytes(), KvsAttr::generic())?;

    let attrs = svc.conts().child(uuid.as_bytes());
    tx.update(&attrs, ATTR_GHCE, &0u64)?;
    tx.update(&attrs, ATTR_GHPCE, &0u64)?;
    tx.update(&attrs, ATTR_MAX_OID, &0u64)?;
    tx.create_kvs(&attrs, ATTR_LRES, KvsAttr::integer())?;
    tx.create_kvs(&attrs, ATTR_LHES, KvsAttr::integer())?;
    tx.create_kvs(&attrs, ATTR_SNAPSHOTS, KvsAttr::integer())?;
    tx.create_kvs(&attrs, ATTR_USER, KvsAttr::generic())?;
    Ok(())
}

/// Destroy a container. Absent containers are already destroyed.
///
/// Targets are told first; metadata goes only after every target agreed.
pub async fn destroy(
    svc: &ContService,
    tx: &mut RdbTx,
    pool_hdl: &PoolHandle,
    uuid: ContainerId,
    force: bool,
) -> Result<()> {
    debug!(pool = %svc.pool_uuid(), cont = %uuid, force, "Destroying container");
    check_pool_write(pool_hdl)?;

    let cont = match svc.lookup_cont(tx, uuid) {
        Ok(cont) => cont,
        Err(CofferError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };

    let pool = svc.pool()?;
    broadcast(
        &pool,
        &TargetRequest::Destroy {
            pool: svc.pool_uuid(),
            cont: uuid,
            force,
        },
    )
    .await?;

    // Targets dropped any open handles when forced
    let dropped = close::forget_cont_hdls(tx, svc, uuid)?;
    if dropped > 0 {
        debug!(cont = %uuid, dropped, "Dropped handles of destroyed container");
        observability::record_handles_closed(dropped);
    }

    tx.destroy_kvs(&cont.attrs, ATTR_USER)?;
    tx.destroy_kvs(&cont.attrs, ATTR_SNAPSHOTS)?;
    tx.destroy_kvs(&cont.attrs, ATTR_LHES)?;
    tx.destroy_kvs(&cont.attrs, ATTR_LRES)?;
    tx.destroy_kvs(svc.conts(), uuid.as_bytes())?;
    Ok(())
}

/// Open `hdl_uuid` on a container.
///
/// Replaying an open with the same flags succeeds without side effects.
pub async fn open(
    tx: &mut RdbTx,
    pool_hdl: &PoolHandle,
    cont: &Container<'_>,
    hdl_uuid: ContHandleId,
    capas: ContOpenFlags,
) -> Result<()> {
    let svc = cont.svc;
    debug!(pool = %svc.pool_uuid(), cont = %cont.uuid, hdl = %hdl_uuid, %capas, "Opening container");

    if capas.wants_write() && !pool_hdl.capas().can_write() {
        return Err(CofferError::NoPermission(format!(
            "pool handle {} cannot open {} for writing",
            pool_hdl.uuid(),
            cont.uuid
        )));
    }

    match tx.lookup::<ContainerHdl>(svc.hdls(), hdl_uuid.as_bytes()) {
        Ok(existing) if existing.capas == capas => return Ok(()),
        Ok(existing) => {
            return Err(CofferError::Conflict(format!(
                "handle {} already open with {}",
                hdl_uuid, existing.capas
            )))
        }
        Err(CofferError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let pool = svc.pool()?;
    broadcast(
        &pool,
        &TargetRequest::Open {
            pool: svc.pool_uuid(),
            pool_hdl: pool_hdl.uuid(),
            cont: cont.uuid,
            hdl: hdl_uuid,
            capas,
        },
    )
    .await?;

    let mut hdl = ContainerHdl::new(pool_hdl.uuid(), cont.uuid, capas);
    epoch::init_hdl(tx, cont, &mut hdl)?;
    tx.update(svc.hdls(), hdl_uuid.as_bytes(), &hdl)
}

/// Epoch state of the handle plus the lowest purge watermark of any target.
pub async fn query(
    tx: &RdbTx,
    pool_hdl: &PoolHandle,
    cont: &Container<'_>,
    hdl_uuid: ContHandleId,
    hdl: &ContainerHdl,
) -> Result<ContQueryInfo> {
    debug!(pool = %cont.svc.pool_uuid(), cont = %cont.uuid, hdl = %hdl_uuid, "Querying container");

    let pool = cont.svc.pool()?;
    let replies = broadcast(
        &pool,
        &TargetRequest::Query {
            pool_hdl: pool_hdl.uuid(),
            cont: cont.uuid,
        },
    )
    .await?;

    let min_purged_epoch = replies
        .iter()
        .map(|reply| reply.min_purged_epoch)
        .min()
        .unwrap_or(EPOCH_MAX);

    Ok(ContQueryInfo {
        epoch: epoch::query_state(tx, cont, hdl)?,
        min_purged_epoch,
    })
}
