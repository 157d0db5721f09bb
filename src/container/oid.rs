//! Object id allocation.

use super::layout::{ContainerHdl, ATTR_MAX_OID};
use crate::error::{CofferError, Result};
use crate::observability;
use crate::pool::PoolService;
use crate::types::{ContHandleId, ContainerId, ObjectId, PoolHandleId};
use tracing::debug;

/// Reserve `count` object ids for a container and return the first.
///
/// Ranges handed out by successful calls never overlap. A call that fails
/// leaves the high-water mark untouched.
pub async fn oid_fetch_add(
    host: &PoolService,
    pool_hdl: PoolHandleId,
    cont_uuid: ContainerId,
    hdl_uuid: ContHandleId,
    count: u64,
) -> Result<ObjectId> {
    let pool_hdl = host.lookup_handle(pool_hdl)?;
    let svc = host.lookup_leader(pool_hdl.pool().uuid())?;

    let mut tx = svc.rsvc().begin()?;
    let _guard = svc.lock().acquire_write().await;

    let cont = svc.lookup_cont(&tx, cont_uuid)?;
    match tx.lookup::<ContainerHdl>(svc.hdls(), hdl_uuid.as_bytes()) {
        Ok(hdl) if hdl.cont == cont_uuid => {}
        Ok(_) | Err(CofferError::NotFound(_)) => {
            return Err(CofferError::NoHandle(format!(
                "container handle {} on {}",
                hdl_uuid, cont_uuid
            )))
        }
        Err(e) => return Err(e),
    }

    let oid = cont.max_oid(&tx)?;
    let next = oid.checked_add(count).ok_or_else(|| {
        CofferError::InvalidArgument(format!("allocating {} ids past {} overflows", count, oid))
    })?;
    tx.update(&cont.attrs, ATTR_MAX_OID, &next)?;
    tx.commit()?;

    observability::record_oid_allocation(count);
    debug!(cont = %cont_uuid, hdl = %hdl_uuid, oid, count, "Allocated object ids");
    Ok(oid)
}
