//! Closing container handles, one at a time or in bulk.

use super::broadcast::broadcast;
use super::epoch;
use super::layout::ContainerHdl;
use super::service::{ContService, Container};
use crate::error::{CofferError, Result};
use crate::observability;
use crate::pool::{Pool, PoolService};
use crate::rdb::{IterAction, RdbTx};
use crate::target::{TargetCloseRec, TargetRequest};
use crate::types::{ContHandleId, ContainerId, PoolHandleId, PoolId};
use tracing::debug;

async fn close_bcast(pool: &Pool, recs: &[TargetCloseRec]) -> Result<()> {
    debug!(pool = %pool.uuid(), nrecs = recs.len(), "Broadcasting handle close");
    broadcast(
        pool,
        &TargetRequest::Close {
            recs: recs.to_vec(),
        },
    )
    .await
    .map(|_| ())
}

/// Release the epoch references of one handle and delete its row. A row
/// whose container is gone has no references left to release.
fn close_one_hdl(tx: &mut RdbTx, svc: &ContService, hdl_uuid: ContHandleId) -> Result<()> {
    let hdl: ContainerHdl = tx.lookup(svc.hdls(), hdl_uuid.as_bytes())?;
    match svc.lookup_cont(tx, hdl.cont) {
        Ok(cont) => epoch::fini_hdl(tx, &cont, &hdl)?,
        Err(CofferError::NotFound(_)) => {
            debug!(cont = %hdl.cont, hdl = %hdl_uuid, "Dropping handle of destroyed container");
        }
        Err(e) => return Err(e),
    }
    tx.delete(svc.hdls(), hdl_uuid.as_bytes())
}

fn decode_hdl_row(key: &[u8], value: &[u8]) -> Result<(ContHandleId, ContainerHdl)> {
    let hdl_uuid = ContHandleId::from_slice(key)
        .ok_or_else(|| CofferError::Io(format!("invalid handle key of {} bytes", key.len())))?;
    let hdl = bincode::deserialize(value)
        .map_err(|e| CofferError::Io(format!("invalid handle row: {}", e)))?;
    Ok((hdl_uuid, hdl))
}

/// Delete the handle rows of container `cont` inside `tx`. Used by destroy
/// once every target has dropped them. Returns how many were deleted.
pub(super) fn forget_cont_hdls(
    tx: &mut RdbTx,
    svc: &ContService,
    cont: ContainerId,
) -> Result<usize> {
    let mut doomed = Vec::new();
    tx.iterate(svc.hdls(), false, |key, value| {
        let (hdl_uuid, hdl) = decode_hdl_row(key, value)?;
        if hdl.cont == cont {
            doomed.push(hdl_uuid);
        }
        Ok(IterAction::Continue)
    })?;

    for hdl_uuid in &doomed {
        tx.delete(svc.hdls(), hdl_uuid.as_bytes())?;
    }
    Ok(doomed.len())
}

/// Close one handle. Closing a handle that is not open succeeds.
pub async fn close(tx: &mut RdbTx, cont: &Container<'_>, hdl_uuid: ContHandleId) -> Result<()> {
    let svc = cont.svc;
    let hdl: ContainerHdl = match tx.lookup(svc.hdls(), hdl_uuid.as_bytes()) {
        Ok(hdl) => hdl,
        Err(CofferError::NotFound(_)) => {
            debug!(cont = %cont.uuid, hdl = %hdl_uuid, "Handle already closed");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    debug!(cont = %cont.uuid, hdl = %hdl_uuid, hce = hdl.hce, "Closing handle");
    let pool = svc.pool()?;
    close_bcast(
        &pool,
        &[TargetCloseRec {
            hdl: hdl_uuid,
            hce: hdl.hce,
        }],
    )
    .await?;

    close_one_hdl(tx, svc, hdl_uuid)?;
    observability::record_handles_closed(1);
    Ok(())
}

/// Close handles that may belong to different containers.
///
/// One transaction per handle. The first failure stops the loop; handles
/// closed before it stay closed.
async fn close_hdls(svc: &ContService, recs: &[TargetCloseRec]) -> Result<()> {
    let pool = svc.pool()?;
    close_bcast(&pool, recs).await?;

    let mut closed = 0usize;
    let result = recs.iter().try_for_each(|rec| {
        let mut tx = svc.rsvc().begin()?;
        close_one_hdl(&mut tx, svc, rec.hdl)?;
        tx.commit()?;
        closed += 1;
        Ok(())
    });

    observability::record_handles_closed(closed);
    debug!(pool = %svc.pool_uuid(), closed, total = recs.len(), "Closed handles");
    result
}

fn find_hdls_to_close(
    tx: &RdbTx,
    svc: &ContService,
    pool_hdls: &[PoolHandleId],
) -> Result<Vec<TargetCloseRec>> {
    let mut recs = Vec::new();
    tx.iterate(svc.hdls(), false, |key, value| {
        let (hdl_uuid, hdl) = decode_hdl_row(key, value)?;
        if pool_hdls.contains(&hdl.pool_hdl) {
            recs.push(TargetCloseRec {
                hdl: hdl_uuid,
                hce: hdl.hce,
            });
        }
        Ok(IterAction::Continue)
    })?;
    Ok(recs)
}

/// Close every container handle opened through one of `pool_hdls`.
pub async fn close_by_pool_hdls(
    host: &PoolService,
    pool_uuid: PoolId,
    pool_hdls: &[PoolHandleId],
) -> Result<()> {
    debug!(pool = %pool_uuid, n_pool_hdls = pool_hdls.len(), "Closing by pool handles");

    let svc = host.lookup_leader(pool_uuid)?;
    let tx = svc.rsvc().begin()?;
    let _guard = svc.lock().acquire_write().await;

    let recs = find_hdls_to_close(&tx, &svc, pool_hdls)?;
    if recs.is_empty() {
        return Ok(());
    }
    close_hdls(&svc, &recs).await
}
