//! Epoch and snapshot bookkeeping for container handles.
//!
//! Each open handle references one epoch (its LRE) and, when writable, holds
//! one epoch (its LHE). The container's `lres` and `lhes` tables count how
//! many handles reference or hold each epoch.

use super::broadcast::broadcast;
use super::layout::{ContainerHdl, ATTR_GHCE, ATTR_GHPCE};
use super::rpc::EpochState;
use super::service::Container;
use crate::error::{CofferError, Result};
use crate::rdb::{decode_int_key, int_key, IterAction, RdbPath, RdbTx};
use crate::target::TargetRequest;
use crate::types::{ContHandleId, Epoch, EPOCH_MAX};
use tracing::debug;

fn ref_inc(tx: &mut RdbTx, table: &RdbPath, epoch: Epoch) -> Result<()> {
    let key = int_key(epoch);
    let count = match tx.lookup::<u64>(table, &key) {
        Ok(count) => count,
        Err(CofferError::NotFound(_)) => 0,
        Err(e) => return Err(e),
    };
    tx.update(table, &key, &(count + 1))
}

fn ref_dec(tx: &mut RdbTx, table: &RdbPath, epoch: Epoch) -> Result<()> {
    let key = int_key(epoch);
    let count: u64 = tx.lookup(table, &key)?;
    if count <= 1 {
        tx.delete(table, &key)
    } else {
        tx.update(table, &key, &(count - 1))
    }
}

/// Start the epoch state of a freshly opened handle at the container's
/// GHCE and take its references.
pub fn init_hdl(tx: &mut RdbTx, cont: &Container<'_>, hdl: &mut ContainerHdl) -> Result<()> {
    let ghce = cont.ghce(tx)?;
    hdl.hce = ghce;
    hdl.lre = ghce;
    hdl.lhe = if hdl.capas.wants_write() {
        ghce + 1
    } else {
        EPOCH_MAX
    };

    ref_inc(tx, &cont.lres, hdl.lre)?;
    if hdl.lhe != EPOCH_MAX {
        ref_inc(tx, &cont.lhes, hdl.lhe)?;
    }
    Ok(())
}

/// Drop the references a closing handle holds.
pub fn fini_hdl(tx: &mut RdbTx, cont: &Container<'_>, hdl: &ContainerHdl) -> Result<()> {
    ref_dec(tx, &cont.lres, hdl.lre)?;
    if hdl.lhe != EPOCH_MAX {
        ref_dec(tx, &cont.lhes, hdl.lhe)?;
    }
    Ok(())
}

pub fn query_state(tx: &RdbTx, cont: &Container<'_>, hdl: &ContainerHdl) -> Result<EpochState> {
    Ok(EpochState {
        hce: hdl.hce,
        lre: hdl.lre,
        lhe: hdl.lhe,
        ghce: cont.ghce(tx)?,
        ghpce: cont.ghpce(tx)?,
    })
}

/// Commit `epoch` through a writable handle, optionally recording it as a
/// snapshot.
pub fn commit(
    tx: &mut RdbTx,
    cont: &Container<'_>,
    hdl_uuid: ContHandleId,
    hdl: &mut ContainerHdl,
    epoch: Epoch,
    snapshot: bool,
) -> Result<EpochState> {
    if !hdl.capas.wants_write() {
        return Err(CofferError::NoPermission(format!(
            "handle {} is read-only",
            hdl_uuid
        )));
    }
    // The held epoch moves to epoch + 1 and must stay below the sentinel
    if epoch >= EPOCH_MAX - 1 {
        return Err(CofferError::InvalidArgument(format!(
            "epoch {} leaves no epoch to hold",
            epoch
        )));
    }

    if epoch > hdl.hce {
        if epoch < hdl.lhe {
            return Err(CofferError::InvalidArgument(format!(
                "epoch {} below held epoch {}",
                epoch, hdl.lhe
            )));
        }

        let ghpce = cont.ghpce(tx)?.max(epoch);
        let ghce = cont.ghce(tx)?.max(epoch);
        tx.update(&cont.attrs, ATTR_GHPCE, &ghpce)?;
        tx.update(&cont.attrs, ATTR_GHCE, &ghce)?;

        ref_dec(tx, &cont.lhes, hdl.lhe)?;
        hdl.lhe = epoch + 1;
        ref_inc(tx, &cont.lhes, hdl.lhe)?;
        hdl.hce = epoch;
        tx.update(cont.svc.hdls(), hdl_uuid.as_bytes(), hdl)?;
        debug!(cont = %cont.uuid, hdl = %hdl_uuid, epoch, "Committed epoch");
    }

    if snapshot {
        tx.update_bytes(&cont.snaps, &int_key(epoch), &[])?;
        debug!(cont = %cont.uuid, epoch, "Recorded snapshot");
    }

    query_state(tx, cont, hdl)
}

/// Ask every target to throw away data written through `hdl_uuid` at
/// `epoch` and later.
pub async fn discard(
    tx: &RdbTx,
    cont: &Container<'_>,
    hdl_uuid: ContHandleId,
    hdl: &ContainerHdl,
    epoch: Epoch,
) -> Result<EpochState> {
    if !hdl.capas.wants_write() {
        return Err(CofferError::NoPermission(format!(
            "handle {} is read-only",
            hdl_uuid
        )));
    }
    let ghce = cont.ghce(tx)?;
    if epoch <= ghce {
        return Err(CofferError::InvalidArgument(format!(
            "epoch {} already committed (ghce {})",
            epoch, ghce
        )));
    }

    let pool = cont.svc.pool()?;
    broadcast(
        &pool,
        &TargetRequest::EpochDiscard {
            cont: cont.uuid,
            hdl: hdl_uuid,
            epoch,
        },
    )
    .await?;

    query_state(tx, cont, hdl)
}

/// Total number of snapshots and the first `capacity` of them, oldest first.
pub fn snap_list(tx: &RdbTx, cont: &Container<'_>, capacity: u32) -> Result<(u64, Vec<Epoch>)> {
    let mut total = 0u64;
    let mut epochs = Vec::new();
    tx.iterate(&cont.snaps, false, |key, _| {
        if epochs.len() < capacity as usize {
            epochs.push(decode_int_key(key)?);
        }
        total += 1;
        Ok(IterAction::Continue)
    })?;
    Ok((total, epochs))
}

pub fn snap_destroy(tx: &mut RdbTx, cont: &Container<'_>, epoch: Epoch) -> Result<()> {
    tx.delete(&cont.snaps, &int_key(epoch))
        .map_err(|e| match e {
            CofferError::NotFound(_) => {
                CofferError::NotFound(format!("snapshot {} of {}", epoch, cont.uuid))
            }
            e => e,
        })
}

/// Reference count of `epoch` in `table`, zero when absent.
pub fn ref_count(tx: &RdbTx, table: &RdbPath, epoch: Epoch) -> Result<u64> {
    match tx.lookup::<u64>(table, &int_key(epoch)) {
        Ok(count) => Ok(count),
        Err(CofferError::NotFound(_)) => Ok(0),
        Err(e) => Err(e),
    }
}
