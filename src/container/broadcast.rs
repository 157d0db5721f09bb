//! Fan-out of container decisions to every pool target.

use crate::error::{CofferError, Result};
use crate::observability;
use crate::pool::Pool;
use crate::target::{TargetReply, TargetRequest};
use futures::future::join_all;
use tracing::{debug, error};

/// Send `request` to every target of `pool` and wait for all replies.
///
/// Succeeds only if every target succeeds. Individual failures are logged
/// and collapse into a single `Io` error.
pub async fn broadcast(pool: &Pool, request: &TargetRequest) -> Result<Vec<TargetReply>> {
    let opcode = request.opcode();
    let transport = pool.transport();

    let sends = pool.targets().iter().map(|&target| async move {
        (target, transport.send(target, request).await)
    });
    let results = join_all(sends).await;

    let mut replies = Vec::with_capacity(results.len());
    let mut failed = 0usize;
    for (target, result) in results {
        match result {
            Ok(reply) if reply.rc == 0 => replies.push(reply),
            Ok(reply) => {
                error!(pool = %pool.uuid(), target, opcode, rc = reply.rc, "Target failed broadcast");
                failed += 1;
            }
            Err(e) => {
                error!(pool = %pool.uuid(), target, opcode, error = %e, "Broadcast send failed");
                failed += 1;
            }
        }
    }

    observability::record_broadcast(opcode, failed);
    if failed > 0 {
        return Err(CofferError::Io(format!(
            "{} of {} targets failed {}",
            failed,
            pool.targets().len(),
            opcode
        )));
    }

    debug!(pool = %pool.uuid(), opcode, targets = replies.len(), "Broadcast complete");
    Ok(replies)
}
