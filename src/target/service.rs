//! In-memory per-target container state.
//!
//! A target learns about a container on the first open broadcast that
//! reaches it; container creation alone never touches targets.

use super::rpc::{TargetCloseRec, TargetReply, TargetRequest};
use crate::error::status;
use crate::types::{ContHandleId, ContOpenFlags, ContainerId, Epoch, PoolId, TargetId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct TargetCont {
    /// Highest epoch reported by a closing handle.
    hce: Epoch,
    /// Data below this epoch has been aggregated away.
    purged_epoch: Epoch,
    /// Lowest epoch discarded by any handle, if any.
    discarded_from: Option<Epoch>,
}

#[derive(Debug)]
struct TargetHdl {
    cont: ContainerId,
    capas: ContOpenFlags,
}

#[derive(Debug, Default)]
struct TargetState {
    conts: HashMap<(PoolId, ContainerId), TargetCont>,
    hdls: HashMap<ContHandleId, TargetHdl>,
}

/// One storage target.
pub struct TargetService {
    id: TargetId,
    state: Mutex<TargetState>,
    failing: AtomicBool,
    requests: AtomicU64,
}

impl TargetService {
    pub fn new(id: TargetId) -> Self {
        Self {
            id,
            state: Mutex::new(TargetState::default()),
            failing: AtomicBool::new(false),
            requests: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    /// Make every subsequent request fail with an I/O status.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of requests handled so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn has_container(&self, pool: PoolId, cont: ContainerId) -> bool {
        self.state.lock().conts.contains_key(&(pool, cont))
    }

    pub fn has_handle(&self, hdl: ContHandleId) -> bool {
        self.state.lock().hdls.contains_key(&hdl)
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().hdls.len()
    }

    /// Highest epoch reported by closed handles of a container.
    pub fn container_hce(&self, pool: PoolId, cont: ContainerId) -> Option<Epoch> {
        self.state.lock().conts.get(&(pool, cont)).map(|tc| tc.hce)
    }

    /// Lowest epoch discarded on a container, if any.
    pub fn discarded_from(&self, pool: PoolId, cont: ContainerId) -> Option<Epoch> {
        self.state
            .lock()
            .conts
            .get(&(pool, cont))
            .and_then(|tc| tc.discarded_from)
    }

    /// Set the purge watermark of a container, creating its state if needed.
    pub fn set_purged_epoch(&self, pool: PoolId, cont: ContainerId, epoch: Epoch) {
        self.state
            .lock()
            .conts
            .entry((pool, cont))
            .or_default()
            .purged_epoch = epoch;
    }

    /// Handle one broadcast request.
    pub fn handle(&self, req: &TargetRequest) -> TargetReply {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            warn!(target_id = self.id, op = req.opcode(), "Injected target failure");
            return TargetReply::error(status::IO);
        }

        let mut state = self.state.lock();
        match req {
            TargetRequest::Open {
                pool,
                pool_hdl,
                cont,
                hdl,
                capas,
            } => {
                state.conts.entry((*pool, *cont)).or_default();
                state.hdls.entry(*hdl).or_insert(TargetHdl {
                    cont: *cont,
                    capas: *capas,
                });
                debug!(target_id = self.id, %cont, %hdl, %pool_hdl, %capas, "Target opened handle");
                TargetReply::ok()
            }
            TargetRequest::Close { recs } => {
                Self::close(&mut state, recs);
                TargetReply::ok()
            }
            TargetRequest::Destroy { pool, cont, force } => {
                let busy = state.hdls.values().any(|h| h.cont == *cont);
                if busy && !*force {
                    return TargetReply::error(status::BUSY);
                }
                state.hdls.retain(|_, h| h.cont != *cont);
                state.conts.remove(&(*pool, *cont));
                TargetReply::ok()
            }
            TargetRequest::Query { pool_hdl, cont } => {
                let mut reply = TargetReply::ok();
                if let Some(tc) = state
                    .conts
                    .iter()
                    .find(|((_, c), _)| c == cont)
                    .map(|(_, tc)| tc)
                {
                    reply.min_purged_epoch = tc.purged_epoch;
                }
                debug!(target_id = self.id, %cont, %pool_hdl, purged = reply.min_purged_epoch, "Target query");
                reply
            }
            TargetRequest::EpochDiscard { cont, hdl, epoch } => {
                let Some(h) = state.hdls.get(hdl) else {
                    return TargetReply::error(status::NO_HDL);
                };
                if h.cont != *cont || !h.capas.wants_write() {
                    return TargetReply::error(status::NO_PERM);
                }
                for ((_, c), tc) in state.conts.iter_mut() {
                    if c == cont {
                        tc.discarded_from =
                            Some(tc.discarded_from.map_or(*epoch, |from| from.min(*epoch)));
                    }
                }
                TargetReply::ok()
            }
        }
    }

    fn close(state: &mut TargetState, recs: &[TargetCloseRec]) {
        for rec in recs {
            let Some(h) = state.hdls.remove(&rec.hdl) else {
                continue;
            };
            for ((_, c), tc) in state.conts.iter_mut() {
                if *c == h.cont {
                    tc.hce = tc.hce.max(rec.hce);
                }
            }
        }
    }
}
