//! Messages the container service broadcasts to storage targets.

use crate::error::status;
use crate::types::{
    ContHandleId, ContOpenFlags, ContainerId, Epoch, PoolHandleId, PoolId, EPOCH_MAX,
};
use serde::{Deserialize, Serialize};

/// One handle to close on every target, with its last committed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCloseRec {
    pub hdl: ContHandleId,
    pub hce: Epoch,
}

/// Per-target request carried by a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TargetRequest {
    Open {
        pool: PoolId,
        pool_hdl: PoolHandleId,
        cont: ContainerId,
        hdl: ContHandleId,
        capas: ContOpenFlags,
    },
    Close {
        recs: Vec<TargetCloseRec>,
    },
    Destroy {
        pool: PoolId,
        cont: ContainerId,
        force: bool,
    },
    Query {
        pool_hdl: PoolHandleId,
        cont: ContainerId,
    },
    EpochDiscard {
        cont: ContainerId,
        hdl: ContHandleId,
        epoch: Epoch,
    },
}

impl TargetRequest {
    pub fn opcode(&self) -> &'static str {
        match self {
            TargetRequest::Open { .. } => "tgt_open",
            TargetRequest::Close { .. } => "tgt_close",
            TargetRequest::Destroy { .. } => "tgt_destroy",
            TargetRequest::Query { .. } => "tgt_query",
            TargetRequest::EpochDiscard { .. } => "tgt_epoch_discard",
        }
    }
}

/// Per-target reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReply {
    /// Zero on success, otherwise a status code.
    pub rc: i32,
    /// Lowest epoch this target has purged data below. Query only.
    pub min_purged_epoch: Epoch,
}

impl TargetReply {
    pub fn ok() -> Self {
        Self {
            rc: status::SUCCESS,
            min_purged_epoch: EPOCH_MAX,
        }
    }

    pub fn error(rc: i32) -> Self {
        Self {
            rc,
            min_purged_epoch: EPOCH_MAX,
        }
    }
}
