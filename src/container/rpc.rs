//! Container RPC messages.

use super::bulk::Bulk;
use super::lock::LockMode;
use crate::types::{
    ContHandleId, ContOpenFlags, ContainerId, Epoch, LeaderHint, ObjectId, PoolHandleId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container service opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContOpcode {
    Create,
    Destroy,
    Open,
    Close,
    Query,
    AttrList,
    AttrGet,
    AttrSet,
    EpochDiscard,
    EpochCommit,
    SnapList,
    SnapCreate,
    SnapDestroy,
}

impl ContOpcode {
    /// Lock mode the dispatcher takes for this opcode.
    pub fn lock_mode(self) -> LockMode {
        match self {
            ContOpcode::Query
            | ContOpcode::AttrGet
            | ContOpcode::AttrList
            | ContOpcode::EpochDiscard
            | ContOpcode::SnapList => LockMode::Shared,
            ContOpcode::Create
            | ContOpcode::Destroy
            | ContOpcode::Open
            | ContOpcode::Close
            | ContOpcode::AttrSet
            | ContOpcode::EpochCommit
            | ContOpcode::SnapCreate
            | ContOpcode::SnapDestroy => LockMode::Exclusive,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContOpcode::Create => "create",
            ContOpcode::Destroy => "destroy",
            ContOpcode::Open => "open",
            ContOpcode::Close => "close",
            ContOpcode::Query => "query",
            ContOpcode::AttrList => "attr_list",
            ContOpcode::AttrGet => "attr_get",
            ContOpcode::AttrSet => "attr_set",
            ContOpcode::EpochDiscard => "epoch_discard",
            ContOpcode::EpochCommit => "epoch_commit",
            ContOpcode::SnapList => "snap_list",
            ContOpcode::SnapCreate => "snap_create",
            ContOpcode::SnapDestroy => "snap_destroy",
        }
    }
}

impl fmt::Display for ContOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields common to every container RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContOpIn {
    pub pool_hdl: PoolHandleId,
    pub cont: ContainerId,
    /// Container handle. Ignored by create and destroy.
    pub hdl: ContHandleId,
}

/// Opcode-specific request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ContRequestBody {
    Create,
    Destroy {
        force: bool,
    },
    Open {
        capas: ContOpenFlags,
    },
    Close,
    Query,
    /// Without a bulk only the aggregate name length is returned.
    AttrList {
        bulk: Option<Bulk>,
    },
    AttrGet {
        count: u64,
        key_length: u64,
        bulk: Bulk,
    },
    AttrSet {
        count: u64,
        bulk: Bulk,
    },
    EpochDiscard {
        epoch: Epoch,
    },
    EpochCommit {
        epoch: Epoch,
    },
    SnapList {
        capacity: u32,
    },
    SnapCreate {
        epoch: Epoch,
    },
    SnapDestroy {
        epoch: Epoch,
    },
}

impl ContRequestBody {
    pub fn opcode(&self) -> ContOpcode {
        match self {
            ContRequestBody::Create => ContOpcode::Create,
            ContRequestBody::Destroy { .. } => ContOpcode::Destroy,
            ContRequestBody::Open { .. } => ContOpcode::Open,
            ContRequestBody::Close => ContOpcode::Close,
            ContRequestBody::Query => ContOpcode::Query,
            ContRequestBody::AttrList { .. } => ContOpcode::AttrList,
            ContRequestBody::AttrGet { .. } => ContOpcode::AttrGet,
            ContRequestBody::AttrSet { .. } => ContOpcode::AttrSet,
            ContRequestBody::EpochDiscard { .. } => ContOpcode::EpochDiscard,
            ContRequestBody::EpochCommit { .. } => ContOpcode::EpochCommit,
            ContRequestBody::SnapList { .. } => ContOpcode::SnapList,
            ContRequestBody::SnapCreate { .. } => ContOpcode::SnapCreate,
            ContRequestBody::SnapDestroy { .. } => ContOpcode::SnapDestroy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContRequest {
    pub op: ContOpIn,
    pub body: ContRequestBody,
}

/// Epoch state of a container as seen through one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EpochState {
    pub hce: Epoch,
    pub lre: Epoch,
    pub lhe: Epoch,
    pub ghce: Epoch,
    pub ghpce: Epoch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContQueryInfo {
    pub epoch: EpochState,
    /// Lowest purge watermark over all targets.
    pub min_purged_epoch: Epoch,
}

/// Opcode-specific reply payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContReplyBody {
    #[default]
    Empty,
    Epoch {
        state: EpochState,
    },
    Query {
        info: ContQueryInfo,
    },
    AttrList {
        /// Sum of all name lengths, NULs included.
        size: u64,
        bulk: Option<Bulk>,
    },
    AttrGet {
        bulk: Bulk,
    },
    SnapList {
        total: u64,
        epochs: Vec<Epoch>,
    },
}

/// Reply to every container RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContReply {
    /// Zero on success, otherwise a status code.
    pub rc: i32,
    /// Valid on failure too.
    pub hint: LeaderHint,
    #[serde(default)]
    pub body: ContReplyBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidFetchAddRequest {
    pub pool_hdl: PoolHandleId,
    pub cont: ContainerId,
    pub hdl: ContHandleId,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidFetchAddReply {
    pub rc: i32,
    pub hint: LeaderHint,
    /// First id of the granted range.
    pub oid: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_classes() {
        let shared = [
            ContOpcode::Query,
            ContOpcode::AttrGet,
            ContOpcode::AttrList,
            ContOpcode::EpochDiscard,
            ContOpcode::SnapList,
        ];
        for op in shared {
            assert_eq!(op.lock_mode(), LockMode::Shared, "{}", op);
        }
        let exclusive = [
            ContOpcode::Create,
            ContOpcode::Destroy,
            ContOpcode::Open,
            ContOpcode::Close,
            ContOpcode::AttrSet,
            ContOpcode::EpochCommit,
            ContOpcode::SnapCreate,
            ContOpcode::SnapDestroy,
        ];
        for op in exclusive {
            assert_eq!(op.lock_mode(), LockMode::Exclusive, "{}", op);
        }
    }

    #[test]
    fn test_request_json_shape() {
        let req = ContRequest {
            op: ContOpIn {
                pool_hdl: PoolHandleId::new(),
                cont: ContainerId::new(),
                hdl: ContHandleId::new(),
            },
            body: ContRequestBody::Destroy { force: true },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["body"]["op"], "destroy");
        assert_eq!(json["body"]["force"], true);
        let back: ContRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.body.opcode(), ContOpcode::Destroy);
    }
}
