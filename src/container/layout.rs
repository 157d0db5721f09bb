//! Metadata layout of the container service.
//!
//! ```text
//! root
//! ├── containers              generic, container UUID -> attribute KVS
//! │   └── <cont uuid>         generic
//! │       ├── ghce            u64
//! │       ├── ghpce           u64
//! │       ├── max_oid         u64
//! │       ├── lres            integer, epoch -> handle count
//! │       ├── lhes            integer, epoch -> handle count
//! │       ├── snapshots       integer, epoch -> ()
//! │       └── user            generic, NUL-terminated name -> bytes
//! └── container_handles       generic, handle UUID -> ContainerHdl
//! ```

use crate::types::{ContOpenFlags, ContainerId, Epoch, PoolHandleId};
use serde::{Deserialize, Serialize};

/// Container table, child of the service root.
pub const CONTS: &[u8] = b"containers";
/// Container handle table, child of the service root.
pub const HDLS: &[u8] = b"container_handles";

pub const ATTR_GHCE: &[u8] = b"ghce";
pub const ATTR_GHPCE: &[u8] = b"ghpce";
pub const ATTR_MAX_OID: &[u8] = b"max_oid";
pub const ATTR_LRES: &[u8] = b"lres";
pub const ATTR_LHES: &[u8] = b"lhes";
pub const ATTR_SNAPSHOTS: &[u8] = b"snapshots";
pub const ATTR_USER: &[u8] = b"user";

/// Row of the handle table. Present exactly while the handle is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHdl {
    /// Pool handle the container was opened through.
    pub pool_hdl: PoolHandleId,
    pub cont: ContainerId,
    pub capas: ContOpenFlags,
    /// Highest epoch this handle committed.
    pub hce: Epoch,
    /// Lowest epoch this handle still references.
    pub lre: Epoch,
    /// Lowest epoch this handle holds for writing, `EPOCH_MAX` if none.
    pub lhe: Epoch,
}

impl ContainerHdl {
    pub fn new(pool_hdl: PoolHandleId, cont: ContainerId, capas: ContOpenFlags) -> Self {
        Self {
            pool_hdl,
            cont,
            capas,
            hce: 0,
            lre: 0,
            lhe: crate::types::EPOCH_MAX,
        }
    }
}
