//! Container metadata service.
//!
//! Owns which containers exist in a pool, which handles are open on them
//! and their epoch state. Everything lives in the pool's replicated
//! metadata store; see [`layout`] for the schema.
//!
//! Requests enter through [`cont_op_handler`] and [`oid_fetch_add`], and
//! pool handle revocation through [`close_by_pool_hdls`]. Target side state
//! is kept in step by broadcasting to every pool target before metadata
//! changes commit.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod attr;
pub mod broadcast;
pub mod bulk;
pub mod close;
pub mod dispatch;
pub mod epoch;
pub mod layout;
pub mod lock;
pub mod oid;
pub mod ops;
pub mod rpc;
pub mod service;

pub use self::attr::{
    decode_attr_get, decode_attr_list, encode_attr_get, encode_attr_set, AttrGetRequest,
    AttrValue,
};
pub use self::broadcast::broadcast;
pub use self::bulk::Bulk;
pub use self::close::close_by_pool_hdls;
pub use self::dispatch::cont_op_handler;
pub use self::layout::ContainerHdl;
pub use self::lock::{LockMode, MetadataGuard, MetadataLock, ServiceLock};
pub use self::oid::oid_fetch_add;
pub use self::rpc::{
    ContOpIn, ContOpcode, ContQueryInfo, ContReply, ContReplyBody, ContRequest, ContRequestBody,
    EpochState, OidFetchAddReply, OidFetchAddRequest,
};
pub use self::service::{init_metadata, ContService, Container};
