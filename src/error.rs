//! Error types for the coffer container service.
//!
//! This module provides a unified error type [`CofferError`] for all service
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Container service**: existence, permission, handle and conflict errors
//!   raised by the container handlers
//! - **Replication**: leadership changes observed at transaction begin/commit
//! - **Targets**: broadcast failures, collapsed into a single [`CofferError::Io`]
//! - **Storage/Network/Configuration**: everything below the service
//!
//! # Wire status codes
//!
//! Every reply carries an `i32` status. [`CofferError::to_status`] maps an
//! error to its code and [`CofferError::from_status`] rebuilds an error on
//! the client side:
//!
//! ```rust
//! use coffer::error::{status, CofferError};
//!
//! let err = CofferError::AlreadyExists("container".into());
//! assert_eq!(err.to_status(), status::EXIST);
//!
//! let back = CofferError::from_status(status::EXIST, "container");
//! assert!(matches!(back, CofferError::AlreadyExists(_)));
//! ```

use crate::types::{LeaderHint, Term};
use std::io;
use thiserror::Error;

/// Stable wire status codes. Zero is success.
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const NO_PERM: i32 = -1001;
    pub const NO_HDL: i32 = -1002;
    pub const INVAL: i32 = -1003;
    pub const EXIST: i32 = -1004;
    pub const NONEXIST: i32 = -1005;
    pub const CONFLICT: i32 = -1006;
    pub const NOMEM: i32 = -1009;
    pub const TIMEDOUT: i32 = -1011;
    pub const BUSY: i32 = -1012;
    pub const PROTO: i32 = -1014;
    pub const UNREACH: i32 = -1015;
    pub const MISC: i32 = -1025;
    pub const IO: i32 = -2001;
    pub const NOT_LEADER: i32 = -2008;
    pub const LEADERSHIP_LOST: i32 = -2009;
}

/// Main error type for coffer operations.
#[derive(Error, Debug)]
pub enum CofferError {
    // Container service errors
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    NoPermission(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No such handle: {0}")]
    NoHandle(String),

    #[error("Busy: {0}")]
    Busy(String),

    /// One or more storage targets failed a broadcast.
    #[error("Target I/O failure: {0}")]
    Io(String),

    #[error("Out of memory: {0}")]
    NoMemory(String),

    // Replication errors
    #[error("Not the leader. Leader is: {hint:?}")]
    NotLeader { hint: LeaderHint },

    #[error("Leadership lost in term {term}")]
    LeadershipLost { term: Term },

    // Request errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("RocksDB error: {0}")]
    RocksDb(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    StdIo(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CofferError {
    /// Map to the wire status code carried in replies.
    pub fn to_status(&self) -> i32 {
        match self {
            CofferError::AlreadyExists(_) => status::EXIST,
            CofferError::NotFound(_) => status::NONEXIST,
            CofferError::NoPermission(_) => status::NO_PERM,
            CofferError::Conflict(_) => status::CONFLICT,
            CofferError::NoHandle(_) => status::NO_HDL,
            CofferError::Busy(_) => status::BUSY,
            CofferError::Io(_) => status::IO,
            CofferError::NoMemory(_) => status::NOMEM,
            CofferError::NotLeader { .. } => status::NOT_LEADER,
            CofferError::LeadershipLost { .. } => status::LEADERSHIP_LOST,
            CofferError::InvalidArgument(_)
            | CofferError::Config(_)
            | CofferError::InvalidConfig { .. } => status::INVAL,
            CofferError::Protocol(_)
            | CofferError::Serialization(_)
            | CofferError::Deserialization(_) => status::PROTO,
            CofferError::Network(_) => status::UNREACH,
            CofferError::Timeout(_) => status::TIMEDOUT,
            CofferError::Storage(_) | CofferError::RocksDb(_) | CofferError::StdIo(_) => status::IO,
            CofferError::Internal(_) => status::MISC,
        }
    }

    /// Rebuild an error from a reply status. `code` must be non-zero.
    pub fn from_status(code: i32, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match code {
            status::EXIST => CofferError::AlreadyExists(detail),
            status::NONEXIST => CofferError::NotFound(detail),
            status::NO_PERM => CofferError::NoPermission(detail),
            status::CONFLICT => CofferError::Conflict(detail),
            status::NO_HDL => CofferError::NoHandle(detail),
            status::BUSY => CofferError::Busy(detail),
            status::IO => CofferError::Io(detail),
            status::NOMEM => CofferError::NoMemory(detail),
            status::NOT_LEADER => CofferError::NotLeader {
                hint: LeaderHint::default(),
            },
            status::LEADERSHIP_LOST => CofferError::LeadershipLost { term: 0 },
            status::INVAL => CofferError::InvalidArgument(detail),
            status::PROTO => CofferError::Protocol(detail),
            status::UNREACH => CofferError::Network(detail),
            status::TIMEDOUT => CofferError::Timeout(0),
            _ => CofferError::Internal(format!("status {}: {}", code, detail)),
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CofferError::NotLeader { .. }
                | CofferError::LeadershipLost { .. }
                | CofferError::Timeout(_)
                | CofferError::Network(_)
        )
    }

    /// Whether this error means the key or container is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CofferError::NotFound(_))
    }
}

impl From<rocksdb::Error> for CofferError {
    fn from(e: rocksdb::Error) -> Self {
        CofferError::RocksDb(e.to_string())
    }
}

impl From<bincode::Error> for CofferError {
    fn from(e: bincode::Error) -> Self {
        CofferError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CofferError {
    fn from(e: serde_json::Error) -> Self {
        CofferError::Serialization(e.to_string())
    }
}

/// Result type alias for coffer operations.
pub type Result<T> = std::result::Result<T, CofferError>;
