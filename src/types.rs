//! Core type definitions for the coffer container service.
//!
//! This module contains the identifiers and small value types that flow
//! through the container service: pool and container UUIDs, handle UUIDs,
//! capability bit sets, epochs, and the leadership hint returned on every
//! reply.
//!
//! # Key Types
//!
//! - [`PoolId`], [`PoolHandleId`], [`ContainerId`], [`ContHandleId`]: UUID
//!   newtypes so a container UUID can never be passed where a handle UUID is
//!   expected
//! - [`PoolCapas`]: capabilities granted to a pool handle at connect time
//! - [`ContOpenFlags`]: access requested when opening a container
//! - [`LeaderHint`]: where the current service leader lives
//!
//! # Type Aliases
//!
//! - [`NodeId`] = `u64`: replica rank
//! - [`Term`] = `u64`: leadership term
//! - [`Epoch`] = `u64`: container epoch
//! - [`TargetId`] = `u32`: storage target index within a pool
//!
//! # Examples
//!
//! ```rust
//! use coffer::types::{ContainerId, PoolCapas};
//!
//! let cont = ContainerId::new();
//! let same = ContainerId::from_bytes(*cont.as_bytes());
//! assert_eq!(cont, same);
//!
//! let capas = PoolCapas::RW;
//! assert!(capas.can_write());
//! assert!(!PoolCapas::RO.can_write());
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Replica rank of a service node.
pub type NodeId = u64;

/// Leadership term of the replicated service.
pub type Term = u64;

/// Container epoch.
pub type Epoch = u64;

/// Highest representable epoch; "no epoch held".
pub const EPOCH_MAX: Epoch = u64::MAX;

/// Storage target index within a pool.
pub type TargetId = u32;

/// Object identifier handed out by the OID allocator.
pub type ObjectId = u64;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Decode from a raw KVS key.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let array: [u8; 16] = bytes.try_into().ok()?;
                Some(Self::from_bytes(array))
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_newtype!(
    /// Unique identifier for a storage pool.
    PoolId
);
uuid_newtype!(
    /// Unique identifier for a pool handle (a client's pool connection).
    PoolHandleId
);
uuid_newtype!(
    /// Unique identifier for a container.
    ContainerId
);
uuid_newtype!(
    /// Unique identifier for an open container handle.
    ContHandleId
);

/// Capabilities granted to a pool handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolCapas(pub u64);

impl PoolCapas {
    pub const RO: PoolCapas = PoolCapas(1 << 0);
    pub const RW: PoolCapas = PoolCapas(1 << 1);
    pub const EX: PoolCapas = PoolCapas(1 << 2);

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, other: PoolCapas) -> bool {
        self.0 & other.0 == other.0
    }

    /// Read-write or exclusive access.
    pub fn can_write(self) -> bool {
        self.contains(Self::RW) || self.contains(Self::EX)
    }
}

impl std::ops::BitOr for PoolCapas {
    type Output = PoolCapas;

    fn bitor(self, rhs: PoolCapas) -> PoolCapas {
        PoolCapas(self.0 | rhs.0)
    }
}

/// Access requested when opening a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContOpenFlags(pub u64);

impl ContOpenFlags {
    pub const RO: ContOpenFlags = ContOpenFlags(1 << 0);
    pub const RW: ContOpenFlags = ContOpenFlags(1 << 1);

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn wants_write(self) -> bool {
        self.0 & Self::RW.0 != 0
    }
}

impl std::fmt::Display for ContOpenFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Leadership hint echoed on every reply so clients can redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LeaderHint {
    /// Rank of the replica believed to be leader.
    pub leader: Option<NodeId>,
    /// Term in which that replica leads.
    pub term: Term,
}

impl LeaderHint {
    pub fn new(leader: Option<NodeId>, term: Term) -> Self {
        Self { leader, term }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_newtype_roundtrip() {
        let id = ContHandleId::new();
        assert_eq!(ContHandleId::from_slice(id.as_bytes()), Some(id));
        assert_eq!(ContHandleId::from_slice(&[0u8; 3]), None);
        assert_eq!(ContHandleId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_pool_capas() {
        assert!(PoolCapas::RW.can_write());
        assert!(PoolCapas::EX.can_write());
        assert!((PoolCapas::RO | PoolCapas::EX).can_write());
        assert!(!PoolCapas::RO.can_write());
        assert!(!PoolCapas::default().can_write());
    }

    #[test]
    fn test_open_flags() {
        assert!(ContOpenFlags::RW.wants_write());
        assert!(!ContOpenFlags::RO.wants_write());
        assert_eq!(ContOpenFlags::RW.to_string(), "0x2");
    }
}
