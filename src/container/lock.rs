//! Metadata lock of a container service.
//!
//! Every RPC holds the lock for the whole life of its transaction,
//! broadcasts included. The only implementation, [`ServiceLock`], is one
//! reader/writer lock per service, so operations on different containers
//! still serialize.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Shared lock (multiple readers).
    Shared,
    /// Exclusive lock (single writer).
    Exclusive,
}

/// Held lock. Released on drop.
pub struct MetadataGuard {
    mode: LockMode,
    _inner: Box<dyn Send + Sync>,
}

impl MetadataGuard {
    pub fn new<G: Send + Sync + 'static>(mode: LockMode, inner: G) -> Self {
        Self {
            mode,
            _inner: Box::new(inner),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

/// Gate ordering metadata-affecting RPCs.
#[async_trait]
pub trait MetadataLock: Send + Sync {
    async fn acquire_read(&self) -> MetadataGuard;

    async fn acquire_write(&self) -> MetadataGuard;

    async fn acquire(&self, mode: LockMode) -> MetadataGuard {
        match mode {
            LockMode::Shared => self.acquire_read().await,
            LockMode::Exclusive => self.acquire_write().await,
        }
    }
}

/// One reader/writer lock for the whole service.
#[derive(Clone, Default)]
pub struct ServiceLock {
    inner: Arc<RwLock<()>>,
}

impl ServiceLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataLock for ServiceLock {
    async fn acquire_read(&self) -> MetadataGuard {
        let guard = self.inner.clone().read_owned().await;
        MetadataGuard::new(LockMode::Shared, guard)
    }

    async fn acquire_write(&self) -> MetadataGuard {
        let guard = self.inner.clone().write_owned().await;
        MetadataGuard::new(LockMode::Exclusive, guard)
    }
}
