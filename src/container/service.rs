//! Container service handle and metadata bootstrap.

use super::layout::{
    ATTR_GHCE, ATTR_GHPCE, ATTR_LHES, ATTR_LRES, ATTR_MAX_OID, ATTR_SNAPSHOTS, ATTR_USER, CONTS,
    HDLS,
};
use super::lock::{MetadataLock, ServiceLock};
use crate::error::{CofferError, Result};
use crate::pool::Pool;
use crate::rdb::{KvsAttr, RdbPath, RdbTx};
use crate::rsvc::ReplicatedService;
use crate::types::{ContainerId, PoolId};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// Create the container and handle tables under `kvs`.
///
/// Only valid while bootstrapping a pool service; running it twice fails
/// with `AlreadyExists`.
pub fn init_metadata(tx: &mut RdbTx, kvs: &RdbPath, pool_uuid: PoolId) -> Result<()> {
    tx.create_kvs(kvs, CONTS, KvsAttr::generic())?;
    tx.create_kvs(kvs, HDLS, KvsAttr::generic())?;
    info!(pool = %pool_uuid, "Initialized container service metadata");
    Ok(())
}

/// The container service of one pool for one leadership term.
pub struct ContService {
    pool_uuid: PoolId,
    id: u32,
    rsvc: Arc<ReplicatedService>,
    lock: Arc<dyn MetadataLock>,
    root: RdbPath,
    conts: RdbPath,
    hdls: RdbPath,
    pool: RwLock<Option<Arc<Pool>>>,
}

impl ContService {
    /// Build the service for `pool_uuid` with the service-wide lock.
    pub fn init(pool_uuid: PoolId, id: u32, rsvc: Arc<ReplicatedService>) -> Result<Self> {
        Self::with_lock(pool_uuid, id, rsvc, Arc::new(ServiceLock::new()))
    }

    pub fn with_lock(
        pool_uuid: PoolId,
        id: u32,
        rsvc: Arc<ReplicatedService>,
        lock: Arc<dyn MetadataLock>,
    ) -> Result<Self> {
        if id != 0 {
            return Err(CofferError::InvalidArgument(format!(
                "container service id {} (only 0 exists)",
                id
            )));
        }

        let root = RdbPath::root();
        let conts = root.child(CONTS);
        let hdls = root.child(HDLS);
        debug!(pool = %pool_uuid, id, "Container service initialized");

        Ok(Self {
            pool_uuid,
            id,
            rsvc,
            lock,
            root,
            conts,
            hdls,
            pool: RwLock::new(None),
        })
    }

    /// Bind the in-memory pool. The service must be unbound.
    pub fn step_up(&self, pool: Arc<Pool>) -> Result<()> {
        if pool.uuid() != self.pool_uuid {
            return Err(CofferError::InvalidArgument(format!(
                "pool {} bound to container service of {}",
                pool.uuid(),
                self.pool_uuid
            )));
        }
        let mut bound = self.pool.write();
        if bound.is_some() {
            return Err(CofferError::Internal(format!(
                "container service of {} already stepped up",
                self.pool_uuid
            )));
        }
        *bound = Some(pool);
        info!(pool = %self.pool_uuid, term = self.rsvc.term(), "Container service stepped up");
        Ok(())
    }

    /// Release the pool binding.
    pub fn step_down(&self) {
        if self.pool.write().take().is_some() {
            info!(pool = %self.pool_uuid, "Container service stepped down");
        }
    }

    /// Bound pool, or `NotLeader` after step-down.
    pub fn pool(&self) -> Result<Arc<Pool>> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| CofferError::NotLeader {
                hint: self.rsvc.hint(),
            })
    }

    pub fn pool_uuid(&self) -> PoolId {
        self.pool_uuid
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn rsvc(&self) -> &Arc<ReplicatedService> {
        &self.rsvc
    }

    pub fn lock(&self) -> &dyn MetadataLock {
        self.lock.as_ref()
    }

    pub fn root(&self) -> &RdbPath {
        &self.root
    }

    pub fn conts(&self) -> &RdbPath {
        &self.conts
    }

    pub fn hdls(&self) -> &RdbPath {
        &self.hdls
    }

    /// Resolve a container. `NotFound` if it does not exist.
    pub fn lookup_cont(&self, tx: &RdbTx, uuid: ContainerId) -> Result<Container<'_>> {
        let attrs = self.conts.child(uuid.as_bytes());
        if !tx.kvs_exists(&attrs)? {
            return Err(CofferError::NotFound(format!("container {}", uuid)));
        }
        Ok(Container::new(self, uuid, attrs))
    }
}

impl Drop for ContService {
    fn drop(&mut self) {
        debug!(pool = %self.pool_uuid, id = self.id, "Container service finalized");
    }
}

/// Paths of one existing container. Only meaningful inside the
/// transaction that looked it up.
pub struct Container<'a> {
    pub uuid: ContainerId,
    pub svc: &'a ContService,
    pub attrs: RdbPath,
    pub lres: RdbPath,
    pub lhes: RdbPath,
    pub snaps: RdbPath,
    pub user: RdbPath,
}

impl<'a> Container<'a> {
    fn new(svc: &'a ContService, uuid: ContainerId, attrs: RdbPath) -> Self {
        Self {
            uuid,
            svc,
            lres: attrs.child(ATTR_LRES),
            lhes: attrs.child(ATTR_LHES),
            snaps: attrs.child(ATTR_SNAPSHOTS),
            user: attrs.child(ATTR_USER),
            attrs,
        }
    }

    pub fn ghce(&self, tx: &RdbTx) -> Result<u64> {
        tx.lookup(&self.attrs, ATTR_GHCE)
    }

    pub fn ghpce(&self, tx: &RdbTx) -> Result<u64> {
        tx.lookup(&self.attrs, ATTR_GHPCE)
    }

    pub fn max_oid(&self, tx: &RdbTx) -> Result<u64> {
        tx.lookup(&self.attrs, ATTR_MAX_OID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdb::Rdb;
    use crate::target::LocalTransport;

    fn rsvc() -> Arc<ReplicatedService> {
        let rsvc = ReplicatedService::new(Rdb::open_memory(), 1);
        rsvc.step_up().unwrap();
        rsvc
    }

    #[test]
    fn test_only_service_zero() {
        assert!(ContService::init(PoolId::new(), 1, rsvc()).is_err());
        assert!(ContService::init(PoolId::new(), 0, rsvc()).is_ok());
    }

    #[test]
    fn test_init_metadata_twice_fails() {
        let rsvc = rsvc();
        let mut tx = rsvc.begin().unwrap();
        init_metadata(&mut tx, &RdbPath::root(), PoolId::new()).unwrap();
        assert!(matches!(
            init_metadata(&mut tx, &RdbPath::root(), PoolId::new()),
            Err(CofferError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_step_up_binds_once() {
        let pool_uuid = PoolId::new();
        let svc = ContService::init(pool_uuid, 0, rsvc()).unwrap();
        let pool = Arc::new(Pool::new(pool_uuid, Arc::new(LocalTransport::with_targets(1)), vec![0]));

        assert!(matches!(svc.pool(), Err(CofferError::NotLeader { .. })));
        svc.step_up(pool.clone()).unwrap();
        assert!(svc.step_up(pool).is_err());
        assert!(svc.pool().is_ok());
        svc.step_down();
        assert!(svc.pool().is_err());
    }

    #[test]
    fn test_lookup_missing_container() {
        let rsvc = rsvc();
        let svc = ContService::init(PoolId::new(), 0, rsvc.clone()).unwrap();
        let mut tx = rsvc.begin().unwrap();
        init_metadata(&mut tx, svc.root(), svc.pool_uuid()).unwrap();
        let err = svc.lookup_cont(&tx, ContainerId::new()).err().unwrap();
        assert!(err.is_not_found());
    }
}
