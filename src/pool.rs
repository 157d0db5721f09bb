//! Pool objects and the pool service hosting the container service.
//!
//! A [`PoolService`] is the replica of one pool's metadata service on this
//! node. While it leads, it owns a live [`ContService`] bound to the pool;
//! on step-down the container service is dropped and requests are turned
//! away with a leadership hint.

use crate::container::{self, ContService};
use crate::error::{CofferError, Result};
use crate::rdb::RdbPath;
use crate::rsvc::ReplicatedService;
use crate::target::TargetTransport;
use crate::types::{NodeId, PoolCapas, PoolHandleId, PoolId, TargetId, Term};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A storage pool: its identity and the targets its data is spread over.
pub struct Pool {
    uuid: PoolId,
    targets: Vec<TargetId>,
    transport: Arc<dyn TargetTransport>,
}

impl Pool {
    pub fn new(uuid: PoolId, transport: Arc<dyn TargetTransport>, targets: Vec<TargetId>) -> Self {
        Self {
            uuid,
            targets,
            transport,
        }
    }

    pub fn uuid(&self) -> PoolId {
        self.uuid
    }

    /// Targets every broadcast goes to.
    pub fn targets(&self) -> &[TargetId] {
        &self.targets
    }

    pub fn transport(&self) -> &dyn TargetTransport {
        self.transport.as_ref()
    }
}

/// A client connection to a pool.
pub struct PoolHandle {
    uuid: PoolHandleId,
    pool: Arc<Pool>,
    capas: PoolCapas,
}

impl PoolHandle {
    pub fn new(uuid: PoolHandleId, pool: Arc<Pool>, capas: PoolCapas) -> Self {
        Self { uuid, pool, capas }
    }

    pub fn uuid(&self) -> PoolHandleId {
        self.uuid
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn capas(&self) -> PoolCapas {
        self.capas
    }
}

/// One replica of a pool service and the container service it hosts.
pub struct PoolService {
    pool: Arc<Pool>,
    rsvc: Arc<ReplicatedService>,
    handles: RwLock<HashMap<PoolHandleId, Arc<PoolHandle>>>,
    cont_svc: RwLock<Option<Arc<ContService>>>,
}

impl PoolService {
    pub fn new(pool: Arc<Pool>, rsvc: Arc<ReplicatedService>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            rsvc,
            handles: RwLock::new(HashMap::new()),
            cont_svc: RwLock::new(None),
        })
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn rsvc(&self) -> &Arc<ReplicatedService> {
        &self.rsvc
    }

    /// Bootstrap the container metadata of a new pool. Leader only.
    pub fn create(&self) -> Result<()> {
        let mut tx = self.rsvc.begin()?;
        container::init_metadata(&mut tx, &RdbPath::root(), self.pool.uuid())?;
        tx.commit()?;
        info!(pool = %self.pool.uuid(), "Pool service created");
        Ok(())
    }

    /// Whether [`PoolService::create`] has run. Leader only.
    pub fn is_bootstrapped(&self) -> Result<bool> {
        let tx = self.rsvc.begin()?;
        tx.kvs_exists(&RdbPath::root().child(container::layout::CONTS))
    }

    /// Take leadership and start a fresh container service.
    pub fn step_up(&self) -> Result<Term> {
        let term = self.rsvc.step_up()?;

        let svc = ContService::init(self.pool.uuid(), 0, self.rsvc.clone())
            .and_then(|svc| svc.step_up(self.pool.clone()).map(|_| svc));
        match svc {
            Ok(svc) => {
                *self.cont_svc.write() = Some(Arc::new(svc));
                info!(pool = %self.pool.uuid(), term, "Pool service stepped up");
                Ok(term)
            }
            Err(e) => {
                warn!(pool = %self.pool.uuid(), error = %e, "Container service failed to start");
                self.rsvc.step_down(None);
                Err(e)
            }
        }
    }

    /// Give up leadership. Pool handles survive, so requests through them
    /// are answered with a leadership hint.
    pub fn step_down(&self, new_leader: Option<NodeId>) {
        if let Some(svc) = self.cont_svc.write().take() {
            svc.step_down();
        }
        self.rsvc.step_down(new_leader);
        info!(pool = %self.pool.uuid(), ?new_leader, "Pool service stepped down");
    }

    /// The live container service of `pool_uuid`.
    pub fn lookup_leader(&self, pool_uuid: PoolId) -> Result<Arc<ContService>> {
        if pool_uuid != self.pool.uuid() {
            return Err(CofferError::NotFound(format!("pool {}", pool_uuid)));
        }
        match self.cont_svc.read().as_ref() {
            Some(svc) if self.rsvc.is_leader() => Ok(svc.clone()),
            _ => Err(CofferError::NotLeader {
                hint: self.rsvc.hint(),
            }),
        }
    }

    /// Register a pool handle. Reconnecting with the same capabilities is a
    /// no-op.
    pub fn connect(&self, uuid: PoolHandleId, capas: PoolCapas) -> Result<Arc<PoolHandle>> {
        self.rsvc.check_leader()?;

        let mut handles = self.handles.write();
        if let Some(existing) = handles.get(&uuid) {
            if existing.capas() != capas {
                return Err(CofferError::Conflict(format!(
                    "pool handle {} already connected with {:?}",
                    uuid,
                    existing.capas()
                )));
            }
            return Ok(existing.clone());
        }

        let hdl = Arc::new(PoolHandle::new(uuid, self.pool.clone(), capas));
        handles.insert(uuid, hdl.clone());
        debug!(pool = %self.pool.uuid(), pool_hdl = %uuid, ?capas, "Pool handle connected");
        Ok(hdl)
    }

    pub fn lookup_handle(&self, uuid: PoolHandleId) -> Result<Arc<PoolHandle>> {
        self.handles
            .read()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| CofferError::NoHandle(format!("pool handle {}", uuid)))
    }

    /// Revoke pool handles, closing every container handle opened through
    /// them first. Unknown handles are ignored.
    pub async fn disconnect(&self, uuids: &[PoolHandleId]) -> Result<()> {
        let known: Vec<PoolHandleId> = {
            let handles = self.handles.read();
            uuids
                .iter()
                .copied()
                .filter(|uuid| handles.contains_key(uuid))
                .collect()
        };
        if known.is_empty() {
            return Ok(());
        }

        container::close_by_pool_hdls(self, self.pool.uuid(), &known).await?;

        let mut handles = self.handles.write();
        for uuid in &known {
            handles.remove(uuid);
        }
        debug!(pool = %self.pool.uuid(), count = known.len(), "Pool handles disconnected");
        Ok(())
    }
}
