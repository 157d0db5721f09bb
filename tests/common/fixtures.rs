// Pool fixtures and instrumented transports for integration tests

use async_trait::async_trait;
use coffer::container::{
    cont_op_handler, ContOpIn, ContReply, ContReplyBody, ContRequest, ContRequestBody,
};
use coffer::error::Result as CofferResult;
use coffer::pool::{Pool, PoolService};
use coffer::rdb::Rdb;
use coffer::rsvc::ReplicatedService;
use coffer::target::{LocalTransport, TargetReply, TargetRequest, TargetService, TargetTransport};
use coffer::types::{
    ContHandleId, ContOpenFlags, ContainerId, PoolCapas, PoolHandleId, PoolId, TargetId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rank of the single replica in every fixture.
pub const TEST_RANK: u64 = 1;

/// A led, bootstrapped pool service over in-process targets, with one
/// read-write pool handle connected.
pub struct TestPool {
    pub host: Arc<PoolService>,
    pub targets: LocalTransport,
    pub pool_hdl: PoolHandleId,
}

impl TestPool {
    pub fn new(num_targets: u32) -> Self {
        let targets = LocalTransport::with_targets(num_targets);
        Self::with_transport(targets.clone(), Arc::new(targets))
    }

    /// Broadcasts go through `transport`; `targets` is what it ends up at.
    pub fn with_transport(targets: LocalTransport, transport: Arc<dyn TargetTransport>) -> Self {
        let pool = Arc::new(Pool::new(PoolId::new(), transport, targets.targets()));
        let rsvc = ReplicatedService::new(Rdb::open_memory(), TEST_RANK);
        let host = PoolService::new(pool, rsvc);
        host.step_up().expect("step up");
        host.create().expect("bootstrap");

        let pool_hdl = PoolHandleId::new();
        host.connect(pool_hdl, PoolCapas::RW).expect("connect");

        Self {
            host,
            targets,
            pool_hdl,
        }
    }

    pub fn pool_uuid(&self) -> PoolId {
        self.host.pool().uuid()
    }

    pub fn target(&self, id: TargetId) -> Arc<TargetService> {
        self.targets.target(id).expect("target exists")
    }

    /// Connect another pool handle.
    pub fn connect(&self, capas: PoolCapas) -> PoolHandleId {
        let pool_hdl = PoolHandleId::new();
        self.host.connect(pool_hdl, capas).expect("connect");
        pool_hdl
    }

    pub fn op(&self, cont: ContainerId, hdl: ContHandleId) -> ContOpIn {
        ContOpIn {
            pool_hdl: self.pool_hdl,
            cont,
            hdl,
        }
    }

    pub async fn call(&self, op: ContOpIn, body: ContRequestBody) -> ContReply {
        cont_op_handler(&self.host, &ContRequest { op, body }).await
    }

    /// Send a request that must succeed and return its body.
    pub async fn ok(&self, op: ContOpIn, body: ContRequestBody) -> ContReplyBody {
        let reply = self.call(op, body).await;
        assert_eq!(reply.rc, 0, "unexpected failure: {:?}", reply.error);
        reply.body
    }

    /// Create a container and open a handle on it.
    pub async fn create_and_open(&self, capas: ContOpenFlags) -> ContOpIn {
        let op = self.op(ContainerId::new(), ContHandleId::new());
        self.ok(op, ContRequestBody::Create).await;
        self.ok(op, ContRequestBody::Open { capas }).await;
        op
    }
}

/// Tracks the peak number of overlapping operations.
#[derive(Default)]
pub struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Delays every request and records how many are in flight at once.
pub struct TrackingTransport {
    inner: LocalTransport,
    delay: Duration,
    pub tracker: Arc<ConcurrencyTracker>,
}

impl TrackingTransport {
    pub fn new(inner: LocalTransport, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            tracker: Arc::new(ConcurrencyTracker::default()),
        }
    }
}

#[async_trait]
impl TargetTransport for TrackingTransport {
    async fn send(&self, target: TargetId, request: &TargetRequest) -> CofferResult<TargetReply> {
        self.tracker.enter();
        tokio::time::sleep(self.delay).await;
        let reply = self.inner.send(target, request).await;
        self.tracker.exit();
        reply
    }
}
