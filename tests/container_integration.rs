//! Integration tests for the container service.

#[allow(dead_code)]
mod common;

use common::{TestPool, TrackingTransport};
use coffer::container::{epoch, oid_fetch_add, ContReplyBody, ContRequestBody, ContainerHdl};
use coffer::error::{status, CofferError};
use coffer::rdb::int_key;
use coffer::target::LocalTransport;
use coffer::types::{ContHandleId, ContOpenFlags, ContainerId, PoolCapas, EPOCH_MAX};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_create_and_destroy_lifecycle() {
    let fixture = TestPool::new(3);
    let op = fixture.op(ContainerId::new(), ContHandleId::new());

    fixture.ok(op, ContRequestBody::Create).await;
    let reply = fixture.call(op, ContRequestBody::Create).await;
    assert_eq!(reply.rc, status::EXIST);

    // Creation alone never reaches targets
    for id in 0..3 {
        assert_eq!(fixture.target(id).request_count(), 0);
    }

    fixture.ok(op, ContRequestBody::Destroy { force: false }).await;
    // Destroying an absent container succeeds without a broadcast
    fixture.ok(op, ContRequestBody::Destroy { force: false }).await;
    assert_eq!(fixture.target(0).request_count(), 1);

    let reply = fixture
        .call(
            op,
            ContRequestBody::Open {
                capas: ContOpenFlags::RW,
            },
        )
        .await;
    assert_eq!(reply.rc, status::NONEXIST);
}

#[tokio::test]
async fn test_create_needs_writable_pool_handle() {
    let fixture = TestPool::new(1);
    let ro = fixture.connect(PoolCapas::RO);
    let mut op = fixture.op(ContainerId::new(), ContHandleId::new());
    op.pool_hdl = ro;

    let reply = fixture.call(op, ContRequestBody::Create).await;
    assert_eq!(reply.rc, status::NO_PERM);

    // Read-only opens are still allowed through it
    op.pool_hdl = fixture.pool_hdl;
    fixture.ok(op, ContRequestBody::Create).await;
    op.pool_hdl = ro;
    fixture
        .ok(
            op,
            ContRequestBody::Open {
                capas: ContOpenFlags::RO,
            },
        )
        .await;

    let op_rw = coffer::container::ContOpIn {
        hdl: ContHandleId::new(),
        ..op
    };
    let reply = fixture
        .call(
            op_rw,
            ContRequestBody::Open {
                capas: ContOpenFlags::RW,
            },
        )
        .await;
    assert_eq!(reply.rc, status::NO_PERM);
}

#[tokio::test]
async fn test_open_replay_and_conflict() {
    let fixture = TestPool::new(2);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;
    let requests_after_open = fixture.target(0).request_count();

    // Same flags: no second broadcast
    fixture
        .ok(
            op,
            ContRequestBody::Open {
                capas: ContOpenFlags::RW,
            },
        )
        .await;
    assert_eq!(fixture.target(0).request_count(), requests_after_open);

    let reply = fixture
        .call(
            op,
            ContRequestBody::Open {
                capas: ContOpenFlags::RO,
            },
        )
        .await;
    assert_eq!(reply.rc, status::CONFLICT);

    for id in 0..2 {
        assert!(fixture.target(id).has_handle(op.hdl));
    }
}

#[tokio::test]
async fn test_close_handle() {
    let fixture = TestPool::new(2);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;
    fixture
        .ok(op, ContRequestBody::EpochCommit { epoch: 4 })
        .await;

    fixture.ok(op, ContRequestBody::Close).await;
    for id in 0..2 {
        let target = fixture.target(id);
        assert!(!target.has_handle(op.hdl));
        assert_eq!(target.container_hce(fixture.pool_uuid(), op.cont), Some(4));
    }

    // Closing again is a no-op
    fixture.ok(op, ContRequestBody::Close).await;

    let reply = fixture.call(op, ContRequestBody::Query).await;
    assert_eq!(reply.rc, status::NO_HDL);
}

#[tokio::test]
async fn test_handle_of_another_container_rejected() {
    let fixture = TestPool::new(1);
    let first = fixture.create_and_open(ContOpenFlags::RW).await;
    let second = fixture.create_and_open(ContOpenFlags::RW).await;

    let crossed = fixture.op(second.cont, first.hdl);
    let reply = fixture.call(crossed, ContRequestBody::Query).await;
    assert_eq!(reply.rc, status::NO_HDL);

    let result = oid_fetch_add(&fixture.host, fixture.pool_hdl, second.cont, first.hdl, 1).await;
    assert!(matches!(result, Err(CofferError::NoHandle(_))));
}

#[tokio::test]
async fn test_unknown_pool_handle() {
    let fixture = TestPool::new(1);
    let mut op = fixture.op(ContainerId::new(), ContHandleId::new());
    op.pool_hdl = coffer::types::PoolHandleId::new();

    let reply = fixture.call(op, ContRequestBody::Create).await;
    assert_eq!(reply.rc, status::NO_HDL);
}

#[tokio::test]
async fn test_oid_allocation_sequence() {
    let fixture = TestPool::new(1);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;
    let alloc = |count| oid_fetch_add(&fixture.host, op.pool_hdl, op.cont, op.hdl, count);

    assert_eq!(alloc(10).await.unwrap(), 0);
    assert_eq!(alloc(5).await.unwrap(), 10);

    // The mark belongs to the container, not the handle
    fixture.ok(op, ContRequestBody::Close).await;
    fixture
        .ok(
            op,
            ContRequestBody::Open {
                capas: ContOpenFlags::RW,
            },
        )
        .await;
    assert_eq!(alloc(0).await.unwrap(), 15);
    assert_eq!(alloc(1).await.unwrap(), 15);

    // Overflow leaves the mark where it was
    assert!(matches!(
        alloc(u64::MAX).await,
        Err(CofferError::InvalidArgument(_))
    ));
    assert_eq!(alloc(1).await.unwrap(), 16);

    let missing = oid_fetch_add(
        &fixture.host,
        op.pool_hdl,
        ContainerId::new(),
        op.hdl,
        1,
    )
    .await;
    assert!(missing.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_concurrent_oid_ranges_disjoint() {
    let fixture = TestPool::new(1);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;

    let calls = (0..16).map(|_| oid_fetch_add(&fixture.host, op.pool_hdl, op.cont, op.hdl, 3));
    let mut starts: Vec<u64> = join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    starts.sort_unstable();

    let expected: Vec<u64> = (0..16).map(|i| i * 3).collect();
    assert_eq!(starts, expected);
}

#[tokio::test]
async fn test_destroy_is_atomic_on_target_failure() {
    let fixture = TestPool::new(3);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;
    fixture.ok(op, ContRequestBody::Close).await;

    fixture.target(2).set_failing(true);
    let reply = fixture
        .call(op, ContRequestBody::Destroy { force: true })
        .await;
    assert_eq!(reply.rc, status::IO);

    // Metadata untouched: the container is still there
    fixture.target(2).set_failing(false);
    let reply = fixture.call(op, ContRequestBody::Create).await;
    assert_eq!(reply.rc, status::EXIST);

    fixture.ok(op, ContRequestBody::Destroy { force: true }).await;
    let reply = fixture.call(op, ContRequestBody::Create).await;
    assert_eq!(reply.rc, 0);
}

#[tokio::test]
async fn test_destroy_with_open_handles() {
    let fixture = TestPool::new(2);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;

    let reply = fixture
        .call(op, ContRequestBody::Destroy { force: false })
        .await;
    assert_ne!(reply.rc, 0);

    fixture.ok(op, ContRequestBody::Destroy { force: true }).await;
    for id in 0..2 {
        let target = fixture.target(id);
        assert!(!target.has_container(fixture.pool_uuid(), op.cont));
        assert!(!target.has_handle(op.hdl));
    }
}

#[tokio::test]
async fn test_open_fails_when_target_fails() {
    let fixture = TestPool::new(2);
    let op = fixture.op(ContainerId::new(), ContHandleId::new());
    fixture.ok(op, ContRequestBody::Create).await;

    fixture.target(1).set_failing(true);
    let reply = fixture
        .call(
            op,
            ContRequestBody::Open {
                capas: ContOpenFlags::RW,
            },
        )
        .await;
    assert_eq!(reply.rc, status::IO);

    // No handle row was written
    fixture.target(1).set_failing(false);
    let reply = fixture.call(op, ContRequestBody::Query).await;
    assert_eq!(reply.rc, status::NO_HDL);
}

#[tokio::test]
async fn test_disconnect_closes_handles_of_pool_handle() {
    let fixture = TestPool::new(2);
    let a = fixture.create_and_open(ContOpenFlags::RW).await;
    let a2 = fixture.op(a.cont, ContHandleId::new());
    fixture
        .ok(
            a2,
            ContRequestBody::Open {
                capas: ContOpenFlags::RO,
            },
        )
        .await;

    let other = fixture.connect(PoolCapas::RW);
    let mut b = fixture.op(ContainerId::new(), ContHandleId::new());
    b.pool_hdl = other;
    fixture.ok(b, ContRequestBody::Create).await;
    fixture
        .ok(
            b,
            ContRequestBody::Open {
                capas: ContOpenFlags::RW,
            },
        )
        .await;

    fixture.host.disconnect(&[fixture.pool_hdl]).await.unwrap();

    for id in 0..2 {
        let target = fixture.target(id);
        assert!(!target.has_handle(a.hdl));
        assert!(!target.has_handle(a2.hdl));
        assert!(target.has_handle(b.hdl));
    }
    assert!(fixture.host.lookup_handle(fixture.pool_hdl).is_err());

    // The surviving pool handle still works, the closed handle rows are gone
    fixture.ok(b, ContRequestBody::Query).await;
    let mut stale = a;
    stale.pool_hdl = other;
    let reply = fixture.call(stale, ContRequestBody::Query).await;
    assert_eq!(reply.rc, status::NO_HDL);
}

#[tokio::test]
async fn test_forced_destroy_drops_handle_rows() {
    let fixture = TestPool::new(2);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;
    let ro = fixture.op(op.cont, ContHandleId::new());
    fixture
        .ok(
            ro,
            ContRequestBody::Open {
                capas: ContOpenFlags::RO,
            },
        )
        .await;

    fixture.ok(op, ContRequestBody::Destroy { force: true }).await;

    // Recreating the same uuid does not resurrect the old handles
    fixture.ok(op, ContRequestBody::Create).await;
    for stale in [op, ro] {
        let reply = fixture.call(stale, ContRequestBody::Query).await;
        assert_eq!(reply.rc, status::NO_HDL);
    }

    fixture.host.disconnect(&[fixture.pool_hdl]).await.unwrap();
    assert!(fixture.host.lookup_handle(fixture.pool_hdl).is_err());
}

#[tokio::test]
async fn test_disconnect_drops_rows_of_missing_container() {
    let fixture = TestPool::new(1);
    let live = fixture.create_and_open(ContOpenFlags::RW).await;

    // A row left behind by a container that no longer exists
    let svc = fixture.host.lookup_leader(fixture.pool_uuid()).unwrap();
    let orphan = ContHandleId::new();
    let mut tx = svc.rsvc().begin().unwrap();
    tx.update(
        svc.hdls(),
        orphan.as_bytes(),
        &ContainerHdl::new(fixture.pool_hdl, ContainerId::new(), ContOpenFlags::RW),
    )
    .unwrap();
    tx.commit().unwrap();

    fixture.host.disconnect(&[fixture.pool_hdl]).await.unwrap();

    let tx = svc.rsvc().begin().unwrap();
    for hdl in [orphan, live.hdl] {
        assert!(matches!(
            tx.lookup::<ContainerHdl>(svc.hdls(), hdl.as_bytes()),
            Err(CofferError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_bulk_close_keeps_progress_before_failure() {
    let fixture = TestPool::new(1);
    let mut ops = Vec::new();
    for _ in 0..5 {
        ops.push(fixture.create_and_open(ContOpenFlags::RW).await);
    }
    // Handles are closed in key order; break the last one
    ops.sort_by_key(|op| *op.hdl.as_bytes());
    let broken = ops[ops.len() - 1];

    let svc = fixture.host.lookup_leader(fixture.pool_uuid()).unwrap();
    let mut tx = svc.rsvc().begin().unwrap();
    let lres = svc.lookup_cont(&tx, broken.cont).unwrap().lres;
    tx.delete(&lres, &int_key(0)).unwrap();
    tx.commit().unwrap();

    let result = fixture.host.disconnect(&[fixture.pool_hdl]).await;
    assert!(matches!(result, Err(CofferError::NotFound(_))));
    // The pool handle survives so the disconnect can be retried
    assert!(fixture.host.lookup_handle(fixture.pool_hdl).is_ok());

    for op in &ops[..ops.len() - 1] {
        let reply = fixture.call(*op, ContRequestBody::Query).await;
        assert_eq!(reply.rc, status::NO_HDL);
    }
    fixture.ok(broken, ContRequestBody::Query).await;
    // Targets were told about every handle before the loop
    for op in &ops {
        assert!(!fixture.target(0).has_handle(op.hdl));
    }
}

#[tokio::test]
async fn test_not_leader_carries_hint() {
    let fixture = TestPool::new(1);
    let op = fixture.op(ContainerId::new(), ContHandleId::new());
    fixture.ok(op, ContRequestBody::Create).await;

    fixture.host.step_down(Some(2));
    let reply = fixture.call(op, ContRequestBody::Create).await;
    assert_eq!(reply.rc, status::NOT_LEADER);
    assert_eq!(reply.hint.leader, Some(2));
    assert_eq!(reply.hint.term, 1);

    // Metadata survives re-election
    fixture.host.step_up().unwrap();
    let reply = fixture.call(op, ContRequestBody::Create).await;
    assert_eq!(reply.rc, status::EXIST);
    assert_eq!(reply.hint.term, 2);
    assert_eq!(reply.hint.leader, Some(common::TEST_RANK));
}

#[tokio::test]
async fn test_epoch_commit_and_snapshots() {
    let fixture = TestPool::new(2);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;

    let state = match fixture
        .ok(op, ContRequestBody::EpochCommit { epoch: 5 })
        .await
    {
        ContReplyBody::Epoch { state } => state,
        body => panic!("unexpected body {:?}", body),
    };
    assert_eq!((state.hce, state.lhe, state.ghce), (5, 6, 5));
    assert!(state.ghce <= state.ghpce);

    // Committing an already committed epoch changes nothing
    match fixture
        .ok(op, ContRequestBody::EpochCommit { epoch: 3 })
        .await
    {
        ContReplyBody::Epoch { state } => assert_eq!(state.hce, 5),
        body => panic!("unexpected body {:?}", body),
    }

    for epoch in [EPOCH_MAX, EPOCH_MAX - 1] {
        let reply = fixture
            .call(op, ContRequestBody::EpochCommit { epoch })
            .await;
        assert_eq!(reply.rc, status::INVAL, "epoch {}", epoch);
    }

    fixture.ok(op, ContRequestBody::SnapCreate { epoch: 7 }).await;
    fixture.ok(op, ContRequestBody::SnapCreate { epoch: 9 }).await;
    match fixture
        .ok(op, ContRequestBody::SnapList { capacity: 1 })
        .await
    {
        ContReplyBody::SnapList { total, epochs } => {
            assert_eq!(total, 2);
            assert_eq!(epochs, vec![7]);
        }
        body => panic!("unexpected body {:?}", body),
    }

    fixture.ok(op, ContRequestBody::SnapDestroy { epoch: 7 }).await;
    let reply = fixture
        .call(op, ContRequestBody::SnapDestroy { epoch: 7 })
        .await;
    assert_eq!(reply.rc, status::NONEXIST);
}

#[tokio::test]
async fn test_close_releases_held_epoch() {
    let fixture = TestPool::new(1);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;
    let last = EPOCH_MAX - 2;
    fixture
        .ok(op, ContRequestBody::EpochCommit { epoch: last })
        .await;

    let svc = fixture.host.lookup_leader(fixture.pool_uuid()).unwrap();
    let lhes = {
        let tx = svc.rsvc().begin().unwrap();
        let lhes = svc.lookup_cont(&tx, op.cont).unwrap().lhes;
        assert_eq!(epoch::ref_count(&tx, &lhes, last + 1).unwrap(), 1);
        lhes
    };

    fixture.ok(op, ContRequestBody::Close).await;
    let tx = svc.rsvc().begin().unwrap();
    assert_eq!(epoch::ref_count(&tx, &lhes, last + 1).unwrap(), 0);
    assert_eq!(epoch::ref_count(&tx, &lhes, EPOCH_MAX).unwrap(), 0);
}

#[tokio::test]
async fn test_epoch_ops_need_writable_handle() {
    let fixture = TestPool::new(1);
    let op = fixture.create_and_open(ContOpenFlags::RO).await;

    let reply = fixture
        .call(op, ContRequestBody::EpochCommit { epoch: 1 })
        .await;
    assert_eq!(reply.rc, status::NO_PERM);

    let reply = fixture
        .call(op, ContRequestBody::EpochDiscard { epoch: 1 })
        .await;
    assert_eq!(reply.rc, status::NO_PERM);
}

#[tokio::test]
async fn test_epoch_discard() {
    let fixture = TestPool::new(2);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;
    fixture
        .ok(op, ContRequestBody::EpochCommit { epoch: 4 })
        .await;

    let reply = fixture
        .call(op, ContRequestBody::EpochDiscard { epoch: 4 })
        .await;
    assert_eq!(reply.rc, status::INVAL);

    fixture
        .ok(op, ContRequestBody::EpochDiscard { epoch: 8 })
        .await;
    for id in 0..2 {
        assert_eq!(
            fixture.target(id).discarded_from(fixture.pool_uuid(), op.cont),
            Some(8)
        );
    }
}

#[tokio::test]
async fn test_query_reports_min_purged_epoch() {
    let fixture = TestPool::new(3);
    let op = fixture.create_and_open(ContOpenFlags::RW).await;

    for (id, purged) in [(0, 9), (1, 4), (2, 6)] {
        fixture
            .target(id)
            .set_purged_epoch(fixture.pool_uuid(), op.cont, purged);
    }

    match fixture.ok(op, ContRequestBody::Query).await {
        ContReplyBody::Query { info } => {
            assert_eq!(info.min_purged_epoch, 4);
            assert_eq!(info.epoch.lhe, 1);
            assert_eq!(info.epoch.hce, 0);
        }
        body => panic!("unexpected body {:?}", body),
    }
}

#[tokio::test]
async fn test_writers_serialize_readers_share() {
    let targets = LocalTransport::with_targets(1);
    let transport = Arc::new(TrackingTransport::new(
        targets.clone(),
        Duration::from_millis(20),
    ));
    let tracker = transport.tracker.clone();
    let fixture = TestPool::with_transport(targets, transport);

    // Opens on distinct containers still exclude each other
    let mut ops = Vec::new();
    for _ in 0..4 {
        let op = fixture.op(ContainerId::new(), ContHandleId::new());
        fixture.ok(op, ContRequestBody::Create).await;
        ops.push(op);
    }
    let opens = ops.iter().map(|op| {
        fixture.ok(
            *op,
            ContRequestBody::Open {
                capas: ContOpenFlags::RW,
            },
        )
    });
    join_all(opens).await;
    assert_eq!(tracker.peak(), 1);

    let queries = ops
        .iter()
        .map(|op| fixture.ok(*op, ContRequestBody::Query));
    join_all(queries).await;
    assert!(tracker.peak() > 1);
}
