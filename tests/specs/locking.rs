// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock stealing and recovery after an engine death.

use muster_core::{Action, ActionStatus, ActionVerb, Cause, Clock, ServiceRecord};
use muster_engine::test_support::TestEngine;
use muster_engine::{LockManager, ServiceRegistry, SubmitRequest};
use muster_store::{LockScope, Store};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn dead_engine_recovery_frees_cluster_for_new_work() {
    // Engine 1 claims a CLUSTER_DELETE and "crashes" (heartbeat stops).
    let engine1 = TestEngine::builder().workers(0).build();
    let engine2 = TestEngine::builder()
        .workers(0)
        .shared(Arc::clone(&engine1.store), engine1.clock.clone())
        .build();
    let store = &engine1.store;
    let clock = &engine1.clock;

    let cluster_id = engine1.seed_cluster(0, 1, 10);
    engine1.seed_member(cluster_id, "m1");

    let e1 = engine1.ctx().engine_id;
    let now = clock.epoch_ms();
    store
        .service_create(ServiceRecord::new(e1, "engine", "host-1", "muster", now))
        .unwrap();
    let doomed = Action::builder()
        .verb(ActionVerb::ClusterDelete)
        .target(cluster_id.as_str())
        .cause(Cause::RpcRequest)
        .created_at(now)
        .build();
    let doomed_id = doomed.id;
    store.action_create(doomed).unwrap();
    store.action_acquire(doomed_id, e1, now).unwrap().unwrap();
    store.cluster_lock_acquire(cluster_id, doomed_id, LockScope::Cluster);

    // Engine 2 starts; within service_down_time + periodic_interval its
    // cleanup collects the dead peer.
    let registry2 = ServiceRegistry::new(Arc::clone(engine2.ctx()), "engine", "host-2", "muster");
    registry2.start().unwrap();
    clock.advance(Duration::from_secs(121));
    registry2.cleanup_pass();

    // Invariant R1: no lock references the dead engine, its action is
    // READY with no owner, and the record is gone.
    assert!(store.cluster_lock_owners(cluster_id).is_empty());
    let abandoned = store.action_get(doomed_id).unwrap();
    assert_eq!(abandoned.status, ActionStatus::Ready);
    assert!(abandoned.owner.is_none());
    assert!(store.service_get(e1).is_err());

    // A new CLUSTER_UPDATE on engine 2 can take the lock (L1: it is the
    // only holder).
    let update = engine2
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterUpdate, cluster_id.as_str()))
        .unwrap();
    let locks = LockManager::new(engine2.ctx());
    assert!(locks.cluster_lock_acquire(cluster_id, update, LockScope::Cluster, false).await);
    assert_eq!(store.cluster_lock_owners(cluster_id), vec![update]);

    registry2.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn update_steals_directly_when_owner_is_dead() {
    // Before any cleanup pass runs, a lock attempt that finds a dead owner
    // steals in place and garbage collects the peer's claims.
    let engine1 = TestEngine::builder().workers(0).build();
    let engine2 = TestEngine::builder()
        .workers(0)
        .shared(Arc::clone(&engine1.store), engine1.clock.clone())
        .build();
    let store = &engine1.store;
    let clock = &engine1.clock;

    let cluster_id = engine1.seed_cluster(0, 1, 10);
    let e1 = engine1.ctx().engine_id;
    let now = clock.epoch_ms();
    store
        .service_create(ServiceRecord::new(e1, "engine", "host-1", "muster", now))
        .unwrap();
    let doomed = Action::builder().target(cluster_id.as_str()).created_at(now).build();
    let doomed_id = doomed.id;
    store.action_create(doomed).unwrap();
    store.action_acquire(doomed_id, e1, now).unwrap().unwrap();
    store.cluster_lock_acquire(cluster_id, doomed_id, LockScope::Cluster);

    clock.advance(Duration::from_secs(120));

    let update = engine2
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterUpdate, cluster_id.as_str()))
        .unwrap();
    let locks = LockManager::new(engine2.ctx());
    assert!(locks.cluster_lock_acquire(cluster_id, update, LockScope::Cluster, false).await);
    assert_eq!(store.cluster_lock_owners(cluster_id), vec![update]);
    assert_eq!(store.action_get(doomed_id).unwrap().status, ActionStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn node_scope_actions_share_while_cluster_scope_waits() {
    let engine = TestEngine::builder().workers(0).build();
    let cluster_id = engine.seed_cluster(0, 2, 10);
    let locks = LockManager::new(engine.ctx());

    let a = muster_core::ActionId::new();
    let b = muster_core::ActionId::new();
    assert!(locks.cluster_lock_acquire(cluster_id, a, LockScope::Node, false).await);
    assert!(locks.cluster_lock_acquire(cluster_id, b, LockScope::Node, false).await);
    assert_eq!(engine.store.cluster_lock_owners(cluster_id).len(), 2);

    // L2: cluster scope is incompatible with outstanding node-scope holders.
    let c = muster_core::ActionId::new();
    assert!(!locks.cluster_lock_acquire(cluster_id, c, LockScope::Cluster, false).await);

    locks.cluster_lock_release(cluster_id, a, LockScope::Node);
    locks.cluster_lock_release(cluster_id, b, LockScope::Node);
    assert!(locks.cluster_lock_acquire(cluster_id, c, LockScope::Cluster, false).await);
}
