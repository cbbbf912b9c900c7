// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster lifecycle: create, grow, and time out.

use muster_core::{ActionStatus, ActionVerb, ClusterStatus};
use muster_engine::test_support::TestEngine;
use muster_engine::SubmitRequest;
use muster_store::Store;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn create_three_then_scale_out_two() {
    let engine = TestEngine::builder().workers(2).build();
    engine.start();
    let cluster_id = engine.seed_cluster(0, 3, 10);

    let create = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterCreate, cluster_id.as_str()))
        .unwrap();
    let action = engine.wait_terminal(create).await;

    assert_eq!(action.status, ActionStatus::Succeeded);
    let cluster = engine.store.cluster_get(cluster_id).unwrap();
    assert_eq!(cluster.status, ClusterStatus::Active);
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 3);

    let mut inputs = serde_json::Map::new();
    inputs.insert("count".into(), serde_json::json!(2));
    let scale = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterScaleOut, cluster_id.as_str()).inputs(inputs))
        .unwrap();
    let action = engine.wait_terminal(scale).await;

    assert_eq!(action.status, ActionStatus::Succeeded);
    assert_eq!(action.data.creation.as_ref().map(|c| c.count), Some(2));
    let cluster = engine.store.cluster_get(cluster_id).unwrap();
    assert_eq!(cluster.desired_capacity, 5);
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 5);
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn create_timeout_leaves_error_cluster_and_orphans() {
    let engine = TestEngine::builder().workers(4).build();
    engine.driver.hang_create(true);
    engine.start();
    let cluster_id = engine.seed_cluster(0, 2, 10);

    let create = engine
        .dispatcher
        .submit(
            SubmitRequest::new(ActionVerb::ClusterCreate, cluster_id.as_str()).timeout_secs(30),
        )
        .unwrap();

    // Let the parent claim, fan out, and start waiting; then blow the budget.
    tokio::time::sleep(Duration::from_secs(2)).await;
    engine.clock.advance(Duration::from_secs(31));

    let action = engine.wait_terminal(create).await;
    assert_eq!(action.status, ActionStatus::Failed);
    assert!(action.status_reason.contains("timeout"), "{}", action.status_reason);

    let cluster = engine.store.cluster_get(cluster_id).unwrap();
    assert_eq!(cluster.status, ClusterStatus::Error);
    assert_eq!(cluster.status_reason, "Cluster creation timeout");

    // The lock is free again and the stuck children are tolerated.
    assert!(engine.store.cluster_lock_owners(cluster_id).is_empty());
    let orphans: Vec<ActionStatus> = engine
        .store
        .nodes_by_cluster(cluster_id)
        .unwrap()
        .iter()
        .flat_map(|n| engine.store.actions_by_target(n.id.as_str()).unwrap())
        .map(|a| a.status)
        .collect();
    assert!(orphans.iter().any(|s| !s.is_terminal()), "children keep running");
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn delete_empties_then_removes_cluster() {
    let engine = TestEngine::builder().workers(2).build();
    engine.start();
    let cluster_id = engine.seed_cluster(0, 2, 10);
    let create = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterCreate, cluster_id.as_str()))
        .unwrap();
    engine.wait_terminal(create).await;

    let delete = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterDelete, cluster_id.as_str()))
        .unwrap();
    let action = engine.wait_terminal(delete).await;

    assert_eq!(action.status, ActionStatus::Succeeded);
    assert!(engine.store.cluster_get(cluster_id).is_err());
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 0);
    engine.dispatcher.stop().await;
}
