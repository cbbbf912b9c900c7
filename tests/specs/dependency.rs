// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derived-action fan-out and result aggregation.

use muster_core::{ActionStatus, ActionVerb};
use muster_engine::test_support::TestEngine;
use muster_engine::SubmitRequest;
use muster_store::Store;

#[tokio::test(start_paused = true)]
async fn parent_fails_after_all_children_settle_naming_the_culprit() {
    let engine = TestEngine::builder().workers(3).build();
    engine.driver.fail_create_for("node-004");
    engine.start();
    let cluster_id = engine.seed_cluster(0, 10, 20);

    let create = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterCreate, cluster_id.as_str()))
        .unwrap();
    let action = engine.wait_terminal(create).await;

    assert_eq!(action.status, ActionStatus::Failed);

    // Every child reached a terminal status before the parent settled; the
    // running ones were not aborted by the failure.
    let nodes = engine.store.nodes_by_cluster(cluster_id).unwrap();
    let mut children = Vec::new();
    for node in &nodes {
        children.extend(engine.store.actions_by_target(node.id.as_str()).unwrap());
    }
    assert_eq!(children.len(), 10);
    assert!(children.iter().all(|c| c.status.is_terminal()));

    let failed: Vec<_> =
        children.iter().filter(|c| c.status == ActionStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert!(
        action.status_reason.contains(failed[0].id.as_str()),
        "parent reason '{}' names the failing child",
        action.status_reason
    );
    assert_eq!(
        children.iter().filter(|c| c.status == ActionStatus::Succeeded).count(),
        9,
        "siblings ran to completion"
    );
    assert_eq!(engine.driver.calls_for("create"), 10);
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn dependent_runs_only_after_depended_succeeds() {
    let engine = TestEngine::builder().workers(2).build();
    let node = engine.seed_free_node("n1");

    let first = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::NodeCheck, node.as_str()))
        .unwrap();
    let second = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::NodeCheck, node.as_str()).depends_on(vec![first]))
        .unwrap();

    assert_eq!(engine.store.action_get(second).unwrap().status, ActionStatus::Waiting);

    engine.start();
    let done = engine.wait_terminal(second).await;
    assert_eq!(done.status, ActionStatus::Succeeded);

    // Invariant S2: the dependent started only after the depended action
    // had succeeded.
    let first_action = engine.store.action_get(first).unwrap();
    assert_eq!(first_action.status, ActionStatus::Succeeded);
    assert!(first_action.end_time.unwrap() <= done.start_time.unwrap());
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_dependency_fails_the_dependent() {
    let engine = TestEngine::builder().workers(2).build();
    let node = engine.seed_free_node("n1");

    // The depended action targets a missing node, so it fails.
    let first = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::NodeCheck, "nodemissing"))
        .unwrap();
    let second = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::NodeCheck, node.as_str()).depends_on(vec![first]))
        .unwrap();

    engine.start();
    let done = engine.wait_terminal(second).await;
    assert_eq!(done.status, ActionStatus::Failed);
    assert!(done.status_reason.contains(first.as_str()));
    assert_eq!(engine.driver.calls_for("check"), 0, "dependent never executed");
    engine.dispatcher.stop().await;
}
