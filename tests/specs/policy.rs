// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Policy-driven scaling decisions and cooldown enforcement.

use muster_core::{ActionStatus, ActionVerb, Deletion, PolicyBinding, PolicyId};
use muster_engine::test_support::{ScriptedPolicy, TestEngine};
use muster_engine::{PolicyPhase, SubmitRequest};
use muster_store::Store;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn policy_supplied_candidates_drive_scale_in() {
    // Seed first so the policy can name its victims.
    let seeder = TestEngine::builder().workers(0).build();
    let cluster_id = seeder.seed_cluster(0, 5, 10);
    let mut members = Vec::new();
    for i in 1..=5 {
        members.push(seeder.seed_member(cluster_id, &format!("m{i}")));
    }
    let (n3, n5) = (members[2], members[4]);

    let pid = PolicyId::from_string("pol-scale");
    let policy = Arc::new(ScriptedPolicy {
        type_name: "scaling".into(),
        targets: vec![(PolicyPhase::Before, ActionVerb::ClusterScaleIn)],
        pre_deletion: Some(Deletion {
            count: 2,
            candidates: vec![n3, n5],
            grace_period: 2,
            ..Default::default()
        }),
        ..Default::default()
    });
    let engine = TestEngine::builder()
        .workers(2)
        .policy(pid, policy)
        .shared(Arc::clone(&seeder.store), seeder.clock.clone())
        .build();
    engine
        .store
        .binding_create(PolicyBinding::new(cluster_id, pid, "scaling").priority(100))
        .unwrap();
    engine.start();

    let id = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterScaleIn, cluster_id.as_str()))
        .unwrap();
    let action = engine.wait_terminal(id).await;

    assert_eq!(action.status, ActionStatus::Succeeded, "{}", action.status_reason);
    assert!(engine.store.node_get(n3).is_err(), "candidate destroyed");
    assert!(engine.store.node_get(n5).is_err(), "candidate destroyed");
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 3);
    assert_eq!(engine.store.cluster_get(cluster_id).unwrap().desired_capacity, 3);
    assert_eq!(engine.driver.calls_for("delete"), 2);
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cooldown_blocks_second_invocation_until_elapsed() {
    let pid = PolicyId::from_string("pol-scale");
    let policy = Arc::new(ScriptedPolicy {
        type_name: "scaling".into(),
        targets: vec![
            (PolicyPhase::Before, ActionVerb::ClusterScaleOut),
            (PolicyPhase::After, ActionVerb::ClusterScaleOut),
        ],
        ..Default::default()
    });
    let engine = TestEngine::builder().workers(2).policy(pid, policy).build();
    let cluster_id = engine.seed_cluster(0, 0, 20);
    engine
        .store
        .binding_create(PolicyBinding::new(cluster_id, pid, "scaling").cooldown_secs(60))
        .unwrap();
    engine.start();

    let mut inputs = serde_json::Map::new();
    inputs.insert("count".into(), serde_json::json!(1));

    let first = engine
        .dispatcher
        .submit(
            SubmitRequest::new(ActionVerb::ClusterScaleOut, cluster_id.as_str())
                .inputs(inputs.clone()),
        )
        .unwrap();
    assert_eq!(engine.wait_terminal(first).await.status, ActionStatus::Succeeded);
    let stamped = engine.store.binding_get(cluster_id, pid).unwrap();
    assert!(stamped.last_op.is_some(), "AFTER phase stamps last_op");

    // Within the cooldown window the check aborts (P1).
    let second = engine
        .dispatcher
        .submit(
            SubmitRequest::new(ActionVerb::ClusterScaleOut, cluster_id.as_str())
                .inputs(inputs.clone()),
        )
        .unwrap();
    let action = engine.wait_terminal(second).await;
    assert_eq!(action.status, ActionStatus::Failed);
    assert!(action.status_reason.contains("cooldown"), "{}", action.status_reason);

    // Once the window elapses the policy runs again.
    engine.clock.advance(Duration::from_secs(61));
    let third = engine
        .dispatcher
        .submit(
            SubmitRequest::new(ActionVerb::ClusterScaleOut, cluster_id.as_str()).inputs(inputs),
        )
        .unwrap();
    assert_eq!(engine.wait_terminal(third).await.status, ActionStatus::Succeeded);
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 2);
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn before_failure_stops_the_handler_before_mutation() {
    let pid = PolicyId::from_string("pol-guard");
    let policy = Arc::new(ScriptedPolicy {
        type_name: "guard".into(),
        targets: vec![(PolicyPhase::Before, ActionVerb::ClusterScaleOut)],
        fail_with: Some("capacity freeze".into()),
        ..Default::default()
    });
    let engine = TestEngine::builder().workers(2).policy(pid, policy).build();
    let cluster_id = engine.seed_cluster(0, 0, 20);
    engine.store.binding_create(PolicyBinding::new(cluster_id, pid, "guard")).unwrap();
    engine.start();

    let mut inputs = serde_json::Map::new();
    inputs.insert("count".into(), serde_json::json!(3));
    let id = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterScaleOut, cluster_id.as_str()).inputs(inputs))
        .unwrap();
    let action = engine.wait_terminal(id).await;

    assert_eq!(action.status, ActionStatus::Failed);
    assert!(action.status_reason.contains("capacity freeze"));
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 0, "no mutation happened");
    assert_eq!(engine.driver.calls_for("create"), 0);
    engine.dispatcher.stop().await;
}
