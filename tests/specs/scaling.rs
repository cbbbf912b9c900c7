// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scale-in bounds, best-effort truncation, and empty-cluster boundaries.

use muster_core::{ActionStatus, ActionVerb};
use muster_engine::test_support::TestEngine;
use muster_engine::SubmitRequest;
use muster_store::Store;

#[tokio::test(start_paused = true)]
async fn strict_scale_in_reports_exact_violation() {
    let engine = TestEngine::builder().workers(2).build();
    engine.start();
    let cluster_id = engine.seed_cluster(2, 3, 10);
    for i in 0..3 {
        engine.seed_member(cluster_id, &format!("m{i}"));
    }

    let mut inputs = serde_json::Map::new();
    inputs.insert("count".into(), serde_json::json!(5));
    inputs.insert("best_effort".into(), serde_json::json!(false));
    let id = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterScaleIn, cluster_id.as_str()).inputs(inputs))
        .unwrap();
    let action = engine.wait_terminal(id).await;

    assert_eq!(action.status, ActionStatus::Failed);
    assert_eq!(
        action.status_reason,
        "The target capacity (-2) is less than the cluster's min_size (2)."
    );
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 3, "nothing was deleted");

    // Retried with best_effort, the count is truncated to what fits.
    let mut inputs = serde_json::Map::new();
    inputs.insert("count".into(), serde_json::json!(5));
    inputs.insert("best_effort".into(), serde_json::json!(true));
    let id = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterScaleIn, cluster_id.as_str()).inputs(inputs))
        .unwrap();
    let action = engine.wait_terminal(id).await;

    assert_eq!(action.status, ActionStatus::Succeeded);
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 2);
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn zero_min_cluster_scales_to_empty() {
    let engine = TestEngine::builder().workers(2).build();
    engine.start();
    let cluster_id = engine.seed_cluster(0, 2, 10);
    for i in 0..2 {
        engine.seed_member(cluster_id, &format!("m{i}"));
    }

    let mut inputs = serde_json::Map::new();
    inputs.insert("count".into(), serde_json::json!(2));
    let id = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterScaleIn, cluster_id.as_str()).inputs(inputs))
        .unwrap();
    let action = engine.wait_terminal(id).await;

    assert_eq!(action.status, ActionStatus::Succeeded);
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 0);
    assert_eq!(engine.store.cluster_get(cluster_id).unwrap().desired_capacity, 0);
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unbounded_max_never_throttles_scale_out() {
    let engine = TestEngine::builder().workers(2).build();
    engine.start();
    let cluster_id = engine.seed_cluster(0, 0, -1);

    let mut inputs = serde_json::Map::new();
    inputs.insert("count".into(), serde_json::json!(7));
    let id = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterScaleOut, cluster_id.as_str()).inputs(inputs))
        .unwrap();
    let action = engine.wait_terminal(id).await;

    assert_eq!(action.status, ActionStatus::Succeeded);
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 7);
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn exact_capacity_below_min_truncates_when_not_strict() {
    let engine = TestEngine::builder().workers(2).build();
    engine.start();
    let cluster_id = engine.seed_cluster(2, 4, 10);
    for i in 0..4 {
        engine.seed_member(cluster_id, &format!("m{i}"));
    }

    let mut inputs = serde_json::Map::new();
    inputs.insert("adjustment_type".into(), serde_json::json!("EXACT_CAPACITY"));
    inputs.insert("number".into(), serde_json::json!(0));
    let id = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterResize, cluster_id.as_str()).inputs(inputs))
        .unwrap();
    let action = engine.wait_terminal(id).await;

    assert_eq!(action.status, ActionStatus::Succeeded);
    assert_eq!(engine.store.count_by_cluster(cluster_id).unwrap(), 2, "clamped to min_size");
    engine.dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn exact_capacity_below_min_fails_when_strict() {
    let engine = TestEngine::builder().workers(2).build();
    engine.start();
    let cluster_id = engine.seed_cluster(2, 4, 10);
    for i in 0..4 {
        engine.seed_member(cluster_id, &format!("m{i}"));
    }

    let mut inputs = serde_json::Map::new();
    inputs.insert("adjustment_type".into(), serde_json::json!("EXACT_CAPACITY"));
    inputs.insert("number".into(), serde_json::json!(0));
    inputs.insert("strict".into(), serde_json::json!(true));
    let id = engine
        .dispatcher
        .submit(SubmitRequest::new(ActionVerb::ClusterResize, cluster_id.as_str()).inputs(inputs))
        .unwrap();
    let action = engine.wait_terminal(id).await;

    assert_eq!(action.status, ActionStatus::Failed);
    assert!(action.status_reason.contains("min_size (2)"), "{}", action.status_reason);
    engine.dispatcher.stop().await;
}
