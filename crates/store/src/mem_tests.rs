// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use muster_core::{ActionVerb, ProfileId};

fn store() -> MemStore {
    MemStore::new()
}

fn ready_action(store: &MemStore, created_at: u64) -> ActionId {
    let action = Action::builder().created_at(created_at).build();
    store.action_create(action.clone()).unwrap();
    action.id
}

#[test]
fn first_ready_claims_oldest() {
    let s = store();
    let newer = ready_action(&s, 2_000);
    let older = ready_action(&s, 1_000);
    let engine = ServiceId::new();

    let claimed = s.action_acquire_first_ready(engine, 5_000).unwrap();
    assert_eq!(claimed.id, older);
    assert_eq!(claimed.status, ActionStatus::Running);
    assert_eq!(claimed.owner, Some(engine));
    assert_eq!(claimed.start_time, Some(5_000));

    let second = s.action_acquire_first_ready(engine, 5_000).unwrap();
    assert_eq!(second.id, newer);
    assert!(s.action_acquire_first_ready(engine, 5_000).is_none());
}

#[test]
fn acquire_specific_only_when_ready() {
    let s = store();
    let id = ready_action(&s, 1_000);
    let engine = ServiceId::new();

    assert!(s.action_acquire(id, engine, 2_000).unwrap().is_some());
    // Already RUNNING now
    assert!(s.action_acquire(id, engine, 2_000).unwrap().is_none());
}

#[test]
fn abandon_reverts_to_ready() {
    let s = store();
    let id = ready_action(&s, 1_000);
    let engine = ServiceId::new();
    s.action_acquire(id, engine, 2_000).unwrap();

    s.action_abandon(id).unwrap();
    let action = s.action_get(id).unwrap();
    assert_eq!(action.status, ActionStatus::Ready);
    assert!(action.owner.is_none());
    assert!(action.start_time.is_none());
}

#[test]
fn terminal_status_is_sticky() {
    let s = store();
    let id = ready_action(&s, 1_000);
    s.action_mark_succeeded(id, 2_000, "").unwrap();

    // Subsequent writes do not move it (invariant S1)
    s.action_mark_failed(id, 3_000, "late").unwrap();
    s.action_abandon(id).unwrap();
    s.action_mark_ready(id).unwrap();
    assert_eq!(s.action_get(id).unwrap().status, ActionStatus::Succeeded);
}

#[test]
fn dependency_blocks_until_all_succeed() {
    let s = store();
    let child_a = ready_action(&s, 1_000);
    let child_b = ready_action(&s, 1_000);
    let parent = ready_action(&s, 1_000);

    s.dependency_add(&[child_a, child_b], parent).unwrap();
    assert_eq!(s.action_get(parent).unwrap().status, ActionStatus::Waiting);

    let wakeups = s.action_mark_succeeded(child_a, 2_000, "").unwrap();
    assert!(wakeups.ready.is_empty());
    assert_eq!(s.action_get(parent).unwrap().status, ActionStatus::Waiting);

    let wakeups = s.action_mark_succeeded(child_b, 3_000, "").unwrap();
    assert_eq!(wakeups.ready, vec![parent]);
    assert_eq!(s.action_get(parent).unwrap().status, ActionStatus::Ready);
}

#[test]
fn failed_dependency_fails_waiting_dependents() {
    let s = store();
    let child = ready_action(&s, 1_000);
    let parent = ready_action(&s, 1_000);
    s.dependency_add(&[child], parent).unwrap();

    let wakeups = s.action_mark_failed(child, 2_000, "driver exploded").unwrap();
    assert_eq!(wakeups.failed, vec![parent]);
    let parent_action = s.action_get(parent).unwrap();
    assert_eq!(parent_action.status, ActionStatus::Failed);
    assert!(parent_action.status_reason.contains(child.as_str()));
}

#[test]
fn failure_cascades_through_chains() {
    let s = store();
    let a = ready_action(&s, 1_000);
    let b = ready_action(&s, 1_000);
    let c = ready_action(&s, 1_000);
    s.dependency_add(&[a], b).unwrap();
    s.dependency_add(&[b], c).unwrap();

    let wakeups = s.action_mark_cancelled(a, 2_000).unwrap();
    assert_eq!(wakeups.failed.len(), 2);
    assert_eq!(s.action_get(b).unwrap().status, ActionStatus::Failed);
    assert_eq!(s.action_get(c).unwrap().status, ActionStatus::Failed);
}

#[test]
fn running_dependent_is_not_transitioned() {
    // A fan-out parent is RUNNING while its children execute; the store
    // must not touch it when the children drain.
    let s = store();
    let parent = ready_action(&s, 1_000);
    let engine = ServiceId::new();
    s.action_acquire(parent, engine, 1_500).unwrap();

    let child = ready_action(&s, 2_000);
    s.dependency_add(&[child], parent).unwrap();
    assert_eq!(s.action_get(parent).unwrap().status, ActionStatus::Running);

    let wakeups = s.action_mark_succeeded(child, 3_000, "").unwrap();
    assert!(wakeups.ready.is_empty());
    assert_eq!(s.action_get(parent).unwrap().status, ActionStatus::Running);
}

#[test]
fn dependency_on_already_succeeded_children_is_ready() {
    let s = store();
    let child = ready_action(&s, 1_000);
    s.action_mark_succeeded(child, 1_500, "").unwrap();

    let parent = ready_action(&s, 2_000);
    s.dependency_add(&[child], parent).unwrap();
    assert_eq!(s.action_get(parent).unwrap().status, ActionStatus::Ready);
}

#[test]
fn check_status_applies_timeout() {
    let s = store();
    let action = Action::builder().created_at(1_000).timeout_secs(10).build();
    let id = action.id;
    s.action_create(action).unwrap();
    s.action_acquire(id, ServiceId::new(), 1_000).unwrap();

    assert_eq!(s.action_check_status(id, 5_000).unwrap(), ActionStatus::Running);
    assert_eq!(s.action_check_status(id, 12_000).unwrap(), ActionStatus::Failed);
    assert_eq!(s.action_get(id).unwrap().status_reason, "TIMEOUT");
}

#[test]
fn cluster_scope_lock_is_exclusive() {
    let s = store();
    let cluster = ClusterId::new();
    let a = ActionId::new();
    let b = ActionId::new();

    let owners = s.cluster_lock_acquire(cluster, a, LockScope::Cluster);
    assert_eq!(owners, vec![a]);

    // Second cluster-scope acquire fails
    let owners = s.cluster_lock_acquire(cluster, b, LockScope::Cluster);
    assert_eq!(owners, vec![a]);

    // Node-scope acquire against a cluster-scope holder also fails (L2)
    let owners = s.cluster_lock_acquire(cluster, b, LockScope::Node);
    assert_eq!(owners, vec![a]);
}

#[test]
fn node_scope_holders_coexist() {
    let s = store();
    let cluster = ClusterId::new();
    let a = ActionId::new();
    let b = ActionId::new();
    let c = ActionId::new();

    assert!(s.cluster_lock_acquire(cluster, a, LockScope::Node).contains(&a));
    let owners = s.cluster_lock_acquire(cluster, b, LockScope::Node);
    assert!(owners.contains(&a) && owners.contains(&b));

    // Cluster-scope acquire blocks while node-scope holders remain
    let owners = s.cluster_lock_acquire(cluster, c, LockScope::Cluster);
    assert!(!owners.contains(&c));

    s.cluster_lock_release(cluster, a, LockScope::Node);
    s.cluster_lock_release(cluster, b, LockScope::Node);
    assert!(s.cluster_lock_acquire(cluster, c, LockScope::Cluster).contains(&c));
}

#[test]
fn lock_release_is_idempotent() {
    let s = store();
    let cluster = ClusterId::new();
    let a = ActionId::new();
    s.cluster_lock_acquire(cluster, a, LockScope::Cluster);

    assert!(s.cluster_lock_release(cluster, a, LockScope::Cluster));
    assert!(!s.cluster_lock_release(cluster, a, LockScope::Cluster));
    assert!(s.cluster_lock_owners(cluster).is_empty());
}

#[test]
fn steal_overwrites_owners() {
    let s = store();
    let cluster = ClusterId::new();
    let a = ActionId::new();
    let thief = ActionId::new();
    s.cluster_lock_acquire(cluster, a, LockScope::Cluster);

    let owners = s.cluster_lock_steal(cluster, thief);
    assert_eq!(owners, vec![thief]);
    assert_eq!(s.cluster_lock_owners(cluster), vec![thief]);
}

#[test]
fn node_lock_is_a_mutex() {
    let s = store();
    let node = NodeId::new();
    let a = ActionId::new();
    let b = ActionId::new();

    assert_eq!(s.node_lock_acquire(node, a), a);
    assert_eq!(s.node_lock_acquire(node, b), a);
    assert!(!s.node_lock_release(node, b), "non-owner release is a no-op");
    assert!(s.node_lock_release(node, a));
    assert_eq!(s.node_lock_acquire(node, b), b);
}

#[test]
fn gc_by_engine_breaks_locks_and_abandons() {
    let s = store();
    let engine = ServiceId::new();
    let cluster = ClusterId::new();
    let node = NodeId::new();

    let id = ready_action(&s, 1_000);
    s.action_acquire(id, engine, 1_500).unwrap();
    s.cluster_lock_acquire(cluster, id, LockScope::Cluster);
    s.node_lock_acquire(node, id);

    let stats = s.gc_by_engine(engine);
    assert_eq!(stats.locks_broken, 2);
    assert_eq!(stats.actions_abandoned, 1);

    // Invariant R1: no lock references the dead engine's actions and its
    // actions are claimable again.
    assert!(s.cluster_lock_owners(cluster).is_empty());
    assert!(s.node_lock_owner(node).is_none());
    let action = s.action_get(id).unwrap();
    assert_eq!(action.status, ActionStatus::Ready);
    assert!(action.owner.is_none());
}

#[test]
fn next_index_is_monotonic() {
    let s = store();
    let cluster = Cluster::builder().build();
    let id = cluster.id;
    s.cluster_create(cluster).unwrap();

    assert_eq!(s.next_index(id).unwrap(), 1);
    assert_eq!(s.next_index(id).unwrap(), 2);
    assert_eq!(s.next_index(id).unwrap(), 3);
}

#[test]
fn count_by_cluster_tracks_membership() {
    let s = store();
    let cluster = Cluster::builder().build();
    let cid = cluster.id;
    s.cluster_create(cluster).unwrap();

    let attached = Node::builder().cluster_id(Some(cid)).build();
    let detached = Node::builder().build();
    s.node_create(attached.clone()).unwrap();
    s.node_create(detached).unwrap();

    assert_eq!(s.count_by_cluster(cid).unwrap(), 1);
    s.node_delete(attached.id).unwrap();
    assert_eq!(s.count_by_cluster(cid).unwrap(), 0);
}

#[test]
fn binding_type_conflict_rejected() {
    let s = store();
    let cluster = ClusterId::new();
    let first = PolicyBinding::new(cluster, PolicyId::new(), "muster.policy.scaling");
    let dup_type = PolicyBinding::new(cluster, PolicyId::new(), "muster.policy.scaling");
    s.binding_create(first).unwrap();

    let err = s.binding_create(dup_type).unwrap_err();
    assert!(matches!(err, StoreError::PolicyTypeConflict { .. }));
}

#[test]
fn disabled_binding_does_not_conflict() {
    let s = store();
    let cluster = ClusterId::new();
    let mut first = PolicyBinding::new(cluster, PolicyId::new(), "muster.policy.scaling");
    first.enabled = false;
    s.binding_create(first).unwrap();

    let second = PolicyBinding::new(cluster, PolicyId::new(), "muster.policy.scaling");
    s.binding_create(second).unwrap();
}

#[test]
fn bindings_sorted_by_priority() {
    let s = store();
    let cluster = ClusterId::new();
    let low = PolicyBinding::new(cluster, PolicyId::from_string("pol-b"), "t1").priority(200);
    let high = PolicyBinding::new(cluster, PolicyId::from_string("pol-a"), "t2").priority(10);
    s.binding_create(low).unwrap();
    s.binding_create(high).unwrap();

    let ordered = s.bindings_by_cluster(cluster);
    assert_eq!(ordered[0].priority, 10);
    assert_eq!(ordered[1].priority, 200);
}

#[test]
fn attach_then_detach_restores_binding_set() {
    let s = store();
    let cluster = ClusterId::new();
    let policy = PolicyId::new();
    assert!(s.bindings_by_cluster(cluster).is_empty());

    s.binding_create(PolicyBinding::new(cluster, policy, "t")).unwrap();
    assert_eq!(s.bindings_by_cluster(cluster).len(), 1);

    s.binding_delete(cluster, policy).unwrap();
    assert!(s.bindings_by_cluster(cluster).is_empty());
}

#[test]
fn services_expire_by_name_and_age() {
    let s = store();
    let dead = ServiceRecord::new(ServiceId::new(), "engine", "h1", "muster", 1_000);
    let alive = ServiceRecord::new(ServiceId::new(), "engine", "h2", "muster", 100_000);
    let other = ServiceRecord::new(ServiceId::new(), "health", "h3", "muster", 1_000);
    s.service_create(dead.clone()).unwrap();
    s.service_create(alive).unwrap();
    s.service_create(other).unwrap();

    let expired = s.services_expired("engine", 100_000, 60);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, dead.id);
}

#[test]
fn prune_drops_old_terminal_actions() {
    let s = store();
    let done = ready_action(&s, 1_000);
    s.action_mark_succeeded(done, 2_000, "").unwrap();
    let live = ready_action(&s, 1_000);

    assert_eq!(s.action_prune(10_000).unwrap(), 1);
    assert!(s.action_get(done).is_err());
    assert!(s.action_get(live).is_ok());
}

#[test]
fn signal_round_trip_and_clear() {
    let s = store();
    let id = ready_action(&s, 1_000);
    assert_eq!(s.action_signal_query(id).unwrap(), None);

    s.action_signal(id, Signal::Cancel).unwrap();
    assert_eq!(s.action_signal_query(id).unwrap(), Some(Signal::Cancel));

    s.action_signal_clear(id).unwrap();
    assert_eq!(s.action_signal_query(id).unwrap(), None);
}

#[test]
fn action_update_preserves_fsm_fields() {
    let s = store();
    let id = ready_action(&s, 1_000);
    let engine = ServiceId::new();
    s.action_acquire(id, engine, 2_000).unwrap();

    let mut copy = s.action_get(id).unwrap();
    copy.status = ActionStatus::Init; // stale FSM state in the copy
    copy.owner = None;
    copy.outputs.insert("nodes_added".into(), serde_json::json!(["node1"]));
    s.action_update(copy).unwrap();

    let stored = s.action_get(id).unwrap();
    assert_eq!(stored.status, ActionStatus::Running, "status not clobbered");
    assert_eq!(stored.owner, Some(engine), "owner not clobbered");
    assert!(stored.outputs.contains_key("nodes_added"));
}

#[test]
fn unknown_ids_report_not_found() {
    let s = store();
    let err = s.cluster_get(ClusterId::from_string("clu-miss")).unwrap_err();
    assert_eq!(err.to_string(), "The cluster 'clu-miss' could not be found.");
    assert!(s.node_get(NodeId::from_string("nodemiss")).is_err());
    assert!(s.action_get(ActionId::from_string("act-miss")).is_err());
}

#[test]
fn verb_is_preserved_through_store() {
    let s = store();
    let action = Action::builder().verb(ActionVerb::NodeJoin).build();
    let id = action.id;
    s.action_create(action).unwrap();
    assert_eq!(s.action_get(id).unwrap().verb, ActionVerb::NodeJoin);
}

#[test]
fn node_create_uses_profile() {
    let s = store();
    let node = Node::builder().profile_id(ProfileId::from_string("prf-z")).build();
    let id = node.id;
    s.node_create(node).unwrap();
    assert_eq!(s.node_get(id).unwrap().profile_id, ProfileId::from_string("prf-z"));
}
