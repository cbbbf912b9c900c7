// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn new_node_is_unattached() {
    let n = Node::new("node-001", ProfileId::from_string("prf-a"), 1_000);
    assert_eq!(n.status, NodeStatus::Init);
    assert_eq!(n.index, -1);
    assert!(n.cluster_id.is_none());
    assert!(n.physical_id.is_none());
    assert!(!n.is_attached());
}

#[test]
fn attaching_sets_membership() {
    let cluster = ClusterId::from_string("clu-a");
    let n = Node::new("n", ProfileId::from_string("prf-a"), 0)
        .cluster_id(Some(cluster))
        .index(4);
    assert!(n.is_attached());
    assert_eq!(n.cluster_id, Some(cluster));
    assert_eq!(n.index, 4);
}

#[test]
fn status_serializes_to_wire_strings() {
    let json = serde_json::to_string(&NodeStatus::Recovering).unwrap();
    assert_eq!(json, "\"RECOVERING\"");
    assert_eq!(NodeStatus::Deleting.to_string(), "DELETING");
}

#[test]
fn builder_defaults_are_active() {
    let n = Node::builder().build();
    assert_eq!(n.status, NodeStatus::Active);
    assert_eq!(n.name, "test-node");
}
