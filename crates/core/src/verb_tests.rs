// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn display_round_trips_through_from_str() {
    for verb in ActionVerb::ALL {
        let s = verb.to_string();
        assert_eq!(s.parse::<ActionVerb>().unwrap(), verb, "verb {s}");
    }
}

#[test]
fn serde_uses_wire_strings() {
    let json = serde_json::to_string(&ActionVerb::ClusterScaleIn).unwrap();
    assert_eq!(json, "\"CLUSTER_SCALE_IN\"");
    let back: ActionVerb = serde_json::from_str("\"NODE_RECOVER\"").unwrap();
    assert_eq!(back, ActionVerb::NodeRecover);
}

#[test]
fn family_split_is_total() {
    let clusters = ActionVerb::ALL.iter().filter(|v| v.is_cluster()).count();
    let nodes = ActionVerb::ALL.iter().filter(|v| v.is_node()).count();
    assert_eq!(clusters, 15);
    assert_eq!(nodes, 8);
    for verb in ActionVerb::ALL {
        assert_ne!(verb.is_cluster(), verb.is_node());
    }
}

#[test]
fn unknown_verb_is_rejected() {
    assert!("CLUSTER_EXPLODE".parse::<ActionVerb>().is_err());
}

#[test]
fn slug_form() {
    assert_eq!(ActionVerb::NodeCreate.slug(), "node-create");
    assert_eq!(ActionVerb::ClusterScaleOut.slug(), "cluster-scale-out");
}
