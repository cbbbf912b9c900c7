// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn new_cluster_starts_init_unbounded() {
    let c = Cluster::new("web", ProfileId::from_string("prf-a"), 3, 1_000);
    assert_eq!(c.status, ClusterStatus::Init);
    assert_eq!(c.min_size, 0);
    assert_eq!(c.max_size, -1);
    assert_eq!(c.desired_capacity, 3);
    assert!(c.nodes.is_empty());
    assert!(c.created_at.is_none());
}

#[parameterized(
    below_min = { 2, 10, 1, false },
    at_min = { 2, 10, 2, true },
    at_max = { 2, 10, 10, true },
    above_max = { 2, 10, 11, false },
    negative = { 0, 10, -1, false },
)]
fn fits_respects_bounds(min: u32, max: i64, desired: i64, expect: bool) {
    let c = Cluster::builder().min_size(min).max_size(max).build();
    assert_eq!(c.fits(desired), expect);
}

#[test]
fn unbounded_max_never_throttles() {
    let c = Cluster::builder().max_size(-1).build();
    assert!(c.fits(1_000_000));
}

#[parameterized(
    default_width = { "node-$3I", 7, "node-007" },
    width_one = { "n$1I", 12, "n12" },
    wide = { "member-$5I", 42, "member-00042" },
    mid_template = { "a$2Ib", 3, "a03b" },
)]
fn node_name_template(template: &str, index: u32, expect: &str) {
    assert_eq!(format_node_name(template, index), expect);
}

#[test]
fn template_without_placeholder_appends_index() {
    assert_eq!(format_node_name("static", 4), "static-4");
}

#[test]
fn dollar_without_width_is_literal() {
    assert_eq!(format_node_name("pre$Ix-$2I", 5), "pre$Ix-05");
}

#[test]
fn cluster_config_serde_key() {
    let json = serde_json::to_value(ClusterConfig::default()).unwrap();
    assert_eq!(json["node.name.format"], "node-$3I");
}

#[test]
fn contains_checks_membership() {
    let n = NodeId::from_string("node1");
    let c = Cluster::builder().nodes(vec![n]).build();
    assert!(c.contains(&n));
    assert!(!c.contains(&NodeId::from_string("node2")));
}
