// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn generated_ids_carry_prefix_and_fit() {
    let id = ClusterId::new();
    assert!(id.as_str().starts_with("clu-"));
    assert_eq!(id.as_str().len(), ID_MAX_LEN);

    let id = ActionId::new();
    assert!(id.as_str().starts_with("act-"));
    assert_eq!(id.suffix().len(), 19);
}

#[test]
fn ids_are_unique() {
    let a = NodeId::new();
    let b = NodeId::new();
    assert_ne!(a, b);
}

#[test]
fn from_string_round_trip() {
    let id = ActionId::from_string("act-fixed");
    assert_eq!(id.as_str(), "act-fixed");
    assert_eq!(id.suffix(), "fixed");
    assert_eq!(id, "act-fixed");
}

#[test]
fn short_truncates_suffix() {
    let id = NodeId::from_string("nodeabcdefgh");
    assert_eq!(id.short(4), "abcd");
    assert_eq!(id.short(100), "abcdefgh");
}

#[test]
fn serde_transparent() {
    let id = ClusterId::from_string("clu-x1");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"clu-x1\"");
    let back: ClusterId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn idbuf_hash_matches_str_lookup() {
    use std::collections::HashMap;
    let id = ActionId::from_string("act-k");
    let mut map = HashMap::new();
    map.insert(id, 7u32);
    assert_eq!(map.get("act-k"), Some(&7));
}

#[test]
fn worker_id_display() {
    let w = WorkerId::new("worker-2");
    assert_eq!(w.to_string(), "worker-2");
    assert_eq!(w.as_str(), "worker-2");
}

#[test]
fn short_helper() {
    assert_eq!(short("abcdef", 3), "abc");
    assert_eq!(short("ab", 3), "ab");
}
