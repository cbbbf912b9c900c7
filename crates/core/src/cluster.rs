// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster entity.

use crate::id::{ClusterId, NodeId, ProfileId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    Init,
    Creating,
    Active,
    Updating,
    Resizing,
    Deleting,
    Deleted,
    Warning,
    Error,
}

crate::simple_display! {
    ClusterStatus {
        Init => "INIT",
        Creating => "CREATING",
        Active => "ACTIVE",
        Updating => "UPDATING",
        Resizing => "RESIZING",
        Deleting => "DELETING",
        Deleted => "DELETED",
        Warning => "WARNING",
        Error => "ERROR",
    }
}

/// Per-cluster configuration knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Node name template; `$nI` expands to the node index zero-padded to
    /// width `n` (default `node-$3I` → `node-007`).
    #[serde(rename = "node.name.format", default = "default_name_format")]
    pub node_name_format: String,
}

fn default_name_format() -> String {
    "node-$3I".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { node_name_format: default_name_format() }
    }
}

/// A set of homogeneous nodes sharing a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub profile_id: ProfileId,
    pub min_size: u32,
    /// -1 means unbounded.
    pub max_size: i64,
    pub desired_capacity: u32,
    pub status: ClusterStatus,
    pub status_reason: String,
    /// Member node ids; membership truth is the store's node table.
    #[serde(default)]
    pub nodes: Vec<NodeId>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Other clusters/containers referencing this one.
    #[serde(default)]
    pub dependents: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub config: ClusterConfig,
    pub init_at: u64,
    pub created_at: Option<u64>,
    pub updated_at: Option<u64>,
}

impl Cluster {
    pub fn new(
        name: impl Into<String>,
        profile_id: ProfileId,
        desired_capacity: u32,
        init_at: u64,
    ) -> Self {
        Self {
            id: ClusterId::new(),
            name: name.into(),
            profile_id,
            min_size: 0,
            max_size: -1,
            desired_capacity,
            status: ClusterStatus::Init,
            status_reason: "Initializing".to_string(),
            nodes: Vec::new(),
            data: serde_json::Map::new(),
            dependents: serde_json::Map::new(),
            config: ClusterConfig::default(),
            init_at,
            created_at: None,
            updated_at: None,
        }
    }

    crate::setters! {
        set {
            min_size: u32,
            max_size: i64,
            config: ClusterConfig,
        }
    }

    /// True when `desired` would fit this cluster's current bounds.
    pub fn fits(&self, desired: i64) -> bool {
        desired >= self.min_size as i64 && (self.max_size < 0 || desired <= self.max_size)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains(node_id)
    }

    /// Expand the node name template for a given index.
    ///
    /// Unrecognized template text is kept verbatim; a template with no `$nI`
    /// placeholder gets `-<index>` appended so names stay unique.
    pub fn format_node_name(&self, index: u32) -> String {
        format_node_name(&self.config.node_name_format, index)
    }
}

/// Expand a `$nI` node name template (e.g. `node-$3I` with index 7 → `node-007`).
pub fn format_node_name(template: &str, index: u32) -> String {
    let mut out = String::with_capacity(template.len() + 4);
    let mut chars = template.chars().peekable();
    let mut expanded = false;
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut width = String::new();
        while chars.peek().is_some_and(|d| d.is_ascii_digit()) {
            // Safe: peeked a digit
            if let Some(d) = chars.next() {
                width.push(d);
            }
        }
        if chars.peek() == Some(&'I') && !width.is_empty() {
            chars.next();
            let width: usize = width.parse().unwrap_or(0);
            out.push_str(&format!("{index:0width$}"));
            expanded = true;
        } else {
            // Not a placeholder; restore what we consumed.
            out.push('$');
            out.push_str(&width);
        }
    }
    if !expanded {
        out.push_str(&format!("-{index}"));
    }
    out
}

crate::builder! {
    pub struct ClusterBuilder => Cluster {
        into {
            name: String = "test-cluster",
            status_reason: String = "",
        }
        set {
            profile_id: ProfileId = ProfileId::from_string("prf-test"),
            min_size: u32 = 0,
            max_size: i64 = -1,
            desired_capacity: u32 = 0,
            status: ClusterStatus = ClusterStatus::Active,
            nodes: Vec<NodeId> = Vec::new(),
            data: serde_json::Map<String, serde_json::Value> = serde_json::Map::new(),
            dependents: serde_json::Map<String, serde_json::Value> = serde_json::Map::new(),
            config: ClusterConfig = ClusterConfig::default(),
            init_at: u64 = 1_000_000,
            created_at: Option<u64> = Some(1_000_000),
            updated_at: Option<u64> = None,
        }
        computed {
            id: ClusterId = ClusterId::new(),
        }
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
