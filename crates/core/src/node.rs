// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node entity.

use crate::id::{ClusterId, NodeId, ProfileId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Init,
    Creating,
    Active,
    Updating,
    Error,
    Recovering,
    Deleting,
}

crate::simple_display! {
    NodeStatus {
        Init => "INIT",
        Creating => "CREATING",
        Active => "ACTIVE",
        Updating => "UPDATING",
        Error => "ERROR",
        Recovering => "RECOVERING",
        Deleting => "DELETING",
    }
}

/// A member of at most one cluster, backed by a physical resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// `None` while unattached.
    pub cluster_id: Option<ClusterId>,
    /// Monotonic index handed out by the parent cluster; -1 unattached.
    pub index: i64,
    pub profile_id: ProfileId,
    /// Opaque handle from the profile driver once the backing resource
    /// exists; `None` before.
    pub physical_id: Option<String>,
    pub status: NodeStatus,
    pub status_reason: String,
    pub role: String,
    /// Driver-written state, including placement hints.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub init_at: u64,
    pub created_at: Option<u64>,
    pub updated_at: Option<u64>,
}

impl Node {
    pub fn new(name: impl Into<String>, profile_id: ProfileId, init_at: u64) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            cluster_id: None,
            index: -1,
            profile_id,
            physical_id: None,
            status: NodeStatus::Init,
            status_reason: "Initializing".to_string(),
            role: String::new(),
            data: serde_json::Map::new(),
            metadata: serde_json::Map::new(),
            init_at,
            created_at: None,
            updated_at: None,
        }
    }

    crate::setters! {
        into {
            role: String,
        }
        set {
            cluster_id: Option<ClusterId>,
            index: i64,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.cluster_id.is_some()
    }
}

crate::builder! {
    pub struct NodeBuilder => Node {
        into {
            name: String = "test-node",
            status_reason: String = "",
            role: String = "",
        }
        set {
            cluster_id: Option<ClusterId> = None,
            index: i64 = -1,
            profile_id: ProfileId = ProfileId::from_string("prf-test"),
            physical_id: Option<String> = None,
            status: NodeStatus = NodeStatus::Active,
            data: serde_json::Map<String, serde_json::Value> = serde_json::Map::new(),
            metadata: serde_json::Map<String, serde_json::Value> = serde_json::Map::new(),
            init_at: u64 = 1_000_000,
            created_at: Option<u64> = Some(1_000_000),
            updated_at: Option<u64> = None,
        }
        computed {
            id: NodeId = NodeId::new(),
        }
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
