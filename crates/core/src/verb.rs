// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed set of action verbs.
//!
//! Verbs are the public RPC surface; keep the set closed and dispatch on the
//! enum rather than parsing name prefixes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Every operation the engine can execute, exactly as wire-visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionVerb {
    ClusterCreate,
    ClusterDelete,
    ClusterUpdate,
    ClusterResize,
    ClusterScaleOut,
    ClusterScaleIn,
    ClusterAddNodes,
    ClusterDelNodes,
    ClusterReplaceNodes,
    ClusterCheck,
    ClusterRecover,
    ClusterOperation,
    ClusterAttachPolicy,
    ClusterDetachPolicy,
    ClusterUpdatePolicy,
    NodeCreate,
    NodeDelete,
    NodeUpdate,
    NodeJoin,
    NodeLeave,
    NodeCheck,
    NodeRecover,
    NodeOperation,
}

crate::simple_display! {
    ActionVerb {
        ClusterCreate => "CLUSTER_CREATE",
        ClusterDelete => "CLUSTER_DELETE",
        ClusterUpdate => "CLUSTER_UPDATE",
        ClusterResize => "CLUSTER_RESIZE",
        ClusterScaleOut => "CLUSTER_SCALE_OUT",
        ClusterScaleIn => "CLUSTER_SCALE_IN",
        ClusterAddNodes => "CLUSTER_ADD_NODES",
        ClusterDelNodes => "CLUSTER_DEL_NODES",
        ClusterReplaceNodes => "CLUSTER_REPLACE_NODES",
        ClusterCheck => "CLUSTER_CHECK",
        ClusterRecover => "CLUSTER_RECOVER",
        ClusterOperation => "CLUSTER_OPERATION",
        ClusterAttachPolicy => "CLUSTER_ATTACH_POLICY",
        ClusterDetachPolicy => "CLUSTER_DETACH_POLICY",
        ClusterUpdatePolicy => "CLUSTER_UPDATE_POLICY",
        NodeCreate => "NODE_CREATE",
        NodeDelete => "NODE_DELETE",
        NodeUpdate => "NODE_UPDATE",
        NodeJoin => "NODE_JOIN",
        NodeLeave => "NODE_LEAVE",
        NodeCheck => "NODE_CHECK",
        NodeRecover => "NODE_RECOVER",
        NodeOperation => "NODE_OPERATION",
    }
}

impl ActionVerb {
    pub const ALL: [ActionVerb; 23] = [
        ActionVerb::ClusterCreate,
        ActionVerb::ClusterDelete,
        ActionVerb::ClusterUpdate,
        ActionVerb::ClusterResize,
        ActionVerb::ClusterScaleOut,
        ActionVerb::ClusterScaleIn,
        ActionVerb::ClusterAddNodes,
        ActionVerb::ClusterDelNodes,
        ActionVerb::ClusterReplaceNodes,
        ActionVerb::ClusterCheck,
        ActionVerb::ClusterRecover,
        ActionVerb::ClusterOperation,
        ActionVerb::ClusterAttachPolicy,
        ActionVerb::ClusterDetachPolicy,
        ActionVerb::ClusterUpdatePolicy,
        ActionVerb::NodeCreate,
        ActionVerb::NodeDelete,
        ActionVerb::NodeUpdate,
        ActionVerb::NodeJoin,
        ActionVerb::NodeLeave,
        ActionVerb::NodeCheck,
        ActionVerb::NodeRecover,
        ActionVerb::NodeOperation,
    ];

    /// True for the CLUSTER_* family.
    pub fn is_cluster(&self) -> bool {
        !self.is_node()
    }

    /// True for the NODE_* family.
    pub fn is_node(&self) -> bool {
        matches!(
            self,
            ActionVerb::NodeCreate
                | ActionVerb::NodeDelete
                | ActionVerb::NodeUpdate
                | ActionVerb::NodeJoin
                | ActionVerb::NodeLeave
                | ActionVerb::NodeCheck
                | ActionVerb::NodeRecover
                | ActionVerb::NodeOperation
        )
    }

    /// Lower-cased, dash-joined form used when naming derived child actions
    /// (e.g. `node-create`).
    pub fn slug(&self) -> String {
        self.to_string().to_lowercase().replace('_', "-")
    }
}

impl FromStr for ActionVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionVerb::ALL
            .iter()
            .find(|v| v.to_string() == s)
            .copied()
            .ok_or_else(|| format!("unknown action verb: {s}"))
    }
}

#[cfg(test)]
#[path = "verb_tests.rs"]
mod tests;
