// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed action data bag.
//!
//! Policies and handlers communicate through well-known sub-structures
//! instead of a free-form dict: a policy writes `creation`/`deletion`/
//! `update`/`health`, the handler reads exactly those fields.

use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of the policy check pipeline, read by handlers before mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CheckStatus {
    #[default]
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

crate::simple_display! {
    CheckStatus {
        Ok => "OK",
        Error => "ERROR",
    }
}

/// Scratchpad shared between the policy engine and the handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionData {
    /// Policy check outcome; `Error` aborts the handler before mutation.
    #[serde(default)]
    pub status: CheckStatus,
    #[serde(default)]
    pub reason: String,
    /// Retry attempts consumed so far (see the RETRY result path).
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<Creation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion: Option<Deletion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdatePlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
}

impl ActionData {
    /// Reset the check fields to a clean slate before a policy walk.
    pub fn reset_check(&mut self, reason: impl Into<String>) {
        self.status = CheckStatus::Ok;
        self.reason = reason.into();
    }

    /// Flip the check outcome to an error with the given reason.
    pub fn fail_check(&mut self, reason: impl Into<String>) {
        self.status = CheckStatus::Error;
        self.reason = reason.into();
    }
}

/// Creation plan written by scaling/placement policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Creation {
    pub count: u32,
    /// Nodes created so far (accumulated by the handler).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeId>,
    /// Placement plan: availability zone name → node count.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub zones: HashMap<String, u32>,
    /// Placement plan: region name → node count.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub regions: HashMap<String, u32>,
}

/// Deletion plan written by scaling/deletion policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deletion {
    pub count: u32,
    /// Victim nodes chosen by a policy; empty means the handler picks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<NodeId>,
    /// Seconds to wait before destroying each node.
    #[serde(default)]
    pub grace_period: u64,
    /// When false, removed nodes are orphaned (NODE_LEAVE) instead of
    /// destroyed (NODE_DELETE).
    #[serde(default = "default_true")]
    pub destroy_after_deletion: bool,
    /// When false, deletion leaves `desired_capacity` untouched.
    #[serde(default = "default_true")]
    pub reduce_desired_capacity: bool,
    /// Nodes removed per wave; 0 = all at once.
    #[serde(default)]
    pub batch_size: usize,
    /// Seconds to pause between waves.
    #[serde(default)]
    pub pause_time: u64,
}

impl Default for Deletion {
    fn default() -> Self {
        Self {
            count: 0,
            candidates: Vec::new(),
            grace_period: 0,
            destroy_after_deletion: true,
            reduce_desired_capacity: true,
            batch_size: 0,
            pause_time: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Rolling-update plan written by an update policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlan {
    /// Batches of node ids updated sequentially.
    pub plan: Vec<Vec<NodeId>>,
    /// Seconds to pause between batches.
    #[serde(default)]
    pub pause_time: u64,
    #[serde(default)]
    pub min_in_service: u32,
}

/// Recovery parameters written by a health policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Health {
    /// Inputs handed to each derived NODE_RECOVER action
    /// (`operation`, `params`, `force_recreate`, `delete_timeout`).
    #[serde(default)]
    pub recover_action: serde_json::Map<String, serde_json::Value>,
    /// Fencing flags forwarded to the driver.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fencing: Vec<String>,
}

#[cfg(test)]
#[path = "data_tests.rs"]
mod tests;
