// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster-policy bindings.

use crate::id::{ClusterId, PolicyId};
use serde::{Deserialize, Serialize};

/// Enforcement severity of a binding.
///
/// A failed check at `Should` or above aborts the pipeline; below that the
/// failure is logged and tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyLevel {
    Might,
    Would,
    Should,
    Must,
}

crate::simple_display! {
    PolicyLevel {
        Might => "MIGHT",
        Would => "WOULD",
        Should => "SHOULD",
        Must => "MUST",
    }
}

/// The (cluster, policy) association.
///
/// A cluster never holds two enabled bindings of the same policy *type*;
/// the conflict is rejected at attach time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub cluster_id: ClusterId,
    pub policy_id: PolicyId,
    /// Policy type name, recorded for duplicate-type conflict detection.
    pub policy_type: String,
    pub enabled: bool,
    /// Lower number runs first.
    pub priority: u32,
    pub level: PolicyLevel,
    pub cooldown_secs: u64,
    /// Epoch ms of the last AFTER-phase invocation.
    pub last_op: Option<u64>,
}

impl PolicyBinding {
    pub fn new(cluster_id: ClusterId, policy_id: PolicyId, policy_type: impl Into<String>) -> Self {
        Self {
            cluster_id,
            policy_id,
            policy_type: policy_type.into(),
            enabled: true,
            priority: 100,
            level: PolicyLevel::Should,
            cooldown_secs: 0,
            last_op: None,
        }
    }

    crate::setters! {
        set {
            enabled: bool,
            priority: u32,
            level: PolicyLevel,
            cooldown_secs: u64,
        }
    }

    /// True while the cooldown window since `last_op` has not elapsed.
    pub fn cooldown_in_progress(&self, now_ms: u64) -> bool {
        match self.last_op {
            Some(last) if self.cooldown_secs > 0 => {
                now_ms.saturating_sub(last) < self.cooldown_secs * 1000
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
