// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Policy plug-in seam.
//!
//! Plug-ins read and write `action.data` and `action.inputs` only. The
//! engine guarantees ordering (ascending binding priority), cooldown
//! enforcement, and the data hand-off; everything else is the plug-in's.

use async_trait::async_trait;
use muster_core::{Action, ActionVerb, ClusterId};
use thiserror::Error;

/// When a policy hook runs relative to the action's mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyPhase {
    Before,
    After,
}

muster_core::simple_display! {
    PolicyPhase {
        Before => "BEFORE",
        After => "AFTER",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PolicyError(pub String);

impl PolicyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

pub type PolicyResult = Result<(), PolicyError>;

/// A pluggable decision module consulted at BEFORE/AFTER checkpoints.
#[async_trait]
pub trait PolicyPlugin: Send + Sync {
    /// Policy type name; one enabled binding per type per cluster.
    fn type_name(&self) -> &str;

    /// The (phase, verb) pairs this policy wants to see.
    fn targets(&self) -> Vec<(PolicyPhase, ActionVerb)>;

    /// Binding priority used when the attach request does not specify one.
    fn default_priority(&self) -> u32 {
        100
    }

    /// Binding cooldown used when the attach request does not specify one.
    fn default_cooldown(&self) -> u64 {
        0
    }

    async fn pre_op(&self, cluster_id: ClusterId, action: &mut Action) -> PolicyResult;

    async fn post_op(&self, cluster_id: ClusterId, action: &mut Action) -> PolicyResult;
}
