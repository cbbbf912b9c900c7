// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action entity and its status machine.

use crate::data::ActionData;
use crate::id::{ActionId, ServiceId};
use crate::verb::ActionVerb;
use serde::{Deserialize, Serialize};

/// Why an action exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cause {
    /// Submitted by an external caller.
    RpcRequest,
    /// Created by a parent action as a child.
    DerivedAction,
}

crate::simple_display! {
    Cause {
        RpcRequest => "RPC Request",
        DerivedAction => "Derived Action",
    }
}

/// Action status FSM.
///
///  INIT:      fields still being filled in, or dependencies being recorded.
///  READY:     claimable by a worker.
///  RUNNING:   claimed; a worker is executing it.
///  WAITING:   blocked on depended actions.
///  SUSPENDED: paused by SIG_SUSPEND; resumes on SIG_RESUME.
///  SUCCEEDED / FAILED / CANCELLED: terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Init,
    Waiting,
    Ready,
    Running,
    Suspended,
    Succeeded,
    Failed,
    Cancelled,
}

crate::simple_display! {
    ActionStatus {
        Init => "INIT",
        Waiting => "WAITING",
        Ready => "READY",
        Running => "RUNNING",
        Suspended => "SUSPENDED",
        Succeeded => "SUCCEEDED",
        Failed => "FAILED",
        Cancelled => "CANCELLED",
    }
}

impl ActionStatus {
    /// Terminal statuses never change again (invariant S1).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Succeeded | ActionStatus::Failed | ActionStatus::Cancelled)
    }
}

/// What a handler returned; mapped onto terminal status by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionResult {
    Ok,
    Error,
    Retry,
    Cancel,
    Timeout,
    LifecycleComplete,
}

crate::simple_display! {
    ActionResult {
        Ok => "OK",
        Error => "ERROR",
        Retry => "RETRY",
        Cancel => "CANCEL",
        Timeout => "TIMEOUT",
        LifecycleComplete => "LIFECYCLE_COMPLETE",
    }
}

/// Externally injected signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Cancel,
    Suspend,
    Resume,
}

crate::simple_display! {
    Signal {
        Cancel => "CANCEL",
        Suspend => "SUSPEND",
        Resume => "RESUME",
    }
}

impl Signal {
    /// Statuses in which delivering this signal is legal.
    pub fn legal_in(&self, status: ActionStatus) -> bool {
        match self {
            Signal::Cancel => matches!(
                status,
                ActionStatus::Init
                    | ActionStatus::Waiting
                    | ActionStatus::Ready
                    | ActionStatus::Running
            ),
            Signal::Suspend => status == ActionStatus::Running,
            Signal::Resume => status == ActionStatus::Suspended,
        }
    }
}

/// A unit of work with a verb, a target, and a status FSM.
///
/// Status transitions are owned by the engine's status writer; handlers
/// never write `status` directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub name: String,
    pub verb: ActionVerb,
    /// Cluster or node id, depending on the verb family.
    pub target: String,
    pub cause: Cause,
    /// Engine service currently executing this action; `None` when unclaimed.
    pub owner: Option<ServiceId>,
    /// Seconds between repeated executions; -1 = one-shot.
    pub interval: i64,
    /// Epoch ms set at claim time.
    pub start_time: Option<u64>,
    /// Epoch ms set at terminal status.
    pub end_time: Option<u64>,
    pub timeout_secs: u64,
    pub status: ActionStatus,
    pub status_reason: String,
    /// Caller-supplied parameters.
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Handler-written results.
    #[serde(default)]
    pub outputs: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<ActionId>,
    #[serde(default)]
    pub depended_by: Vec<ActionId>,
    #[serde(default)]
    pub data: ActionData,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Action {
    /// Create an unstored action with defaults; refine with the setters.
    pub fn new(verb: ActionVerb, target: impl Into<String>, created_at: u64) -> Self {
        let id = ActionId::new();
        Self {
            id,
            name: format!("{}-{}", verb.slug(), id.short(8)),
            verb,
            target: target.into(),
            cause: Cause::RpcRequest,
            owner: None,
            interval: -1,
            start_time: None,
            end_time: None,
            timeout_secs: 3600,
            status: ActionStatus::Ready,
            status_reason: String::new(),
            inputs: serde_json::Map::new(),
            outputs: serde_json::Map::new(),
            depends_on: Vec::new(),
            depended_by: Vec::new(),
            data: ActionData::default(),
            created_at,
            updated_at: created_at,
        }
    }

    crate::setters! {
        into {
            name: String,
        }
        set {
            cause: Cause,
            interval: i64,
            timeout_secs: u64,
            inputs: serde_json::Map<String, serde_json::Value>,
            status: ActionStatus,
        }
    }

    /// Wall-clock timeout check: elapsed-since-claim beyond the budget.
    ///
    /// Unclaimed actions never time out.
    pub fn is_timeout(&self, now_ms: u64) -> bool {
        match self.start_time {
            Some(start) => now_ms.saturating_sub(start) > self.timeout_secs * 1000,
            None => false,
        }
    }

    /// Read a string input by key.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(|v| v.as_str())
    }

    /// Read an unsigned integer input by key.
    pub fn input_u64(&self, key: &str) -> Option<u64> {
        self.inputs.get(key).and_then(|v| v.as_u64())
    }

    /// Read a boolean input by key.
    pub fn input_bool(&self, key: &str) -> Option<bool> {
        self.inputs.get(key).and_then(|v| v.as_bool())
    }
}

crate::builder! {
    pub struct ActionBuilder => Action {
        into {
            name: String = "test-action",
            target: String = "clu-test",
            status_reason: String = "",
        }
        set {
            verb: ActionVerb = ActionVerb::ClusterCreate,
            cause: Cause = Cause::RpcRequest,
            owner: Option<ServiceId> = None,
            interval: i64 = -1,
            start_time: Option<u64> = None,
            end_time: Option<u64> = None,
            timeout_secs: u64 = 3600,
            status: ActionStatus = ActionStatus::Ready,
            inputs: serde_json::Map<String, serde_json::Value> = serde_json::Map::new(),
            outputs: serde_json::Map<String, serde_json::Value> = serde_json::Map::new(),
            depends_on: Vec<ActionId> = Vec::new(),
            depended_by: Vec<ActionId> = Vec::new(),
            data: ActionData = ActionData::default(),
            created_at: u64 = 1_000_000,
            updated_at: u64 = 1_000_000,
        }
        computed {
            id: ActionId = ActionId::new(),
        }
    }
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod tests;
