// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable-state interface consumed by the engine.

use crate::error::StoreError;
use muster_core::{
    Action, ActionId, ActionStatus, Cluster, ClusterId, Node, NodeId, PolicyBinding, PolicyId,
    ServiceId, ServiceRecord, Signal,
};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Lock granularity on a cluster.
///
/// `Cluster` admits exactly one owner. `Node` admits many owners (node
/// actions serialize against cluster-wide access but not against each
/// other). The two scopes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockScope {
    Cluster,
    Node,
}

muster_core::simple_display! {
    LockScope {
        Cluster => "CLUSTER_SCOPE",
        Node => "NODE_SCOPE",
    }
}

/// Dependents whose status changed as a side effect of a terminal write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependentWakeups {
    /// Dependents whose last depended action succeeded; now READY.
    pub ready: Vec<ActionId>,
    /// Dependents marked FAILED because a depended action failed/cancelled.
    pub failed: Vec<ActionId>,
}

/// Outcome of `gc_by_engine`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub locks_broken: usize,
    pub actions_abandoned: usize,
}

/// Durable state for clusters, nodes, actions, locks, policy bindings,
/// dependencies, and the service registry.
///
/// Every method is atomic with respect to every other method. Timestamps
/// are epoch milliseconds supplied by the caller; the store holds no clock.
pub trait Store: Send + Sync {
    // === Clusters ===
    fn cluster_create(&self, cluster: Cluster) -> Result<ClusterId>;
    fn cluster_get(&self, id: ClusterId) -> Result<Cluster>;
    /// Full-record write; the record must exist.
    fn cluster_update(&self, cluster: Cluster) -> Result<()>;
    fn cluster_delete(&self, id: ClusterId) -> Result<()>;
    /// Atomic monotonically increasing node index for the cluster.
    fn next_index(&self, id: ClusterId) -> Result<u32>;
    fn cluster_add_node(&self, id: ClusterId, node_id: NodeId) -> Result<()>;
    /// Idempotent: removing a non-member is a no-op.
    fn cluster_remove_node(&self, id: ClusterId, node_id: NodeId) -> Result<()>;

    // === Nodes ===
    fn node_create(&self, node: Node) -> Result<NodeId>;
    fn node_get(&self, id: NodeId) -> Result<Node>;
    fn node_update(&self, node: Node) -> Result<()>;
    fn node_delete(&self, id: NodeId) -> Result<()>;
    /// Authoritative member population of a cluster.
    fn count_by_cluster(&self, id: ClusterId) -> Result<usize>;
    fn nodes_by_cluster(&self, id: ClusterId) -> Result<Vec<Node>>;

    // === Actions ===
    fn action_create(&self, action: Action) -> Result<ActionId>;
    fn action_get(&self, id: ActionId) -> Result<Action>;
    fn action_update(&self, action: Action) -> Result<()>;
    fn action_delete(&self, id: ActionId) -> Result<()>;
    /// Claim the oldest READY action: status → RUNNING, owner and
    /// start_time set. Returns `None` when nothing is claimable.
    fn action_acquire_first_ready(&self, owner: ServiceId, now_ms: u64) -> Option<Action>;
    /// Claim one specific action if it is READY.
    fn action_acquire(&self, id: ActionId, owner: ServiceId, now_ms: u64) -> Result<Option<Action>>;
    /// Clear owner and re-mark READY so another engine can claim it.
    fn action_abandon(&self, id: ActionId) -> Result<()>;
    fn action_mark_succeeded(&self, id: ActionId, now_ms: u64, reason: &str)
        -> Result<DependentWakeups>;
    fn action_mark_failed(&self, id: ActionId, now_ms: u64, reason: &str)
        -> Result<DependentWakeups>;
    fn action_mark_cancelled(&self, id: ActionId, now_ms: u64) -> Result<DependentWakeups>;
    fn action_mark_ready(&self, id: ActionId) -> Result<()>;
    /// Pause a RUNNING action (SIG_SUSPEND observed at a suspension point).
    fn action_mark_suspended(&self, id: ActionId) -> Result<()>;
    /// Resume a SUSPENDED action back to RUNNING.
    fn action_mark_running(&self, id: ActionId) -> Result<()>;
    fn action_signal(&self, id: ActionId, signal: Signal) -> Result<()>;
    fn action_signal_query(&self, id: ActionId) -> Result<Option<Signal>>;
    fn action_signal_clear(&self, id: ActionId) -> Result<()>;
    /// Current status after applying the wall-clock timeout: a RUNNING
    /// action past its budget is marked FAILED (reason TIMEOUT) first.
    fn action_check_status(&self, id: ActionId, now_ms: u64) -> Result<ActionStatus>;
    fn actions_by_target(&self, target: &str) -> Result<Vec<Action>>;
    /// Delete terminal actions whose end_time is before the cutoff.
    fn action_prune(&self, older_than_ms: u64) -> Result<usize>;

    // === Dependencies ===
    /// Record edges depended → dependent. A READY/INIT dependent moves to
    /// WAITING until every depended action succeeds.
    fn dependency_add(&self, depended: &[ActionId], dependent: ActionId) -> Result<()>;
    fn dependency_get_depended(&self, id: ActionId) -> Result<Vec<ActionId>>;
    fn dependency_get_dependents(&self, id: ActionId) -> Result<Vec<ActionId>>;

    // === Cluster locks ===
    /// Try-acquire; returns the owner set after the attempt. The caller
    /// checks whether its action id made it in.
    fn cluster_lock_acquire(
        &self,
        cluster_id: ClusterId,
        action_id: ActionId,
        scope: LockScope,
    ) -> Vec<ActionId>;
    /// Overwrite the owners with `{action_id}` at CLUSTER scope.
    fn cluster_lock_steal(&self, cluster_id: ClusterId, action_id: ActionId) -> Vec<ActionId>;
    /// Remove one owner; idempotent. Returns whether anything was removed.
    fn cluster_lock_release(
        &self,
        cluster_id: ClusterId,
        action_id: ActionId,
        scope: LockScope,
    ) -> bool;
    fn cluster_lock_owners(&self, cluster_id: ClusterId) -> Vec<ActionId>;

    // === Node locks ===
    /// Mutex try-acquire; returns the holder after the attempt.
    fn node_lock_acquire(&self, node_id: NodeId, action_id: ActionId) -> ActionId;
    fn node_lock_steal(&self, node_id: NodeId, action_id: ActionId) -> ActionId;
    fn node_lock_release(&self, node_id: NodeId, action_id: ActionId) -> bool;
    fn node_lock_owner(&self, node_id: NodeId) -> Option<ActionId>;

    // === Policy bindings ===
    /// Rejects duplicate policy ids and enabled same-type conflicts.
    fn binding_create(&self, binding: PolicyBinding) -> Result<()>;
    fn binding_get(&self, cluster_id: ClusterId, policy_id: PolicyId) -> Result<PolicyBinding>;
    fn binding_update(&self, binding: PolicyBinding) -> Result<()>;
    fn binding_delete(&self, cluster_id: ClusterId, policy_id: PolicyId) -> Result<()>;
    /// All bindings for a cluster, ascending priority.
    fn bindings_by_cluster(&self, cluster_id: ClusterId) -> Vec<PolicyBinding>;
    fn binding_update_last_op(
        &self,
        cluster_id: ClusterId,
        policy_id: PolicyId,
        now_ms: u64,
    ) -> Result<()>;

    // === Service registry ===
    fn service_create(&self, record: ServiceRecord) -> Result<()>;
    /// Heartbeat: refresh updated_at.
    fn service_update(&self, id: ServiceId, now_ms: u64) -> Result<()>;
    /// Idempotent.
    fn service_delete(&self, id: ServiceId) -> Result<()>;
    fn service_get(&self, id: ServiceId) -> Result<ServiceRecord>;
    /// Peers of the given name whose heartbeat is older than the down time.
    fn services_expired(&self, name: &str, now_ms: u64, down_time_secs: u64) -> Vec<ServiceRecord>;
    /// Break every lock owned by any action whose owner is this service and
    /// abandon those actions so they can be re-claimed.
    fn gc_by_engine(&self, service_id: ServiceId) -> GcStats;
}
