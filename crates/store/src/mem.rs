// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory reference store.
//!
//! All state lives behind one mutex, so every [`Store`] method is a single
//! critical section and the atomicity contract holds by construction.

use crate::error::StoreError;
use crate::store::{DependentWakeups, GcStats, LockScope, Result, Store};
use muster_core::{
    Action, ActionId, ActionStatus, Cluster, ClusterId, Node, NodeId, NotFound, PolicyBinding,
    PolicyId, ServiceId, ServiceRecord, Signal,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct ClusterLockRecord {
    scope: LockScope,
    owners: Vec<ActionId>,
}

#[derive(Default)]
struct StoreState {
    clusters: HashMap<ClusterId, Cluster>,
    cluster_indices: HashMap<ClusterId, u32>,
    nodes: HashMap<NodeId, Node>,
    actions: HashMap<ActionId, Action>,
    signals: HashMap<ActionId, Signal>,
    /// dependent → depended actions not yet SUCCEEDED
    outstanding: HashMap<ActionId, HashSet<ActionId>>,
    cluster_locks: HashMap<ClusterId, ClusterLockRecord>,
    node_locks: HashMap<NodeId, ActionId>,
    bindings: Vec<PolicyBinding>,
    services: HashMap<ServiceId, ServiceRecord>,
}

/// The in-memory [`Store`].
#[derive(Default)]
pub struct MemStore {
    state: Mutex<StoreState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreState {
    fn action_mut(&mut self, id: ActionId) -> Result<&mut Action> {
        self.actions.get_mut(&id).ok_or_else(|| NotFound::action(id).into())
    }

    /// Finish an action and propagate to its dependents.
    ///
    /// On success, dependents whose outstanding set drains move WAITING →
    /// READY. On failure/cancellation, WAITING dependents are failed with a
    /// reason naming this action, cascading.
    fn finish(
        &mut self,
        id: ActionId,
        status: ActionStatus,
        now_ms: u64,
        reason: &str,
    ) -> Result<DependentWakeups> {
        let mut wakeups = DependentWakeups::default();

        let action = self.action_mut(id)?;
        if action.status.is_terminal() {
            return Ok(wakeups);
        }
        action.status = status;
        action.status_reason = reason.to_string();
        action.end_time = Some(now_ms);
        action.updated_at = now_ms;
        let dependents = action.depended_by.clone();
        self.signals.remove(&id);
        self.outstanding.remove(&id);

        match status {
            ActionStatus::Succeeded => {
                for dep in dependents {
                    let drained = match self.outstanding.get_mut(&dep) {
                        Some(set) => {
                            set.remove(&id);
                            set.is_empty()
                        }
                        None => continue,
                    };
                    if drained {
                        self.outstanding.remove(&dep);
                        if let Some(a) = self.actions.get_mut(&dep) {
                            if a.status == ActionStatus::Waiting {
                                a.status = ActionStatus::Ready;
                                a.updated_at = now_ms;
                                wakeups.ready.push(dep);
                            }
                        }
                    }
                }
            }
            ActionStatus::Failed | ActionStatus::Cancelled => {
                // Cascade failure into WAITING dependents.
                let mut stack = vec![(id, dependents)];
                while let Some((cause, deps)) = stack.pop() {
                    for dep in deps {
                        self.outstanding.remove(&dep);
                        let Some(a) = self.actions.get_mut(&dep) else { continue };
                        if a.status != ActionStatus::Waiting {
                            continue;
                        }
                        a.status = ActionStatus::Failed;
                        a.status_reason = format!("Depended action '{cause}' failed");
                        a.end_time = Some(now_ms);
                        a.updated_at = now_ms;
                        let next = a.depended_by.clone();
                        wakeups.failed.push(dep);
                        self.signals.remove(&dep);
                        stack.push((dep, next));
                    }
                }
            }
            _ => {}
        }

        Ok(wakeups)
    }
}

impl Store for MemStore {
    // === Clusters ===

    fn cluster_create(&self, cluster: Cluster) -> Result<ClusterId> {
        let mut state = self.state.lock();
        let id = cluster.id;
        state.clusters.insert(id, cluster);
        Ok(id)
    }

    fn cluster_get(&self, id: ClusterId) -> Result<Cluster> {
        let state = self.state.lock();
        state.clusters.get(&id).cloned().ok_or_else(|| NotFound::cluster(id).into())
    }

    fn cluster_update(&self, cluster: Cluster) -> Result<()> {
        let mut state = self.state.lock();
        if !state.clusters.contains_key(&cluster.id) {
            return Err(NotFound::cluster(cluster.id).into());
        }
        state.clusters.insert(cluster.id, cluster);
        Ok(())
    }

    fn cluster_delete(&self, id: ClusterId) -> Result<()> {
        let mut state = self.state.lock();
        state.clusters.remove(&id).ok_or_else(|| NotFound::cluster(id))?;
        state.cluster_indices.remove(&id);
        state.bindings.retain(|b| b.cluster_id != id);
        Ok(())
    }

    fn next_index(&self, id: ClusterId) -> Result<u32> {
        let mut state = self.state.lock();
        if !state.clusters.contains_key(&id) {
            return Err(NotFound::cluster(id).into());
        }
        let counter = state.cluster_indices.entry(id).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn cluster_add_node(&self, id: ClusterId, node_id: NodeId) -> Result<()> {
        let mut state = self.state.lock();
        let cluster = state.clusters.get_mut(&id).ok_or_else(|| NotFound::cluster(id))?;
        if !cluster.nodes.contains(&node_id) {
            cluster.nodes.push(node_id);
        }
        Ok(())
    }

    fn cluster_remove_node(&self, id: ClusterId, node_id: NodeId) -> Result<()> {
        let mut state = self.state.lock();
        let cluster = state.clusters.get_mut(&id).ok_or_else(|| NotFound::cluster(id))?;
        cluster.nodes.retain(|n| *n != node_id);
        Ok(())
    }

    // === Nodes ===

    fn node_create(&self, node: Node) -> Result<NodeId> {
        let mut state = self.state.lock();
        let id = node.id;
        state.nodes.insert(id, node);
        Ok(id)
    }

    fn node_get(&self, id: NodeId) -> Result<Node> {
        let state = self.state.lock();
        state.nodes.get(&id).cloned().ok_or_else(|| NotFound::node(id).into())
    }

    fn node_update(&self, node: Node) -> Result<()> {
        let mut state = self.state.lock();
        if !state.nodes.contains_key(&node.id) {
            return Err(NotFound::node(node.id).into());
        }
        state.nodes.insert(node.id, node);
        Ok(())
    }

    fn node_delete(&self, id: NodeId) -> Result<()> {
        let mut state = self.state.lock();
        let node = state.nodes.remove(&id).ok_or_else(|| NotFound::node(id))?;
        if let Some(cluster_id) = node.cluster_id {
            if let Some(cluster) = state.clusters.get_mut(&cluster_id) {
                cluster.nodes.retain(|n| *n != id);
            }
        }
        state.node_locks.remove(&id);
        Ok(())
    }

    fn count_by_cluster(&self, id: ClusterId) -> Result<usize> {
        let state = self.state.lock();
        Ok(state.nodes.values().filter(|n| n.cluster_id == Some(id)).count())
    }

    fn nodes_by_cluster(&self, id: ClusterId) -> Result<Vec<Node>> {
        let state = self.state.lock();
        let mut nodes: Vec<Node> =
            state.nodes.values().filter(|n| n.cluster_id == Some(id)).cloned().collect();
        nodes.sort_by_key(|n| n.index);
        Ok(nodes)
    }

    // === Actions ===

    fn action_create(&self, action: Action) -> Result<ActionId> {
        let mut state = self.state.lock();
        let id = action.id;
        state.actions.insert(id, action);
        Ok(id)
    }

    fn action_get(&self, id: ActionId) -> Result<Action> {
        let state = self.state.lock();
        state.actions.get(&id).cloned().ok_or_else(|| NotFound::action(id).into())
    }

    fn action_update(&self, action: Action) -> Result<()> {
        let mut state = self.state.lock();
        let stored = state.action_mut(action.id)?;
        // Payload-only write: the status FSM fields (status, owner,
        // start/end time) are owned by the claim/mark primitives.
        stored.name = action.name;
        stored.inputs = action.inputs;
        stored.outputs = action.outputs;
        stored.data = action.data;
        stored.timeout_secs = action.timeout_secs;
        stored.interval = action.interval;
        stored.updated_at = action.updated_at;
        Ok(())
    }

    fn action_delete(&self, id: ActionId) -> Result<()> {
        let mut state = self.state.lock();
        state.actions.remove(&id).ok_or_else(|| NotFound::action(id))?;
        state.signals.remove(&id);
        state.outstanding.remove(&id);
        Ok(())
    }

    fn action_acquire_first_ready(&self, owner: ServiceId, now_ms: u64) -> Option<Action> {
        let mut state = self.state.lock();
        let id = state
            .actions
            .values()
            .filter(|a| a.status == ActionStatus::Ready)
            .min_by_key(|a| (a.created_at, a.id))?
            .id;
        let action = state.actions.get_mut(&id)?;
        action.status = ActionStatus::Running;
        action.owner = Some(owner);
        action.start_time = Some(now_ms);
        action.updated_at = now_ms;
        Some(action.clone())
    }

    fn action_acquire(
        &self,
        id: ActionId,
        owner: ServiceId,
        now_ms: u64,
    ) -> Result<Option<Action>> {
        let mut state = self.state.lock();
        let action = state.action_mut(id)?;
        if action.status != ActionStatus::Ready {
            return Ok(None);
        }
        action.status = ActionStatus::Running;
        action.owner = Some(owner);
        action.start_time = Some(now_ms);
        action.updated_at = now_ms;
        Ok(Some(action.clone()))
    }

    fn action_abandon(&self, id: ActionId) -> Result<()> {
        let mut state = self.state.lock();
        let action = state.action_mut(id)?;
        if action.status.is_terminal() {
            return Ok(());
        }
        action.status = ActionStatus::Ready;
        action.owner = None;
        action.start_time = None;
        Ok(())
    }

    fn action_mark_succeeded(
        &self,
        id: ActionId,
        now_ms: u64,
        reason: &str,
    ) -> Result<DependentWakeups> {
        let mut state = self.state.lock();
        let reason = if reason.is_empty() { "Action completed" } else { reason };
        state.finish(id, ActionStatus::Succeeded, now_ms, reason)
    }

    fn action_mark_failed(
        &self,
        id: ActionId,
        now_ms: u64,
        reason: &str,
    ) -> Result<DependentWakeups> {
        let mut state = self.state.lock();
        state.finish(id, ActionStatus::Failed, now_ms, reason)
    }

    fn action_mark_cancelled(&self, id: ActionId, now_ms: u64) -> Result<DependentWakeups> {
        let mut state = self.state.lock();
        state.finish(id, ActionStatus::Cancelled, now_ms, "Action cancelled")
    }

    fn action_mark_ready(&self, id: ActionId) -> Result<()> {
        let mut state = self.state.lock();
        let action = state.action_mut(id)?;
        if action.status.is_terminal() {
            return Ok(());
        }
        action.status = ActionStatus::Ready;
        Ok(())
    }

    fn action_mark_suspended(&self, id: ActionId) -> Result<()> {
        let mut state = self.state.lock();
        let action = state.action_mut(id)?;
        if action.status == ActionStatus::Running {
            action.status = ActionStatus::Suspended;
        }
        Ok(())
    }

    fn action_mark_running(&self, id: ActionId) -> Result<()> {
        let mut state = self.state.lock();
        let action = state.action_mut(id)?;
        if action.status == ActionStatus::Suspended {
            action.status = ActionStatus::Running;
        }
        Ok(())
    }

    fn action_signal(&self, id: ActionId, signal: Signal) -> Result<()> {
        let mut state = self.state.lock();
        if !state.actions.contains_key(&id) {
            return Err(NotFound::action(id).into());
        }
        state.signals.insert(id, signal);
        Ok(())
    }

    fn action_signal_query(&self, id: ActionId) -> Result<Option<Signal>> {
        let state = self.state.lock();
        if !state.actions.contains_key(&id) {
            return Err(NotFound::action(id).into());
        }
        Ok(state.signals.get(&id).copied())
    }

    fn action_signal_clear(&self, id: ActionId) -> Result<()> {
        let mut state = self.state.lock();
        state.signals.remove(&id);
        Ok(())
    }

    fn action_check_status(&self, id: ActionId, now_ms: u64) -> Result<ActionStatus> {
        let mut state = self.state.lock();
        let action = state.action_mut(id)?;
        if action.status == ActionStatus::Running && action.is_timeout(now_ms) {
            state.finish(id, ActionStatus::Failed, now_ms, "TIMEOUT")?;
            return Ok(ActionStatus::Failed);
        }
        Ok(action.status)
    }

    fn actions_by_target(&self, target: &str) -> Result<Vec<Action>> {
        let state = self.state.lock();
        let mut actions: Vec<Action> =
            state.actions.values().filter(|a| a.target == target).cloned().collect();
        actions.sort_by_key(|a| (a.created_at, a.id));
        Ok(actions)
    }

    fn action_prune(&self, older_than_ms: u64) -> Result<usize> {
        let mut state = self.state.lock();
        let doomed: Vec<ActionId> = state
            .actions
            .values()
            .filter(|a| {
                a.status.is_terminal() && a.end_time.is_some_and(|end| end < older_than_ms)
            })
            .map(|a| a.id)
            .collect();
        for id in &doomed {
            state.actions.remove(id);
            state.signals.remove(id);
            state.outstanding.remove(id);
        }
        Ok(doomed.len())
    }

    // === Dependencies ===

    fn dependency_add(&self, depended: &[ActionId], dependent: ActionId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.actions.contains_key(&dependent) {
            return Err(NotFound::action(dependent).into());
        }

        let mut pending = Vec::new();
        let mut failed_cause = None;
        for d in depended {
            let upstream = state.actions.get_mut(d).ok_or_else(|| NotFound::action(*d))?;
            match upstream.status {
                ActionStatus::Succeeded => continue,
                ActionStatus::Failed | ActionStatus::Cancelled => {
                    failed_cause.get_or_insert(*d);
                }
                _ => {}
            }
            if !upstream.depended_by.contains(&dependent) {
                upstream.depended_by.push(dependent);
            }
            pending.push(*d);
        }

        let dependent_ref = state.action_mut(dependent)?;
        for d in depended {
            if !dependent_ref.depends_on.contains(d) {
                dependent_ref.depends_on.push(*d);
            }
        }

        if let Some(cause) = failed_cause {
            dependent_ref.status = ActionStatus::Failed;
            dependent_ref.status_reason = format!("Depended action '{cause}' failed");
            return Ok(());
        }

        if pending.is_empty() {
            // Everything already succeeded; the dependent is runnable.
            if matches!(dependent_ref.status, ActionStatus::Init | ActionStatus::Waiting) {
                dependent_ref.status = ActionStatus::Ready;
            }
            return Ok(());
        }

        if matches!(dependent_ref.status, ActionStatus::Init | ActionStatus::Ready) {
            dependent_ref.status = ActionStatus::Waiting;
        }
        state.outstanding.entry(dependent).or_default().extend(pending);
        Ok(())
    }

    fn dependency_get_depended(&self, id: ActionId) -> Result<Vec<ActionId>> {
        let state = self.state.lock();
        state
            .actions
            .get(&id)
            .map(|a| a.depends_on.clone())
            .ok_or_else(|| NotFound::action(id).into())
    }

    fn dependency_get_dependents(&self, id: ActionId) -> Result<Vec<ActionId>> {
        let state = self.state.lock();
        state
            .actions
            .get(&id)
            .map(|a| a.depended_by.clone())
            .ok_or_else(|| NotFound::action(id).into())
    }

    // === Cluster locks ===

    fn cluster_lock_acquire(
        &self,
        cluster_id: ClusterId,
        action_id: ActionId,
        scope: LockScope,
    ) -> Vec<ActionId> {
        let mut state = self.state.lock();
        let record = state
            .cluster_locks
            .entry(cluster_id)
            .or_insert_with(|| ClusterLockRecord { scope, owners: Vec::new() });

        if record.owners.is_empty() {
            record.scope = scope;
            record.owners.push(action_id);
        } else if scope == LockScope::Node
            && record.scope == LockScope::Node
            && !record.owners.contains(&action_id)
        {
            record.owners.push(action_id);
        }
        record.owners.clone()
    }

    fn cluster_lock_steal(&self, cluster_id: ClusterId, action_id: ActionId) -> Vec<ActionId> {
        let mut state = self.state.lock();
        tracing::info!(cluster_id = %cluster_id, action_id = %action_id, "stealing cluster lock");
        state.cluster_locks.insert(
            cluster_id,
            ClusterLockRecord { scope: LockScope::Cluster, owners: vec![action_id] },
        );
        vec![action_id]
    }

    fn cluster_lock_release(
        &self,
        cluster_id: ClusterId,
        action_id: ActionId,
        _scope: LockScope,
    ) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.cluster_locks.get_mut(&cluster_id) else {
            return false;
        };
        let before = record.owners.len();
        record.owners.retain(|o| *o != action_id);
        let removed = record.owners.len() < before;
        if record.owners.is_empty() {
            state.cluster_locks.remove(&cluster_id);
        }
        removed
    }

    fn cluster_lock_owners(&self, cluster_id: ClusterId) -> Vec<ActionId> {
        let state = self.state.lock();
        state.cluster_locks.get(&cluster_id).map(|r| r.owners.clone()).unwrap_or_default()
    }

    // === Node locks ===

    fn node_lock_acquire(&self, node_id: NodeId, action_id: ActionId) -> ActionId {
        let mut state = self.state.lock();
        *state.node_locks.entry(node_id).or_insert(action_id)
    }

    fn node_lock_steal(&self, node_id: NodeId, action_id: ActionId) -> ActionId {
        let mut state = self.state.lock();
        tracing::info!(node_id = %node_id, action_id = %action_id, "stealing node lock");
        state.node_locks.insert(node_id, action_id);
        action_id
    }

    fn node_lock_release(&self, node_id: NodeId, action_id: ActionId) -> bool {
        let mut state = self.state.lock();
        match state.node_locks.get(&node_id) {
            Some(owner) if *owner == action_id => {
                state.node_locks.remove(&node_id);
                true
            }
            _ => false,
        }
    }

    fn node_lock_owner(&self, node_id: NodeId) -> Option<ActionId> {
        let state = self.state.lock();
        state.node_locks.get(&node_id).copied()
    }

    // === Policy bindings ===

    fn binding_create(&self, binding: PolicyBinding) -> Result<()> {
        let mut state = self.state.lock();
        for existing in state.bindings.iter().filter(|b| b.cluster_id == binding.cluster_id) {
            if existing.policy_id == binding.policy_id {
                return Err(StoreError::BindingExists {
                    policy_id: binding.policy_id.to_string(),
                    cluster_id: binding.cluster_id.to_string(),
                });
            }
            if existing.enabled && binding.enabled && existing.policy_type == binding.policy_type {
                return Err(StoreError::PolicyTypeConflict {
                    policy_type: binding.policy_type.clone(),
                    cluster_id: binding.cluster_id.to_string(),
                });
            }
        }
        state.bindings.push(binding);
        Ok(())
    }

    fn binding_get(&self, cluster_id: ClusterId, policy_id: PolicyId) -> Result<PolicyBinding> {
        let state = self.state.lock();
        state
            .bindings
            .iter()
            .find(|b| b.cluster_id == cluster_id && b.policy_id == policy_id)
            .cloned()
            .ok_or_else(|| NotFound::policy(policy_id).into())
    }

    fn binding_update(&self, binding: PolicyBinding) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .bindings
            .iter_mut()
            .find(|b| b.cluster_id == binding.cluster_id && b.policy_id == binding.policy_id)
            .ok_or_else(|| NotFound::policy(binding.policy_id))?;
        *slot = binding;
        Ok(())
    }

    fn binding_delete(&self, cluster_id: ClusterId, policy_id: PolicyId) -> Result<()> {
        let mut state = self.state.lock();
        let before = state.bindings.len();
        state.bindings.retain(|b| !(b.cluster_id == cluster_id && b.policy_id == policy_id));
        if state.bindings.len() == before {
            return Err(NotFound::policy(policy_id).into());
        }
        Ok(())
    }

    fn bindings_by_cluster(&self, cluster_id: ClusterId) -> Vec<PolicyBinding> {
        let state = self.state.lock();
        let mut bindings: Vec<PolicyBinding> =
            state.bindings.iter().filter(|b| b.cluster_id == cluster_id).cloned().collect();
        bindings.sort_by_key(|b| (b.priority, b.policy_id));
        bindings
    }

    fn binding_update_last_op(
        &self,
        cluster_id: ClusterId,
        policy_id: PolicyId,
        now_ms: u64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .bindings
            .iter_mut()
            .find(|b| b.cluster_id == cluster_id && b.policy_id == policy_id)
            .ok_or_else(|| NotFound::policy(policy_id))?;
        slot.last_op = Some(now_ms);
        Ok(())
    }

    // === Service registry ===

    fn service_create(&self, record: ServiceRecord) -> Result<()> {
        let mut state = self.state.lock();
        state.services.insert(record.id, record);
        Ok(())
    }

    fn service_update(&self, id: ServiceId, now_ms: u64) -> Result<()> {
        let mut state = self.state.lock();
        let record = state.services.get_mut(&id).ok_or_else(|| NotFound::service(id))?;
        record.updated_at = now_ms;
        Ok(())
    }

    fn service_delete(&self, id: ServiceId) -> Result<()> {
        let mut state = self.state.lock();
        state.services.remove(&id);
        Ok(())
    }

    fn service_get(&self, id: ServiceId) -> Result<ServiceRecord> {
        let state = self.state.lock();
        state.services.get(&id).cloned().ok_or_else(|| NotFound::service(id).into())
    }

    fn services_expired(&self, name: &str, now_ms: u64, down_time_secs: u64) -> Vec<ServiceRecord> {
        let state = self.state.lock();
        state
            .services
            .values()
            .filter(|s| s.name == name && !s.is_alive(now_ms, down_time_secs))
            .cloned()
            .collect()
    }

    fn gc_by_engine(&self, service_id: ServiceId) -> GcStats {
        let mut state = self.state.lock();
        let mut stats = GcStats::default();

        let owned: HashSet<ActionId> = state
            .actions
            .values()
            .filter(|a| a.owner == Some(service_id) && !a.status.is_terminal())
            .map(|a| a.id)
            .collect();

        let locked_clusters: Vec<ClusterId> = state
            .cluster_locks
            .iter()
            .filter(|(_, r)| r.owners.iter().any(|o| owned.contains(o)))
            .map(|(id, _)| *id)
            .collect();
        for cluster_id in locked_clusters {
            if let Some(record) = state.cluster_locks.get_mut(&cluster_id) {
                let before = record.owners.len();
                record.owners.retain(|o| !owned.contains(o));
                stats.locks_broken += before - record.owners.len();
                if record.owners.is_empty() {
                    state.cluster_locks.remove(&cluster_id);
                }
            }
        }

        let locked_nodes: Vec<NodeId> = state
            .node_locks
            .iter()
            .filter(|(_, owner)| owned.contains(*owner))
            .map(|(id, _)| *id)
            .collect();
        for node_id in locked_nodes {
            state.node_locks.remove(&node_id);
            stats.locks_broken += 1;
        }

        for id in owned {
            if let Some(action) = state.actions.get_mut(&id) {
                action.status = ActionStatus::Ready;
                action.owner = None;
                action.start_time = None;
                stats.actions_abandoned += 1;
            }
        }

        tracing::info!(
            service_id = %service_id,
            locks_broken = stats.locks_broken,
            actions_abandoned = stats.actions_abandoned,
            "garbage collected dead engine"
        );
        stats
    }
}

#[cfg(test)]
#[path = "mem_tests.rs"]
mod tests;
