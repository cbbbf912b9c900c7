// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node action handler.
//!
//! An RPC-caused action on a cluster member first takes the cluster's
//! NODE-scope lock (so cluster-wide actions serialize against it) and runs
//! the policy pipeline; every action then takes the per-node mutex. Both
//! locks are released on every exit path.

use crate::cluster_action::eval_status;
use crate::driver::ProfileDriver;
use crate::context::EngineContext;
use crate::dispatch::sleep_interruptible;
use crate::error::EngineError;
use crate::lock::LockManager;
use crate::policy_check::policy_check;
use crate::plugin::PolicyPhase;
use muster_core::scale::check_size_params;
use muster_core::{
    Action, ActionResult, ActionVerb, Cause, CheckStatus, Clock, ClusterId, Node, NodeId,
    NodeStatus, NotFound,
};
use muster_store::{LockScope, Store};

type Outcome = (ActionResult, String);

pub struct NodeAction<'a, C: Clock> {
    ctx: &'a EngineContext<C>,
    action: &'a mut Action,
}

impl<'a, C: Clock> NodeAction<'a, C> {
    pub fn new(ctx: &'a EngineContext<C>, action: &'a mut Action) -> Self {
        Self { ctx, action }
    }

    pub async fn execute(&mut self) -> Result<Outcome, EngineError> {
        let node_id = NodeId::from_string(&self.action.target);
        let node = match self.ctx.store.node_get(node_id) {
            Ok(node) => node,
            Err(_) => return Ok((ActionResult::Error, NotFound::node(node_id).to_string())),
        };

        // node.cluster_id may be cleared during execution; remember it for
        // the AFTER check and the lock release.
        let saved_cluster = node.cluster_id;
        let coordinated = saved_cluster.is_some() && self.action.cause == Cause::RpcRequest;
        let locks = LockManager::new(self.ctx);

        if coordinated {
            let cluster_id = saved_cluster.unwrap_or_default();
            let locked = locks
                .cluster_lock_acquire(cluster_id, self.action.id, LockScope::Node, false)
                .await;
            if !locked {
                return Ok((ActionResult::Retry, "Failed in locking cluster".to_string()));
            }
        }

        // From here on, every exit must run the release tail below.
        let outcome = self.run_locked(node, node_id, saved_cluster, coordinated, &locks).await;

        locks.node_lock_release(node_id, self.action.id);
        if coordinated {
            let cluster_id = saved_cluster.unwrap_or_default();
            locks.cluster_lock_release(cluster_id, self.action.id, LockScope::Node);
        }
        outcome
    }

    async fn run_locked(
        &mut self,
        node: Node,
        node_id: NodeId,
        saved_cluster: Option<ClusterId>,
        coordinated: bool,
        locks: &LockManager<'a, C>,
    ) -> Result<Outcome, EngineError> {
        if coordinated {
            let cluster_id = saved_cluster.unwrap_or_default();
            policy_check(self.ctx, cluster_id, self.action, PolicyPhase::Before).await?;
            if self.action.data.status == CheckStatus::Error {
                return Ok((
                    ActionResult::Error,
                    format!("Policy check: {}", self.action.data.reason),
                ));
            }
        }

        if !locks.node_lock_acquire(node_id, self.action.id, false).await {
            return Ok((ActionResult::Error, "Failed in locking node".to_string()));
        }

        let mut outcome = self.run(node).await;
        if let (Ok((ActionResult::Ok, _)), true) = (&outcome, coordinated) {
            let cluster_id = saved_cluster.unwrap_or_default();
            policy_check(self.ctx, cluster_id, self.action, PolicyPhase::After).await?;
            if self.action.data.status == CheckStatus::Error {
                outcome = Ok((
                    ActionResult::Error,
                    format!("Policy check: {}", self.action.data.reason),
                ));
            }
        }
        outcome
    }

    async fn run(&mut self, node: Node) -> Result<Outcome, EngineError> {
        match self.action.verb {
            ActionVerb::NodeCreate => self.do_create(node).await,
            ActionVerb::NodeDelete => self.do_delete(node).await,
            ActionVerb::NodeUpdate => self.do_update(node).await,
            ActionVerb::NodeJoin => self.do_join(node).await,
            ActionVerb::NodeLeave => self.do_leave(node).await,
            ActionVerb::NodeCheck => self.do_check(node).await,
            ActionVerb::NodeRecover => self.do_recover(node).await,
            ActionVerb::NodeOperation => self.do_operation(node).await,
            verb => Ok((ActionResult::Error, format!("Unsupported action: {verb}"))),
        }
    }

    fn save_node(&self, mut node: Node) -> Result<Node, EngineError> {
        node.updated_at = Some(self.ctx.clock.epoch_ms());
        self.ctx.store.node_update(node.clone())?;
        Ok(node)
    }

    /// Size guard for RPC-caused membership changes, including the global
    /// per-cluster node cap.
    fn check_cluster_size(&self, cluster_id: ClusterId, desired: i64) -> Result<Option<String>, EngineError> {
        let cluster = self.ctx.store.cluster_get(cluster_id)?;
        let cap = self.ctx.config.max_nodes_per_cluster;
        if desired > cap as i64 {
            return Ok(Some(format!(
                "The target capacity ({desired}) is greater than the maximum number of nodes \
                 allowed per cluster ({cap})."
            )));
        }
        Ok(check_size_params(&cluster, Some(desired), None, None, true))
    }

    async fn do_create(&mut self, node: Node) -> Result<Outcome, EngineError> {
        let coordinated =
            node.cluster_id.is_some() && self.action.cause == Cause::RpcRequest;
        let mut desired = None;

        if coordinated {
            let cluster_id = node.cluster_id.unwrap_or_default();
            // The target node is already attached and therefore counted;
            // the proposed size is the current population itself.
            let current = self.ctx.store.count_by_cluster(cluster_id)? as i64;
            if let Some(msg) = self.check_cluster_size(cluster_id, current)? {
                // The node cannot be placed; detach it before failing.
                let mut orphan = node;
                orphan.cluster_id = None;
                orphan.index = -1;
                let orphan = self.save_node(orphan)?;
                self.ctx.store.cluster_remove_node(cluster_id, orphan.id)?;
                return Ok((ActionResult::Error, msg));
            }
            desired = Some(current.max(0) as u32);
        }

        let mut node = node;
        node.status = NodeStatus::Creating;
        node.status_reason = "Creation in progress".to_string();
        let node = self.save_node(node)?;

        let created = match self.ctx.driver.create(&node).await {
            Ok(physical_id) => {
                let mut node = node.clone();
                node.physical_id = Some(physical_id);
                node.status = NodeStatus::Active;
                node.status_reason = "Creation succeeded".to_string();
                node.created_at = Some(self.ctx.clock.epoch_ms());
                self.save_node(node)?;
                Ok(())
            }
            Err(e) => {
                let mut node = node.clone();
                node.status = NodeStatus::Error;
                node.status_reason = e.to_string();
                self.save_node(node)?;
                Err(e)
            }
        };

        // Re-evaluate the cluster whether or not creation succeeded: the
        // node already counts as a member and may have changed its status.
        if coordinated {
            let cluster_id = node.cluster_id.unwrap_or_default();
            eval_status(self.ctx, cluster_id, ActionVerb::NodeCreate, desired, false).await?;
        }

        Ok(match created {
            Ok(()) => (ActionResult::Ok, "Node created successfully.".to_string()),
            Err(e) => (ActionResult::Error, format!("Node creation failed: {e}")),
        })
    }

    async fn do_delete(&mut self, node: Node) -> Result<Outcome, EngineError> {
        let coordinated =
            node.cluster_id.is_some() && self.action.cause == Cause::RpcRequest;
        let mut desired = None;

        if coordinated {
            let cluster_id = node.cluster_id.unwrap_or_default();
            let current = self.ctx.store.count_by_cluster(cluster_id)? as i64;
            if let Some(msg) = self.check_cluster_size(cluster_id, current - 1)? {
                return Ok((ActionResult::Error, msg));
            }
            desired = Some((current - 1).max(0) as u32);

            let grace = self.action.data.deletion.as_ref().map(|d| d.grace_period).unwrap_or(0);
            if grace > 0 {
                if let Some(outcome) = sleep_interruptible(self.ctx, self.action, grace).await {
                    return Ok(outcome);
                }
            }
        }

        let mut doomed = node;
        doomed.status = NodeStatus::Deleting;
        doomed.status_reason = "Deletion in progress".to_string();
        let doomed = self.save_node(doomed)?;

        let deleted = match self.ctx.driver.delete(&doomed).await {
            Ok(()) => {
                self.ctx.store.node_delete(doomed.id)?;
                Ok(())
            }
            Err(e) => {
                let mut node = doomed.clone();
                node.status = NodeStatus::Error;
                node.status_reason = e.to_string();
                self.save_node(node)?;
                Err(e)
            }
        };

        if coordinated {
            let cluster_id = doomed.cluster_id.unwrap_or_default();
            let reduce = self
                .action
                .data
                .deletion
                .as_ref()
                .map(|d| d.reduce_desired_capacity)
                .unwrap_or(true);
            let new_desired = if reduce && deleted.is_ok() { desired } else { None };
            eval_status(self.ctx, cluster_id, ActionVerb::NodeDelete, new_desired, false).await?;
        }

        Ok(match deleted {
            Ok(()) => (ActionResult::Ok, "Node deleted successfully.".to_string()),
            Err(e) => (ActionResult::Error, format!("Node deletion failed: {e}")),
        })
    }

    async fn do_update(&mut self, node: Node) -> Result<Outcome, EngineError> {
        let Some(new_profile) = self
            .action
            .input_str("new_profile_id")
            .or_else(|| self.action.input_str("profile_id"))
            .map(str::to_string)
        else {
            return Ok((ActionResult::Error, "Invalid input: no new profile specified.".to_string()));
        };

        let mut node = node;
        node.status = NodeStatus::Updating;
        let node = self.save_node(node)?;

        match self.ctx.driver.update(&node, &new_profile).await {
            Ok(()) => {
                let mut node = node.clone();
                node.profile_id = new_profile.as_str().into();
                node.status = NodeStatus::Active;
                node.status_reason = "Update succeeded".to_string();
                self.save_node(node)?;
                Ok((ActionResult::Ok, "Node updated successfully.".to_string()))
            }
            Err(e) => {
                let mut node = node.clone();
                node.status = NodeStatus::Error;
                node.status_reason = e.to_string();
                self.save_node(node)?;
                Ok((ActionResult::Error, format!("Node update failed: {e}")))
            }
        }
    }

    async fn do_join(&mut self, node: Node) -> Result<Outcome, EngineError> {
        let Some(cluster_id) = self.action.input_str("cluster_id").map(ClusterId::from_string)
        else {
            return Ok((ActionResult::Error, "Invalid input: no cluster specified.".to_string()));
        };
        if self.ctx.store.cluster_get(cluster_id).is_err() {
            return Ok((ActionResult::Error, NotFound::cluster(cluster_id).to_string()));
        }

        let current = self.ctx.store.count_by_cluster(cluster_id)? as i64;
        if let Some(msg) = self.check_cluster_size(cluster_id, current + 1)? {
            return Ok((ActionResult::Error, msg));
        }

        if let Err(e) = self.ctx.driver.join(&node, cluster_id).await {
            return Ok((ActionResult::Error, format!("Node failed in joining cluster: {e}")));
        }

        let mut member = node;
        member.cluster_id = Some(cluster_id);
        member.index = self.ctx.store.next_index(cluster_id)? as i64;
        let member = self.save_node(member)?;
        self.ctx.store.cluster_add_node(cluster_id, member.id)?;

        Ok((ActionResult::Ok, "Node successfully joined cluster.".to_string()))
    }

    async fn do_leave(&mut self, node: Node) -> Result<Outcome, EngineError> {
        let Some(cluster_id) = node.cluster_id else {
            return Ok((
                ActionResult::Error,
                "Node is not a member of any cluster.".to_string(),
            ));
        };

        let current = self.ctx.store.count_by_cluster(cluster_id)? as i64;
        let cluster = self.ctx.store.cluster_get(cluster_id)?;
        if let Some(msg) = check_size_params(&cluster, Some(current - 1), None, None, true) {
            return Ok((ActionResult::Error, msg));
        }

        if let Err(e) = self.ctx.driver.leave(&node).await {
            return Ok((ActionResult::Error, format!("Node failed in leaving cluster: {e}")));
        }

        let mut loner = node;
        loner.cluster_id = None;
        loner.index = -1;
        let loner = self.save_node(loner)?;
        self.ctx.store.cluster_remove_node(cluster_id, loner.id)?;

        Ok((ActionResult::Ok, "Node successfully left cluster.".to_string()))
    }

    async fn do_check(&mut self, node: Node) -> Result<Outcome, EngineError> {
        match self.ctx.driver.check(&node).await {
            Ok(true) => {
                let mut node = node;
                node.status = NodeStatus::Active;
                node.status_reason = "Check: node is active".to_string();
                self.save_node(node)?;
                Ok((ActionResult::Ok, "Node status is ACTIVE.".to_string()))
            }
            Ok(false) => {
                let mut node = node;
                node.status = NodeStatus::Error;
                node.status_reason = "Check: node is not active".to_string();
                self.save_node(node)?;
                Ok((ActionResult::Error, "Node status is not ACTIVE.".to_string()))
            }
            Err(e) => Ok((ActionResult::Error, format!("Node check failed: {e}"))),
        }
    }

    async fn do_recover(&mut self, node: Node) -> Result<Outcome, EngineError> {
        let mut node = node;
        node.status = NodeStatus::Recovering;
        node.status_reason = "Recovery in progress".to_string();
        let node = self.save_node(node)?;

        match self.ctx.driver.recover(&node, &self.action.inputs).await {
            Ok(()) => {
                let mut node = node.clone();
                node.status = NodeStatus::Active;
                node.status_reason = "Recovery succeeded".to_string();
                self.save_node(node)?;
                Ok((ActionResult::Ok, "Node recovered successfully.".to_string()))
            }
            Err(e) => {
                let mut node = node.clone();
                node.status = NodeStatus::Error;
                node.status_reason = e.to_string();
                self.save_node(node)?;
                Ok((ActionResult::Error, format!("Node recover failed: {e}")))
            }
        }
    }

    async fn do_operation(&mut self, node: Node) -> Result<Outcome, EngineError> {
        let Some(operation) = self.action.input_str("operation").map(str::to_string) else {
            return Ok((
                ActionResult::Error,
                "Invalid input: no operation specified.".to_string(),
            ));
        };
        let params = match self.action.inputs.get("params").and_then(|v| v.as_object()) {
            Some(params) => params.clone(),
            None => serde_json::Map::new(),
        };

        match self.ctx.driver.operation(&node, &operation, &params).await {
            Ok(()) => Ok((
                ActionResult::Ok,
                format!("Node operation '{operation}' succeeded."),
            )),
            Err(e) => Ok((
                ActionResult::Error,
                format!("Node operation '{operation}' failed: {e}"),
            )),
        }
    }
}

#[cfg(test)]
#[path = "node_action_tests.rs"]
mod tests;
