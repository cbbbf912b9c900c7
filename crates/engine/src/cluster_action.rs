// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster action handler.
//!
//! Every CLUSTER_* verb runs under the cluster's exclusive lock. Verbs that
//! touch membership fan out derived NODE_* children, wait on them through
//! the dependency graph, and reconcile the cluster's status afterwards.

use crate::context::EngineContext;
use crate::dispatch::{sleep_interruptible, wait_for_dependents};
use crate::error::EngineError;
use crate::lock::LockManager;
use crate::plugin::{PolicyPhase, PolicyPlugin};
use crate::policy_check::policy_check;
use muster_core::scale::{check_size_params, nodes_by_random, parse_resize_params};
use muster_core::{
    Action, ActionData, ActionId, ActionResult, ActionStatus, ActionVerb, Cause, CheckStatus,
    Clock, Cluster, ClusterId, ClusterStatus, Creation, Deletion, Node, NodeId, NodeStatus,
    NotFound, PolicyBinding, PolicyId, PolicyLevel,
};
use muster_store::{LockScope, Store};

type Outcome = (ActionResult, String);

/// A derived child action waiting to be spawned.
struct ChildSpec {
    verb: ActionVerb,
    target: String,
    inputs: serde_json::Map<String, serde_json::Value>,
    data: Option<ActionData>,
}

impl ChildSpec {
    fn new(verb: ActionVerb, target: impl Into<String>) -> Self {
        Self { verb, target: target.into(), inputs: serde_json::Map::new(), data: None }
    }
}

pub struct ClusterAction<'a, C: Clock> {
    ctx: &'a EngineContext<C>,
    action: &'a mut Action,
}

impl<'a, C: Clock> ClusterAction<'a, C> {
    pub fn new(ctx: &'a EngineContext<C>, action: &'a mut Action) -> Self {
        Self { ctx, action }
    }

    pub async fn execute(&mut self) -> Result<Outcome, EngineError> {
        let cluster_id = ClusterId::from_string(&self.action.target);
        if self.ctx.store.cluster_get(cluster_id).is_err() {
            return Ok((ActionResult::Error, NotFound::cluster(cluster_id).to_string()));
        }

        let locks = LockManager::new(self.ctx);
        let forced = self.action.verb == ActionVerb::ClusterDelete;
        let locked = locks
            .cluster_lock_acquire(cluster_id, self.action.id, LockScope::Cluster, forced)
            .await;
        if !locked {
            return Ok((ActionResult::Retry, "Failed in locking cluster".to_string()));
        }

        let outcome = self.run_locked(cluster_id).await;
        locks.cluster_lock_release(cluster_id, self.action.id, LockScope::Cluster);
        outcome
    }

    async fn run_locked(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        policy_check(self.ctx, cluster_id, self.action, PolicyPhase::Before).await?;
        if self.action.data.status == CheckStatus::Error {
            return Ok((
                ActionResult::Error,
                format!("Policy check failure: {}", self.action.data.reason),
            ));
        }

        let (result, reason) = match self.action.verb {
            ActionVerb::ClusterCreate => self.do_create(cluster_id).await?,
            ActionVerb::ClusterDelete => self.do_delete(cluster_id).await?,
            ActionVerb::ClusterUpdate => self.do_update(cluster_id).await?,
            ActionVerb::ClusterResize => self.do_resize(cluster_id).await?,
            ActionVerb::ClusterScaleOut => self.do_scale_out(cluster_id).await?,
            ActionVerb::ClusterScaleIn => self.do_scale_in(cluster_id).await?,
            ActionVerb::ClusterAddNodes => self.do_add_nodes(cluster_id).await?,
            ActionVerb::ClusterDelNodes => self.do_del_nodes(cluster_id).await?,
            ActionVerb::ClusterReplaceNodes => self.do_replace_nodes(cluster_id).await?,
            ActionVerb::ClusterCheck => self.do_check(cluster_id).await?,
            ActionVerb::ClusterRecover => self.do_recover(cluster_id).await?,
            ActionVerb::ClusterOperation => self.do_operation(cluster_id).await?,
            ActionVerb::ClusterAttachPolicy => self.do_attach_policy(cluster_id).await?,
            ActionVerb::ClusterDetachPolicy => self.do_detach_policy(cluster_id).await?,
            ActionVerb::ClusterUpdatePolicy => self.do_update_policy(cluster_id).await?,
            verb => (ActionResult::Error, format!("Unsupported action: {verb}")),
        };

        if result == ActionResult::Ok {
            policy_check(self.ctx, cluster_id, self.action, PolicyPhase::After).await?;
            if self.action.data.status == CheckStatus::Error {
                return Ok((
                    ActionResult::Error,
                    format!("Policy check failure: {}", self.action.data.reason),
                ));
            }
        }
        Ok((result, reason))
    }

    // === Verb handlers ===

    async fn do_create(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let cluster = self.ctx.store.cluster_get(cluster_id)?;
        let count = cluster.desired_capacity;
        self.set_cluster_status(cluster_id, ClusterStatus::Creating, "Cluster creation in progress")?;

        let (result, reason) = self.create_nodes(&cluster, count).await?;
        match result {
            ActionResult::Ok => {
                eval_status(self.ctx, cluster_id, ActionVerb::ClusterCreate, None, true).await?;
                Ok((ActionResult::Ok, "Cluster creation succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterCreate, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_delete(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        self.set_cluster_status(cluster_id, ClusterStatus::Deleting, "Cluster deletion in progress")?;

        let members: Vec<NodeId> =
            self.ctx.store.nodes_by_cluster(cluster_id)?.iter().map(|n| n.id).collect();
        if self.action.data.deletion.is_none() {
            self.action.data.deletion =
                Some(Deletion { count: members.len() as u32, ..Default::default() });
            self.persist_action();
        }

        let (result, reason) = self.delete_nodes(cluster_id, &members).await?;
        match result {
            ActionResult::Ok => {
                self.ctx.store.cluster_delete(cluster_id)?;
                Ok((ActionResult::Ok, "Cluster deletion succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterDelete, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_update(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let mut cluster = self.ctx.store.cluster_get(cluster_id)?;

        if let Some(name) = self.action.input_str("name") {
            cluster.name = name.to_string();
        }
        if let Some(metadata) = self.action.inputs.get("metadata").and_then(|v| v.as_object()) {
            for (k, v) in metadata {
                cluster.data.insert(k.clone(), v.clone());
            }
        }
        if let Some(timeout) = self.action.input_u64("timeout") {
            self.action.timeout_secs = timeout;
            self.persist_action();
        }
        cluster.status = ClusterStatus::Updating;
        cluster.status_reason = "Cluster update in progress".to_string();
        self.save_cluster(cluster.clone())?;

        let Some(new_profile) = self.action.input_str("profile_id").map(str::to_string) else {
            eval_status(self.ctx, cluster_id, ActionVerb::ClusterUpdate, None, false).await?;
            return Ok((ActionResult::Ok, "Cluster update succeeded.".to_string()));
        };

        let profile_only = self.action.input_bool("profile_only").unwrap_or(false);
        let members = self.ctx.store.nodes_by_cluster(cluster_id)?;
        // Fast path: nothing to roll when profile_only or the cluster is empty.
        if profile_only || members.is_empty() {
            cluster.profile_id = new_profile.as_str().into();
            self.save_cluster(cluster)?;
            eval_status(self.ctx, cluster_id, ActionVerb::ClusterUpdate, None, false).await?;
            return Ok((ActionResult::Ok, "Cluster update succeeded.".to_string()));
        }

        let (result, reason) = self.update_nodes(&new_profile, &members).await?;
        match result {
            ActionResult::Ok => {
                let mut cluster = self.ctx.store.cluster_get(cluster_id)?;
                cluster.profile_id = new_profile.as_str().into();
                self.save_cluster(cluster)?;
                eval_status(self.ctx, cluster_id, ActionVerb::ClusterUpdate, None, false).await?;
                Ok((ActionResult::Ok, "Cluster update succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterUpdate, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_resize(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let mut cluster = self.ctx.store.cluster_get(cluster_id)?;
        let current = self.ctx.store.count_by_cluster(cluster_id)? as i64;

        // A scaling policy may have decided the delta already; otherwise
        // parse and validate the caller's adjustment.
        let mut victims = Vec::new();
        let (creation, deletion, desired) = if let Some(c) = self.action.data.creation.clone() {
            (c.count, 0, (current + c.count as i64).max(0) as u32)
        } else if let Some(d) = self.action.data.deletion.clone() {
            victims = d.candidates.clone();
            (0, d.count, (current - d.count as i64).max(0) as u32)
        } else {
            let plan = match parse_resize_params(&self.action.inputs, &cluster) {
                Ok(plan) => plan,
                Err(msg) => return Ok((ActionResult::Error, msg)),
            };
            if let Some(min) = plan.min_size {
                cluster.min_size = min;
            }
            if let Some(max) = plan.max_size {
                cluster.max_size = max;
            }
            (plan.creation_count, plan.deletion_count, plan.desired)
        };

        cluster.status = ClusterStatus::Resizing;
        cluster.status_reason = "Cluster resize in progress".to_string();
        self.save_cluster(cluster.clone())?;

        let (result, reason) = if creation > 0 {
            self.action.data.creation =
                Some(Creation { count: creation, ..self.action.data.creation.clone().unwrap_or_default() });
            self.persist_action();
            self.create_nodes(&cluster, creation).await?
        } else if deletion > 0 {
            let candidates = if victims.is_empty() {
                self.pick_victims(cluster_id, deletion as usize)?
            } else {
                victims
            };
            self.delete_nodes(cluster_id, &candidates).await?
        } else {
            (ActionResult::Ok, String::new())
        };

        match result {
            ActionResult::Ok => {
                eval_status(self.ctx, cluster_id, ActionVerb::ClusterResize, Some(desired), false)
                    .await?;
                Ok((ActionResult::Ok, "Cluster resize succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterResize, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_scale_out(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let cluster = self.ctx.store.cluster_get(cluster_id)?;
        let count = match self.action.data.creation.as_ref() {
            Some(c) => c.count,
            None => {
                let count = self.action.input_u64("count").unwrap_or(1) as u32;
                self.action.data.creation = Some(Creation { count, ..Default::default() });
                self.persist_action();
                count
            }
        };
        if count == 0 {
            return Ok((ActionResult::Error, "Invalid count (0) for scaling out.".to_string()));
        }

        let current = self.ctx.store.count_by_cluster(cluster_id)? as i64;
        let desired = current + count as i64;
        if desired > self.ctx.config.max_nodes_per_cluster as i64 {
            return Ok((ActionResult::Error, format!(
                "The target capacity ({desired}) is greater than the maximum number of nodes \
                 allowed per cluster ({}).",
                self.ctx.config.max_nodes_per_cluster
            )));
        }
        if let Some(msg) = check_size_params(&cluster, Some(desired), None, None, true) {
            return Ok((ActionResult::Error, msg));
        }

        self.set_cluster_status(cluster_id, ClusterStatus::Resizing, "Cluster scale-out in progress")?;
        let (result, reason) = self.create_nodes(&cluster, count).await?;
        match result {
            ActionResult::Ok => {
                eval_status(
                    self.ctx,
                    cluster_id,
                    ActionVerb::ClusterScaleOut,
                    Some(desired as u32),
                    false,
                )
                .await?;
                Ok((ActionResult::Ok, "Cluster scaling succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterScaleOut, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_scale_in(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let cluster = self.ctx.store.cluster_get(cluster_id)?;
        let deletion = self.action.data.deletion.clone();
        let (mut count, mut candidates, grace) = match deletion {
            Some(d) => (d.count as i64, d.candidates, d.grace_period),
            None => (self.action.input_u64("count").unwrap_or(1) as i64, Vec::new(), 0),
        };
        if count == 0 {
            return Ok((ActionResult::Error, "Invalid count (0) for scaling in.".to_string()));
        }

        let best_effort = self.action.input_bool("best_effort").unwrap_or(false);
        let current = self.ctx.store.count_by_cluster(cluster_id)? as i64;
        if best_effort {
            count = count.min(current - cluster.min_size as i64).max(0);
        }
        let desired = current - count;
        if let Some(msg) = check_size_params(&cluster, Some(desired), None, None, true) {
            return Ok((ActionResult::Error, msg));
        }
        if count == 0 {
            return Ok((ActionResult::Ok, "No nodes to remove.".to_string()));
        }

        if grace > 0 {
            if let Some(outcome) = sleep_interruptible(self.ctx, self.action, grace).await {
                return Ok(outcome);
            }
        }

        if candidates.is_empty() {
            candidates = self.pick_victims(cluster_id, count as usize)?;
        }
        candidates.truncate(count as usize);

        self.set_cluster_status(cluster_id, ClusterStatus::Resizing, "Cluster scale-in in progress")?;
        let (result, reason) = self.delete_nodes(cluster_id, &candidates).await?;
        match result {
            ActionResult::Ok => {
                let reduce = self
                    .action
                    .data
                    .deletion
                    .as_ref()
                    .map(|d| d.reduce_desired_capacity)
                    .unwrap_or(true);
                let new_desired = reduce.then_some(desired.max(0) as u32);
                eval_status(self.ctx, cluster_id, ActionVerb::ClusterScaleIn, new_desired, false)
                    .await?;
                Ok((ActionResult::Ok, "Cluster scaling succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterScaleIn, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_add_nodes(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let cluster = self.ctx.store.cluster_get(cluster_id)?;
        let ids = self.input_node_ids("nodes");
        if ids.is_empty() {
            return Ok((ActionResult::Error, "No nodes specified.".to_string()));
        }

        for id in &ids {
            let node = match self.ctx.store.node_get(*id) {
                Ok(node) => node,
                Err(_) => return Ok((ActionResult::Error, NotFound::node(*id).to_string())),
            };
            if let Some(owner) = node.cluster_id {
                return Ok((ActionResult::Error, format!(
                    "Node '{id}' is already owned by cluster '{owner}'."
                )));
            }
            if node.status != NodeStatus::Active {
                return Ok((
                    ActionResult::Error,
                    format!("Node '{id}' is not in ACTIVE status."),
                ));
            }
        }

        let current = self.ctx.store.count_by_cluster(cluster_id)? as i64;
        let desired = current + ids.len() as i64;
        if let Some(msg) = check_size_params(&cluster, Some(desired), None, None, true) {
            return Ok((ActionResult::Error, msg));
        }

        let specs = ids
            .iter()
            .map(|id| {
                let mut spec = ChildSpec::new(ActionVerb::NodeJoin, id.as_str());
                spec.inputs.insert("cluster_id".into(), serde_json::json!(cluster_id.as_str()));
                spec
            })
            .collect();
        let (result, reason) = self.spawn_and_wait(specs, 0, 0).await?;
        match result {
            ActionResult::Ok => {
                self.record_output("nodes_added", &ids);
                eval_status(
                    self.ctx,
                    cluster_id,
                    ActionVerb::ClusterAddNodes,
                    Some(desired as u32),
                    false,
                )
                .await?;
                Ok((ActionResult::Ok, "Cluster node addition succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterAddNodes, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_del_nodes(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let ids = self.input_node_ids("nodes");
        if ids.is_empty() {
            return Ok((ActionResult::Error, "No nodes specified.".to_string()));
        }
        for id in &ids {
            let node = match self.ctx.store.node_get(*id) {
                Ok(node) => node,
                Err(_) => return Ok((ActionResult::Error, NotFound::node(*id).to_string())),
            };
            if node.cluster_id != Some(cluster_id) {
                return Ok((
                    ActionResult::Error,
                    format!("Node '{id}' is not a member of the cluster."),
                ));
            }
        }

        let grace = self.action.data.deletion.as_ref().map(|d| d.grace_period).unwrap_or(0);
        if grace > 0 {
            if let Some(outcome) = sleep_interruptible(self.ctx, self.action, grace).await {
                return Ok(outcome);
            }
        }

        let current = self.ctx.store.count_by_cluster(cluster_id)? as i64;
        let (result, reason) = self.delete_nodes(cluster_id, &ids).await?;
        match result {
            ActionResult::Ok => {
                let reduce = self
                    .action
                    .data
                    .deletion
                    .as_ref()
                    .map(|d| d.reduce_desired_capacity)
                    .unwrap_or(true);
                let desired = (current - ids.len() as i64).max(0) as u32;
                let new_desired = reduce.then_some(desired);
                eval_status(self.ctx, cluster_id, ActionVerb::ClusterDelNodes, new_desired, false)
                    .await?;
                Ok((ActionResult::Ok, "Cluster node removal succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterDelNodes, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_replace_nodes(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let Some(pairs) = self.action.inputs.get("candidates").and_then(|v| v.as_object()).cloned()
        else {
            return Ok((ActionResult::Error, "No candidates specified.".to_string()));
        };
        if pairs.is_empty() {
            return Ok((ActionResult::Error, "No candidates specified.".to_string()));
        }

        for (old, new) in &pairs {
            let old_id = NodeId::from_string(old);
            let old_node = match self.ctx.store.node_get(old_id) {
                Ok(node) => node,
                Err(_) => return Ok((ActionResult::Error, NotFound::node(old_id).to_string())),
            };
            if old_node.cluster_id != Some(cluster_id) {
                return Ok((
                    ActionResult::Error,
                    format!("Node '{old_id}' is not a member of the cluster."),
                ));
            }
            let new_id = NodeId::from_string(new.as_str().unwrap_or_default());
            let new_node = match self.ctx.store.node_get(new_id) {
                Ok(node) => node,
                Err(_) => return Ok((ActionResult::Error, NotFound::node(new_id).to_string())),
            };
            if new_node.cluster_id.is_some() {
                return Ok((
                    ActionResult::Error,
                    format!("Node '{new_id}' is already owned by a cluster."),
                ));
            }
            if new_node.status != NodeStatus::Active {
                return Ok((
                    ActionResult::Error,
                    format!("Node '{new_id}' is not in ACTIVE status."),
                ));
            }
        }

        // Per pair: the JOIN of the replacement depends on the LEAVE of the
        // departing node.
        let now = self.ctx.clock.epoch_ms();
        let mut child_ids = Vec::new();
        let mut leave_ids = Vec::new();
        for (old, new) in &pairs {
            let leave = Action::new(ActionVerb::NodeLeave, old.clone(), now)
                .cause(Cause::DerivedAction)
                .timeout_secs(self.action.timeout_secs)
                .status(ActionStatus::Init);
            let leave_id = self.ctx.store.action_create(leave)?;

            let mut inputs = serde_json::Map::new();
            inputs.insert("cluster_id".into(), serde_json::json!(cluster_id.as_str()));
            let join = Action::new(
                ActionVerb::NodeJoin,
                new.as_str().unwrap_or_default(),
                now,
            )
            .cause(Cause::DerivedAction)
            .inputs(inputs)
            .timeout_secs(self.action.timeout_secs)
            .status(ActionStatus::Init);
            let join_id = self.ctx.store.action_create(join)?;

            self.ctx.store.dependency_add(&[leave_id], join_id)?;
            child_ids.push(leave_id);
            child_ids.push(join_id);
            leave_ids.push(leave_id);
        }
        self.ctx.store.dependency_add(&child_ids, self.action.id)?;
        for leave_id in leave_ids {
            self.ctx.store.action_mark_ready(leave_id)?;
        }
        self.ctx.new_action.notify_waiters();

        let (result, reason) = wait_for_dependents(self.ctx, self.action).await;
        match result {
            ActionResult::Ok => {
                eval_status(self.ctx, cluster_id, ActionVerb::ClusterReplaceNodes, None, false)
                    .await?;
                Ok((ActionResult::Ok, "Cluster node replacement succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterReplaceNodes, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_check(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let members = self.ctx.store.nodes_by_cluster(cluster_id)?;
        let specs =
            members.iter().map(|n| ChildSpec::new(ActionVerb::NodeCheck, n.id.as_str())).collect();
        let (result, reason) = self.spawn_and_wait(specs, 0, 0).await?;

        // The point of a check is the reconciliation, even when members
        // turned out unhealthy.
        eval_status(self.ctx, cluster_id, ActionVerb::ClusterCheck, None, false).await?;
        match result {
            ActionResult::Ok => Ok((ActionResult::Ok, "Cluster checking succeeded.".to_string())),
            other => Ok((other, reason)),
        }
    }

    async fn do_recover(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let members = self.ctx.store.nodes_by_cluster(cluster_id)?;
        let recover_inputs = self
            .action
            .data
            .health
            .as_ref()
            .map(|h| h.recover_action.clone())
            .unwrap_or_default();
        let fencing = self.action.data.health.as_ref().map(|h| h.fencing.clone());

        let specs: Vec<ChildSpec> = members
            .iter()
            .filter(|n| n.status != NodeStatus::Active)
            .map(|n| {
                let mut spec = ChildSpec::new(ActionVerb::NodeRecover, n.id.as_str());
                spec.inputs = recover_inputs.clone();
                if let Some(fencing) = &fencing {
                    if !fencing.is_empty() {
                        spec.inputs.insert("fencing".into(), serde_json::json!(fencing));
                    }
                }
                spec
            })
            .collect();

        let (result, reason) = self.spawn_and_wait(specs, 0, 0).await?;
        match result {
            ActionResult::Ok => {
                eval_status(self.ctx, cluster_id, ActionVerb::ClusterRecover, None, false).await?;
                Ok((ActionResult::Ok, "Cluster recovery succeeded.".to_string()))
            }
            other => {
                self.reconcile_failure(cluster_id, ActionVerb::ClusterRecover, other, &reason)?;
                Ok((other, reason))
            }
        }
    }

    async fn do_operation(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let Some(operation) = self.action.input_str("operation").map(str::to_string) else {
            return Ok((ActionResult::Error, "No operation specified.".to_string()));
        };
        let params = self
            .action
            .inputs
            .get("params")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let targets = {
            let listed = self.input_node_ids("nodes");
            if listed.is_empty() {
                self.ctx.store.nodes_by_cluster(cluster_id)?.iter().map(|n| n.id).collect()
            } else {
                for id in &listed {
                    let member = self
                        .ctx
                        .store
                        .node_get(*id)
                        .map(|n| n.cluster_id == Some(cluster_id))
                        .unwrap_or(false);
                    if !member {
                        return Ok((
                            ActionResult::Error,
                            format!("Node '{id}' is not a member of the cluster."),
                        ));
                    }
                }
                listed
            }
        };

        let specs = targets
            .iter()
            .map(|id| {
                let mut spec = ChildSpec::new(ActionVerb::NodeOperation, id.as_str());
                spec.inputs.insert("operation".into(), serde_json::json!(operation));
                spec.inputs.insert("params".into(), serde_json::Value::Object(params.clone()));
                spec
            })
            .collect();
        let (result, reason) = self.spawn_and_wait(specs, 0, 0).await?;
        match result {
            ActionResult::Ok => Ok((
                ActionResult::Ok,
                format!("Cluster operation '{operation}' succeeded."),
            )),
            other => Ok((other, reason)),
        }
    }

    // === Policy binding verbs (no children) ===

    async fn do_attach_policy(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let Some(policy_id) = self.action.input_str("policy_id").map(PolicyId::from_string) else {
            return Ok((ActionResult::Error, "Policy not specified.".to_string()));
        };
        let Some(plugin) = self.ctx.policy(&policy_id) else {
            return Ok((ActionResult::Error, NotFound::policy(policy_id).to_string()));
        };

        if self.ctx.store.binding_get(cluster_id, policy_id).is_ok() {
            return Ok((ActionResult::Ok, "Policy already attached.".to_string()));
        }

        let mut binding = PolicyBinding::new(cluster_id, policy_id, plugin.type_name())
            .priority(
                self.action.input_u64("priority").map(|p| p as u32)
                    .unwrap_or_else(|| plugin.default_priority()),
            )
            .cooldown_secs(
                self.action.input_u64("cooldown").unwrap_or_else(|| plugin.default_cooldown()),
            )
            .enabled(self.action.input_bool("enabled").unwrap_or(true));
        if let Some(level) = self.action.input_str("level").and_then(parse_level) {
            binding = binding.level(level);
        }

        // Duplicate-type conflicts surface here with the store's message.
        match self.ctx.store.binding_create(binding) {
            Ok(()) => Ok((ActionResult::Ok, "Policy attached.".to_string())),
            Err(e) => Ok((ActionResult::Error, e.to_string())),
        }
    }

    async fn do_detach_policy(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let Some(policy_id) = self.action.input_str("policy_id").map(PolicyId::from_string) else {
            return Ok((ActionResult::Error, "Policy not specified.".to_string()));
        };
        match self.ctx.store.binding_delete(cluster_id, policy_id) {
            Ok(()) => Ok((ActionResult::Ok, "Policy detached.".to_string())),
            Err(e) => Ok((ActionResult::Error, e.to_string())),
        }
    }

    async fn do_update_policy(&mut self, cluster_id: ClusterId) -> Result<Outcome, EngineError> {
        let Some(policy_id) = self.action.input_str("policy_id").map(PolicyId::from_string) else {
            return Ok((ActionResult::Error, "Policy not specified.".to_string()));
        };
        let mut binding = match self.ctx.store.binding_get(cluster_id, policy_id) {
            Ok(binding) => binding,
            Err(e) => return Ok((ActionResult::Error, e.to_string())),
        };

        if let Some(enabled) = self.action.input_bool("enabled") {
            binding.enabled = enabled;
        }
        if let Some(priority) = self.action.input_u64("priority") {
            binding.priority = priority as u32;
        }
        if let Some(cooldown) = self.action.input_u64("cooldown") {
            binding.cooldown_secs = cooldown;
        }
        if let Some(level) = self.action.input_str("level").and_then(parse_level) {
            binding.level = level;
        }
        self.ctx.store.binding_update(binding)?;
        Ok((ActionResult::Ok, "Policy updated.".to_string()))
    }

    // === Fan-out helpers ===

    /// Create `count` member nodes and run a NODE_CREATE child for each.
    async fn create_nodes(
        &mut self,
        cluster: &Cluster,
        count: u32,
    ) -> Result<Outcome, EngineError> {
        if count == 0 {
            return Ok((ActionResult::Ok, String::new()));
        }

        let current = self.ctx.store.count_by_cluster(cluster.id)? as i64;
        let cap = self.ctx.config.max_nodes_per_cluster;
        if current + count as i64 > cap as i64 {
            return Ok((ActionResult::Error, format!(
                "The target capacity ({}) is greater than the maximum number of nodes allowed \
                 per cluster ({cap}).",
                current + count as i64
            )));
        }

        let now = self.ctx.clock.epoch_ms();
        let mut node_ids = Vec::with_capacity(count as usize);
        let mut specs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let index = self.ctx.store.next_index(cluster.id)?;
            let name = cluster.format_node_name(index);
            let node = Node::new(name, cluster.profile_id, now)
                .cluster_id(Some(cluster.id))
                .index(index as i64);
            let node_id = self.ctx.store.node_create(node)?;
            self.ctx.store.cluster_add_node(cluster.id, node_id)?;
            node_ids.push(node_id);
            specs.push(ChildSpec::new(ActionVerb::NodeCreate, node_id.as_str()));
        }

        let batch = self.ctx.config.max_actions_per_batch;
        let pause = self.ctx.config.batch_interval;
        let (result, reason) = self.spawn_and_wait(specs, batch, pause).await?;
        if result == ActionResult::Ok {
            let creation = self.action.data.creation.get_or_insert_with(Default::default);
            creation.nodes.extend(node_ids.iter().copied());
            self.record_output("nodes_added", &node_ids);
        }
        Ok((result, reason))
    }

    /// Run a NODE_DELETE (or NODE_LEAVE) child for each victim.
    async fn delete_nodes(
        &mut self,
        cluster_id: ClusterId,
        ids: &[NodeId],
    ) -> Result<Outcome, EngineError> {
        if ids.is_empty() {
            return Ok((ActionResult::Ok, String::new()));
        }
        let deletion = self.action.data.deletion.clone().unwrap_or_default();
        let verb =
            if deletion.destroy_after_deletion { ActionVerb::NodeDelete } else { ActionVerb::NodeLeave };

        let specs = ids
            .iter()
            .map(|id| {
                let mut spec = ChildSpec::new(verb, id.as_str());
                spec.data =
                    Some(ActionData { deletion: Some(deletion.clone()), ..Default::default() });
                spec
            })
            .collect();

        let batch = if deletion.batch_size > 0 {
            deletion.batch_size
        } else {
            self.ctx.config.max_actions_per_batch
        };
        let pause = if deletion.pause_time > 0 { deletion.pause_time } else { self.ctx.config.batch_interval };

        let (result, reason) = self.spawn_and_wait(specs, batch, pause).await?;
        if result == ActionResult::Ok {
            for id in ids {
                self.ctx.store.cluster_remove_node(cluster_id, *id)?;
            }
            self.record_output("nodes_removed", ids);
        }
        Ok((result, reason))
    }

    /// Roll members onto a new profile, batched when a policy wrote a plan.
    async fn update_nodes(
        &mut self,
        new_profile: &str,
        members: &[Node],
    ) -> Result<Outcome, EngineError> {
        let plan = self.action.data.update.clone();
        let batches: Vec<Vec<NodeId>> = match plan {
            Some(u) if !u.plan.is_empty() => u.plan,
            _ => vec![members.iter().map(|n| n.id).collect()],
        };
        let pause = self.action.data.update.as_ref().map(|u| u.pause_time).unwrap_or(0);

        for (i, batch) in batches.iter().enumerate() {
            if i > 0 && pause > 0 {
                if let Some(outcome) = sleep_interruptible(self.ctx, self.action, pause).await {
                    return Ok(outcome);
                }
            }
            let specs = batch
                .iter()
                .map(|id| {
                    let mut spec = ChildSpec::new(ActionVerb::NodeUpdate, id.as_str());
                    spec.inputs.insert("new_profile_id".into(), serde_json::json!(new_profile));
                    spec
                })
                .collect();
            let (result, reason) = self.spawn_and_wait(specs, 0, 0).await?;
            if result != ActionResult::Ok {
                return Ok((result, reason));
            }
        }
        Ok((ActionResult::Ok, String::new()))
    }

    /// Create the children, wire them under this action, dispatch them in
    /// waves, and wait for all of them.
    ///
    /// No further wave is enqueued once a dispatched child has failed; the
    /// never-dispatched remainder is cancelled.
    async fn spawn_and_wait(
        &mut self,
        specs: Vec<ChildSpec>,
        batch_size: usize,
        pause: u64,
    ) -> Result<Outcome, EngineError> {
        if specs.is_empty() {
            return Ok((ActionResult::Ok, String::new()));
        }

        let now = self.ctx.clock.epoch_ms();
        let mut child_ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut child = Action::new(spec.verb, spec.target, now)
                .cause(Cause::DerivedAction)
                .inputs(spec.inputs)
                .timeout_secs(self.action.timeout_secs)
                .status(ActionStatus::Init);
            if let Some(data) = spec.data {
                child.data = data;
            }
            child_ids.push(self.ctx.store.action_create(child)?);
        }
        self.ctx.store.dependency_add(&child_ids, self.action.id)?;

        let wave_size = if batch_size == 0 { child_ids.len() } else { batch_size };
        let mut dispatched = 0usize;
        for (wave_no, wave) in child_ids.chunks(wave_size.max(1)).enumerate() {
            if wave_no > 0 {
                if pause > 0 {
                    if let Some(outcome) = sleep_interruptible(self.ctx, self.action, pause).await {
                        self.cancel_pending(&child_ids[dispatched..])?;
                        return Ok(outcome);
                    }
                }
                if self.any_failed(&child_ids[..dispatched])? {
                    self.cancel_pending(&child_ids[dispatched..])?;
                    break;
                }
            }
            for id in wave {
                self.ctx.store.action_mark_ready(*id)?;
            }
            dispatched += wave.len();
            self.ctx.new_action.notify_waiters();
        }

        Ok(wait_for_dependents(self.ctx, self.action).await)
    }

    fn any_failed(&self, ids: &[ActionId]) -> Result<bool, EngineError> {
        for id in ids {
            let status = self.ctx.store.action_get(*id)?.status;
            if matches!(status, ActionStatus::Failed | ActionStatus::Cancelled) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn cancel_pending(&self, ids: &[ActionId]) -> Result<(), EngineError> {
        let now = self.ctx.clock.epoch_ms();
        for id in ids {
            let status = self.ctx.store.action_get(*id)?.status;
            if status == ActionStatus::Init {
                self.ctx.store.action_mark_cancelled(*id, now)?;
            }
        }
        self.ctx.completions.notify_waiters();
        Ok(())
    }

    // === Small helpers ===

    fn input_node_ids(&self, key: &str) -> Vec<NodeId> {
        self.action
            .inputs
            .get(key)
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str())
                    .map(NodeId::from_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn pick_victims(&self, cluster_id: ClusterId, count: usize) -> Result<Vec<NodeId>, EngineError> {
        let members = self.ctx.store.nodes_by_cluster(cluster_id)?;
        Ok(nodes_by_random(&members, count))
    }

    fn record_output(&mut self, key: &str, ids: &[NodeId]) {
        let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        self.action.outputs.insert(key.to_string(), serde_json::json!(ids));
        self.persist_action();
    }

    fn persist_action(&self) {
        if let Err(e) = self.ctx.store.action_update(self.action.clone()) {
            tracing::error!(action_id = %self.action.id, error = %e, "failed to persist action");
        }
    }

    fn save_cluster(&self, mut cluster: Cluster) -> Result<(), EngineError> {
        cluster.updated_at = Some(self.ctx.clock.epoch_ms());
        self.ctx.store.cluster_update(cluster)?;
        Ok(())
    }

    fn set_cluster_status(
        &self,
        cluster_id: ClusterId,
        status: ClusterStatus,
        reason: &str,
    ) -> Result<(), EngineError> {
        let mut cluster = self.ctx.store.cluster_get(cluster_id)?;
        cluster.status = status;
        cluster.status_reason = reason.to_string();
        self.save_cluster(cluster)
    }

    /// On TIMEOUT/CANCEL/ERROR, leave the cluster in ERROR with a reason
    /// describing what went wrong; orphaned children are tolerated.
    fn reconcile_failure(
        &self,
        cluster_id: ClusterId,
        verb: ActionVerb,
        result: ActionResult,
        reason: &str,
    ) -> Result<(), EngineError> {
        if result == ActionResult::Retry {
            return Ok(());
        }
        let phrase = verb_phrase(verb);
        let reason = match result {
            ActionResult::Timeout => format!("Cluster {phrase} timeout"),
            ActionResult::Cancel => format!("Cluster {phrase} cancelled"),
            _ => {
                if reason.is_empty() {
                    format!("Cluster {phrase} failed")
                } else {
                    reason.to_string()
                }
            }
        };
        // The cluster may already be gone (deletion path).
        if self.ctx.store.cluster_get(cluster_id).is_ok() {
            self.set_cluster_status(cluster_id, ClusterStatus::Error, &reason)?;
        }
        Ok(())
    }
}

/// Reconcile and persist a cluster's status after a membership- or
/// profile-changing action, from observed node statuses and sizing.
pub(crate) async fn eval_status<C: Clock>(
    ctx: &EngineContext<C>,
    cluster_id: ClusterId,
    verb: ActionVerb,
    new_desired: Option<u32>,
    stamp_created: bool,
) -> Result<(), EngineError> {
    let Ok(mut cluster) = ctx.store.cluster_get(cluster_id) else {
        return Ok(());
    };
    if let Some(desired) = new_desired {
        cluster.desired_capacity = desired;
    }

    let nodes = ctx.store.nodes_by_cluster(cluster_id)?;
    let active = nodes.iter().filter(|n| n.status == NodeStatus::Active).count();
    let phrase = verb_phrase(verb);
    if active == cluster.desired_capacity as usize {
        cluster.status = ClusterStatus::Active;
        cluster.status_reason = format!("Cluster {phrase} succeeded");
    } else {
        cluster.status = ClusterStatus::Warning;
        cluster.status_reason = format!(
            "Cluster {phrase} done: {active} of {} node(s) ACTIVE",
            cluster.desired_capacity
        );
    }

    let now = ctx.clock.epoch_ms();
    cluster.updated_at = Some(now);
    if stamp_created {
        cluster.created_at = Some(now);
    }
    ctx.store.cluster_update(cluster)?;
    Ok(())
}

fn parse_level(s: &str) -> Option<PolicyLevel> {
    match s {
        "MIGHT" => Some(PolicyLevel::Might),
        "WOULD" => Some(PolicyLevel::Would),
        "SHOULD" => Some(PolicyLevel::Should),
        "MUST" => Some(PolicyLevel::Must),
        _ => None,
    }
}

fn verb_phrase(verb: ActionVerb) -> &'static str {
    match verb {
        ActionVerb::ClusterCreate => "creation",
        ActionVerb::ClusterDelete => "deletion",
        ActionVerb::ClusterUpdate => "update",
        ActionVerb::ClusterResize => "resize",
        ActionVerb::ClusterScaleOut | ActionVerb::ClusterScaleIn => "scaling",
        ActionVerb::ClusterAddNodes => "node addition",
        ActionVerb::ClusterDelNodes => "node removal",
        ActionVerb::ClusterReplaceNodes => "node replacement",
        ActionVerb::ClusterCheck => "check",
        ActionVerb::ClusterRecover => "recovery",
        ActionVerb::ClusterOperation => "operation",
        ActionVerb::NodeCreate => "node creation",
        ActionVerb::NodeDelete => "node deletion",
        _ => "operation",
    }
}

#[cfg(test)]
#[path = "cluster_action_tests.rs"]
mod tests;
