// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test doubles and a harness for driving the engine in tests.

#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use crate::context::EngineContext;
use crate::dispatch::Dispatcher;
use crate::driver::{DriverError, DriverResult, ProfileDriver};
use crate::plugin::{PolicyPhase, PolicyPlugin, PolicyResult};
use async_trait::async_trait;
use muster_core::{
    Action, ActionId, ActionVerb, Clock, Cluster, ClusterId, EngineConfig, FakeClock, MemorySink,
    Node, NodeId, PolicyId, ProfileId,
};
use muster_store::{MemStore, Store};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Profile driver with programmable outcomes and a call log.
#[derive(Default)]
pub struct ScriptedDriver {
    calls: Mutex<Vec<String>>,
    fail_create: Mutex<HashSet<String>>,
    hang_create: Mutex<bool>,
    fail_every_create: Mutex<bool>,
    unhealthy: Mutex<HashSet<String>>,
    fail_recover: Mutex<bool>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record of driver invocations as `"<op> <node-name>"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(op)).count()
    }

    /// Fail creation of the node with this name.
    pub fn fail_create_for(&self, name: impl Into<String>) {
        self.fail_create.lock().insert(name.into());
    }

    pub fn fail_every_create(&self, fail: bool) {
        *self.fail_every_create.lock() = fail;
    }

    /// Make `create` block forever (stuck-children scenarios).
    pub fn hang_create(&self, hang: bool) {
        *self.hang_create.lock() = hang;
    }

    /// Make `check` report this node as unhealthy.
    pub fn mark_unhealthy(&self, name: impl Into<String>) {
        self.unhealthy.lock().insert(name.into());
    }

    pub fn fail_recover(&self, fail: bool) {
        *self.fail_recover.lock() = fail;
    }

    fn record(&self, op: &str, node: &Node) {
        self.calls.lock().push(format!("{op} {}", node.name));
    }
}

#[async_trait]
impl ProfileDriver for ScriptedDriver {
    async fn create(&self, node: &Node) -> DriverResult<String> {
        self.record("create", node);
        if *self.hang_create.lock() {
            std::future::pending::<()>().await;
        }
        if *self.fail_every_create.lock() || self.fail_create.lock().contains(&node.name) {
            return Err(DriverError::new(format!("boot failure on {}", node.name)));
        }
        Ok(format!("phys-{}", node.name))
    }

    async fn delete(&self, node: &Node) -> DriverResult<()> {
        self.record("delete", node);
        Ok(())
    }

    async fn update(&self, node: &Node, _new_profile: &str) -> DriverResult<()> {
        self.record("update", node);
        Ok(())
    }

    async fn check(&self, node: &Node) -> DriverResult<bool> {
        self.record("check", node);
        Ok(!self.unhealthy.lock().contains(&node.name))
    }

    async fn recover(
        &self,
        node: &Node,
        _params: &serde_json::Map<String, serde_json::Value>,
    ) -> DriverResult<()> {
        self.record("recover", node);
        if *self.fail_recover.lock() {
            return Err(DriverError::new(format!("recover failure on {}", node.name)));
        }
        self.unhealthy.lock().remove(&node.name);
        Ok(())
    }

    async fn join(&self, node: &Node, _cluster_id: ClusterId) -> DriverResult<()> {
        self.record("join", node);
        Ok(())
    }

    async fn leave(&self, node: &Node) -> DriverResult<()> {
        self.record("leave", node);
        Ok(())
    }

    async fn operation(
        &self,
        node: &Node,
        operation: &str,
        _params: &serde_json::Map<String, serde_json::Value>,
    ) -> DriverResult<()> {
        self.calls.lock().push(format!("operation:{operation} {}", node.name));
        Ok(())
    }
}

/// Policy plug-in that writes scripted data in `pre_op` and records every
/// hook invocation.
#[derive(Default)]
pub struct ScriptedPolicy {
    pub type_name: String,
    pub targets: Vec<(PolicyPhase, ActionVerb)>,
    pub pre_creation: Option<muster_core::Creation>,
    pub pre_deletion: Option<muster_core::Deletion>,
    pub fail_with: Option<String>,
    pub invocations: Mutex<Vec<(PolicyPhase, ActionVerb)>>,
}

impl ScriptedPolicy {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), ..Default::default() }
    }

    pub fn invocations(&self) -> Vec<(PolicyPhase, ActionVerb)> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl PolicyPlugin for ScriptedPolicy {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn targets(&self) -> Vec<(PolicyPhase, ActionVerb)> {
        self.targets.clone()
    }

    async fn pre_op(&self, _cluster_id: ClusterId, action: &mut Action) -> PolicyResult {
        self.invocations.lock().push((PolicyPhase::Before, action.verb));
        if let Some(reason) = &self.fail_with {
            action.data.fail_check(reason.clone());
            return Ok(());
        }
        if let Some(creation) = &self.pre_creation {
            action.data.creation = Some(creation.clone());
        }
        if let Some(deletion) = &self.pre_deletion {
            action.data.deletion = Some(deletion.clone());
        }
        Ok(())
    }

    async fn post_op(&self, _cluster_id: ClusterId, action: &mut Action) -> PolicyResult {
        self.invocations.lock().push((PolicyPhase::After, action.verb));
        Ok(())
    }
}

/// A fully wired engine over the in-memory store and a fake clock.
pub struct TestEngine {
    pub dispatcher: Dispatcher<FakeClock>,
    pub store: Arc<MemStore>,
    pub driver: Arc<ScriptedDriver>,
    pub sink: Arc<MemorySink>,
    pub clock: FakeClock,
}

pub struct TestEngineBuilder {
    config: EngineConfig,
    policies: Vec<(PolicyId, Arc<dyn PolicyPlugin>)>,
    store: Option<Arc<MemStore>>,
    clock: Option<FakeClock>,
}

impl TestEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a store (and clock) with another engine, for multi-engine
    /// recovery scenarios.
    pub fn shared(mut self, store: Arc<MemStore>, clock: FakeClock) -> Self {
        self.store = Some(store);
        self.clock = Some(clock);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn policy(mut self, id: PolicyId, plugin: Arc<dyn PolicyPlugin>) -> Self {
        self.policies.push((id, plugin));
        self
    }

    pub fn build(self) -> TestEngine {
        let store = self.store.unwrap_or_else(|| Arc::new(MemStore::new()));
        let driver = Arc::new(ScriptedDriver::new());
        let sink = Arc::new(MemorySink::new());
        let clock = self.clock.unwrap_or_default();
        let mut ctx = EngineContext::new(
            self.config,
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&sink) as Arc<dyn muster_core::EventSink>,
            Arc::clone(&driver) as Arc<dyn ProfileDriver>,
            clock.clone(),
        );
        for (id, plugin) in self.policies {
            ctx = ctx.register_policy(id, plugin);
        }
        let dispatcher = Dispatcher::new(Arc::new(ctx));
        TestEngine { dispatcher, store, driver, sink, clock }
    }
}

impl TestEngine {
    pub fn builder() -> TestEngineBuilder {
        TestEngineBuilder {
            config: EngineConfig { workers: 2, ..Default::default() },
            policies: Vec::new(),
            store: None,
            clock: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn ctx(&self) -> &Arc<EngineContext<FakeClock>> {
        self.dispatcher.context()
    }

    pub fn start(&self) {
        self.dispatcher.start();
    }

    /// Insert an ACTIVE cluster with the given sizing but no nodes.
    pub fn seed_cluster(&self, min_size: u32, desired: u32, max_size: i64) -> ClusterId {
        let now = self.clock.epoch_ms();
        let mut cluster =
            Cluster::new("test-cluster", ProfileId::from_string("prf-test"), desired, now);
        cluster.min_size = min_size;
        cluster.max_size = max_size;
        let id = cluster.id;
        self.store.cluster_create(cluster).unwrap();
        id
    }

    /// Insert an ACTIVE member node.
    pub fn seed_member(&self, cluster_id: ClusterId, name: &str) -> NodeId {
        let now = self.clock.epoch_ms();
        let index = self.store.next_index(cluster_id).unwrap();
        let mut node = Node::new(name, ProfileId::from_string("prf-test"), now)
            .cluster_id(Some(cluster_id))
            .index(index as i64);
        node.status = muster_core::NodeStatus::Active;
        node.physical_id = Some(format!("phys-{name}"));
        let id = self.store.node_create(node).unwrap();
        self.store.cluster_add_node(cluster_id, id).unwrap();
        id
    }

    /// Insert an ACTIVE unattached node.
    pub fn seed_free_node(&self, name: &str) -> NodeId {
        let now = self.clock.epoch_ms();
        let mut node = Node::new(name, ProfileId::from_string("prf-test"), now);
        node.status = muster_core::NodeStatus::Active;
        self.store.node_create(node).unwrap()
    }

    /// Poll (under the paused runtime) until the action is terminal.
    pub async fn wait_terminal(&self, id: ActionId) -> Action {
        for _ in 0..40_000 {
            let action = self.store.action_get(id).unwrap();
            if action.status.is_terminal() {
                return action;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("action {id} did not reach a terminal status");
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}
