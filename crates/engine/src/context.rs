// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine context: explicit dependencies threaded through every component.

use crate::driver::ProfileDriver;
use crate::plugin::PolicyPlugin;
use muster_core::{Clock, EngineConfig, EventSink, PolicyId, ServiceId};
use muster_store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared state for one engine instance.
///
/// Generic over the clock so tests drive virtual time; everything else is a
/// trait object behind `Arc`.
pub struct EngineContext<C: Clock> {
    pub config: EngineConfig,
    pub store: Arc<dyn Store>,
    pub events: Arc<dyn EventSink>,
    pub driver: Arc<dyn ProfileDriver>,
    /// Registered policy plug-ins, looked up by the binding's policy id.
    pub policies: HashMap<PolicyId, Arc<dyn PolicyPlugin>>,
    pub clock: C,
    /// This engine instance's identity (claim owner, heartbeat key).
    pub engine_id: ServiceId,
    /// Woken whenever an action becomes READY.
    pub new_action: Notify,
    /// Woken whenever any action reaches terminal status.
    pub completions: Notify,
}

impl<C: Clock> EngineContext<C> {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        events: Arc<dyn EventSink>,
        driver: Arc<dyn ProfileDriver>,
        clock: C,
    ) -> Self {
        Self {
            config,
            store,
            events,
            driver,
            policies: HashMap::new(),
            clock,
            engine_id: ServiceId::new(),
            new_action: Notify::new(),
            completions: Notify::new(),
        }
    }

    /// Register a policy plug-in under the given policy id.
    pub fn register_policy(mut self, id: PolicyId, plugin: Arc<dyn PolicyPlugin>) -> Self {
        self.policies.insert(id, plugin);
        self
    }

    pub fn policy(&self, id: &PolicyId) -> Option<&Arc<dyn PolicyPlugin>> {
        self.policies.get(id)
    }
}
