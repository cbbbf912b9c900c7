// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cooperative cluster and node locks with dead-owner stealing.

use crate::context::EngineContext;
use muster_core::{ActionId, Clock, ClusterId, NodeId, ServiceId};
use muster_store::{LockScope, Store};
use rand::Rng;
use std::time::Duration;

/// Lock acquisition front-end over the store's atomic lock primitives.
///
/// Retries with jitter, then steals when forced or when the current owner
/// belongs to a dead engine. Stealing from a dead engine also garbage
/// collects everything else that engine held.
pub struct LockManager<'a, C: Clock> {
    ctx: &'a EngineContext<C>,
}

impl<'a, C: Clock> LockManager<'a, C> {
    pub fn new(ctx: &'a EngineContext<C>) -> Self {
        Self { ctx }
    }

    fn is_engine_dead(&self, engine: ServiceId) -> bool {
        let now = self.ctx.clock.epoch_ms();
        match self.ctx.store.service_get(engine) {
            Ok(record) => !record.is_alive(now, self.ctx.config.service_down_time),
            Err(_) => true,
        }
    }

    /// Try to lock the specified cluster.
    ///
    /// `forced` steals outright after the retry budget (used by
    /// CLUSTER_DELETE only).
    pub async fn cluster_lock_acquire(
        &self,
        cluster_id: ClusterId,
        action_id: ActionId,
        scope: LockScope,
        forced: bool,
    ) -> bool {
        // Step 1: bounded retries; the returned owner set tells us whether
        // we made it in.
        let retries = self.ctx.config.lock_retry_times;
        for attempt in 0..retries {
            let owners = self.ctx.store.cluster_lock_acquire(cluster_id, action_id, scope);
            if owners.contains(&action_id) {
                return true;
            }
            if attempt + 1 < retries {
                tokio::time::sleep(lock_jitter()).await;
            }
        }

        // Step 2: last resort is forced stealing.
        if forced {
            let owners = self.ctx.store.cluster_lock_steal(cluster_id, action_id);
            return owners.contains(&action_id);
        }

        // Step 3: if the owner's engine is dead, steal and clean up after it.
        let owners = self.ctx.store.cluster_lock_owners(cluster_id);
        if let Some(first) = owners.first() {
            if let Some(dead_engine) = self.dead_owner_of(*first) {
                tracing::info!(
                    cluster_id = %cluster_id,
                    locked_by = %first,
                    "cluster is locked by an action of a dead engine, stealing the lock"
                );
                let owners = self.ctx.store.cluster_lock_steal(cluster_id, action_id);
                self.ctx.store.gc_by_engine(dead_engine);
                return owners.contains(&action_id);
            }
        }

        tracing::warn!(
            cluster_id = %cluster_id,
            owners = ?owners.iter().map(|o| o.short(8).to_string()).collect::<Vec<_>>(),
            action_id = %action_id.short(8),
            "cluster is already locked, failed grabbing the lock"
        );
        false
    }

    pub fn cluster_lock_release(&self, cluster_id: ClusterId, action_id: ActionId, scope: LockScope) {
        self.ctx.store.cluster_lock_release(cluster_id, action_id, scope);
    }

    /// Try to lock the specified node (mutex).
    pub async fn node_lock_acquire(
        &self,
        node_id: NodeId,
        action_id: ActionId,
        forced: bool,
    ) -> bool {
        // Step 1: single try-acquire.
        let owner = self.ctx.store.node_lock_acquire(node_id, action_id);
        if owner == action_id {
            return true;
        }

        // Step 2: forced stealing.
        if forced {
            return self.ctx.store.node_lock_steal(node_id, action_id) == action_id;
        }

        // Step 3: steal from a dead engine; its action is marked failed.
        if self.dead_owner_of(owner).is_some() {
            tracing::info!(
                node_id = %node_id,
                locked_by = %owner,
                "node is locked by an action of a dead engine, stealing the lock"
            );
            self.ctx.store.node_lock_steal(node_id, action_id);
            let now = self.ctx.clock.epoch_ms();
            let _ = self.ctx.store.action_mark_failed(
                owner,
                now,
                "Engine died when executing this action.",
            );
            return true;
        }

        tracing::warn!(
            node_id = %node_id,
            owner = %owner,
            action_id = %action_id,
            "node is already locked, failed grabbing the lock"
        );
        false
    }

    pub fn node_lock_release(&self, node_id: NodeId, action_id: ActionId) {
        self.ctx.store.node_lock_release(node_id, action_id);
    }

    /// If the action's owning engine is not this one and its heartbeat is
    /// stale, return the dead engine's id.
    fn dead_owner_of(&self, action_id: ActionId) -> Option<ServiceId> {
        let action = self.ctx.store.action_get(action_id).ok()?;
        let owner = action.owner?;
        if owner != self.ctx.engine_id && self.is_engine_dead(owner) {
            Some(owner)
        } else {
            None
        }
    }
}

/// Random 1–2 s sleep between lock attempts.
fn lock_jitter() -> Duration {
    Duration::from_millis(rand::rng().random_range(1_000..2_000))
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
