// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service registry: heartbeat, peer-death detection, and recovery.

use crate::context::EngineContext;
use crate::error::EngineError;
use muster_core::{Clock, ServiceRecord};
use muster_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How many startup cleanup passes run before the loop retires.
const CLEANUP_PASSES: u32 = 5;

/// Registers this engine in the service table, keeps its heartbeat fresh,
/// and garbage collects dead peers during startup.
pub struct ServiceRegistry<C: Clock> {
    ctx: Arc<EngineContext<C>>,
    name: String,
    host: String,
    topic: String,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Clock> ServiceRegistry<C> {
    pub fn new(
        ctx: Arc<EngineContext<C>>,
        name: impl Into<String>,
        host: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            name: name.into(),
            host: host.into(),
            topic: topic.into(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Insert our record, start the heartbeat, and start the bounded
    /// startup cleanup loop.
    pub fn start(&self) -> Result<(), EngineError> {
        let now = self.ctx.clock.epoch_ms();
        let record = ServiceRecord::new(
            self.ctx.engine_id,
            self.name.clone(),
            self.host.clone(),
            self.topic.clone(),
            now,
        );
        self.ctx.store.service_create(record)?;
        tracing::info!(
            service_id = %self.ctx.engine_id,
            name = %self.name,
            host = %self.host,
            "service started"
        );

        let interval = Duration::from_secs(self.ctx.config.periodic_interval.max(1));

        let heartbeat_ctx = Arc::clone(&self.ctx);
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let now = heartbeat_ctx.clock.epoch_ms();
                if let Err(e) = heartbeat_ctx.store.service_update(heartbeat_ctx.engine_id, now) {
                    tracing::error!(error = %e, "heartbeat update failed");
                }
            }
        });

        let cleanup_ctx = Arc::clone(&self.ctx);
        let name = self.name.clone();
        let cleanup = tokio::spawn(async move {
            for pass in 1..=CLEANUP_PASSES {
                tokio::time::sleep(interval).await;
                cleanup_pass(&cleanup_ctx, &name);
                tracing::debug!(pass, "service clean-up attempt");
            }
            tracing::info!("finished cleaning up dead services");
        });

        let mut tasks = self.tasks.lock();
        tasks.push(heartbeat);
        tasks.push(cleanup);
        Ok(())
    }

    /// Stop the timers and delete our record.
    pub fn stop(&self) -> Result<(), EngineError> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.ctx.store.service_delete(self.ctx.engine_id)?;
        tracing::info!(service_id = %self.ctx.engine_id, "service stopped");
        Ok(())
    }

    /// One cleanup pass over expired peers (exposed for deterministic tests).
    pub fn cleanup_pass(&self) {
        cleanup_pass(&self.ctx, &self.name);
    }
}

fn cleanup_pass<C: Clock>(ctx: &EngineContext<C>, name: &str) {
    let now = ctx.clock.epoch_ms();
    let expired = ctx.store.services_expired(name, now, ctx.config.service_down_time);
    for peer in expired {
        tracing::info!(peer = %peer.id, "breaking locks for dead service");
        ctx.store.gc_by_engine(peer.id);
        if let Err(e) = ctx.store.service_delete(peer.id) {
            tracing::error!(peer = %peer.id, error = %e, "failed to delete dead service record");
        }
        // Abandoned actions are READY again; give the workers a nudge.
        ctx.new_action.notify_waiters();
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
