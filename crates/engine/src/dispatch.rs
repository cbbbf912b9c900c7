// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher: worker pool, action submission, and dependency waits.

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::exec;
use muster_core::{
    Action, ActionId, ActionPhase, ActionResult, ActionStatus, ActionVerb, Cause, Clock,
    EventLevel, EventSink, Signal, WorkerId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use muster_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long an idle worker waits before re-scanning for READY actions.
const IDLE_POLL: Duration = Duration::from_millis(300);

/// Bound on dependency-wait wake-up frequency.
const WAIT_POLL: Duration = Duration::from_millis(500);

/// Parameters for submitting a new action.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub verb: ActionVerb,
    pub target: String,
    pub name: Option<String>,
    pub cause: Cause,
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub timeout_secs: Option<u64>,
    pub depends_on: Vec<ActionId>,
}

impl SubmitRequest {
    pub fn new(verb: ActionVerb, target: impl Into<String>) -> Self {
        Self {
            verb,
            target: target.into(),
            name: None,
            cause: Cause::RpcRequest,
            inputs: serde_json::Map::new(),
            timeout_secs: None,
            depends_on: Vec::new(),
        }
    }

    muster_core::setters! {
        set {
            cause: Cause,
            inputs: serde_json::Map<String, serde_json::Value>,
            depends_on: Vec<ActionId>,
        }
        option {
            name: String,
        }
    }

    pub fn timeout_secs(mut self, v: u64) -> Self {
        self.timeout_secs = Some(v);
        self
    }
}

/// Long-running worker pool claiming READY actions.
pub struct Dispatcher<C: Clock> {
    ctx: Arc<EngineContext<C>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl<C: Clock> Dispatcher<C> {
    pub fn new(ctx: Arc<EngineContext<C>>) -> Self {
        Self { ctx, workers: parking_lot::Mutex::new(Vec::new()), shutdown: Arc::new(AtomicBool::new(false)) }
    }

    pub fn context(&self) -> &Arc<EngineContext<C>> {
        &self.ctx
    }

    /// Spawn the configured number of workers.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        for slot in 0..self.ctx.config.workers.max(1) {
            let ctx = Arc::clone(&self.ctx);
            let shutdown = Arc::clone(&self.shutdown);
            let worker_id = WorkerId::new(format!("worker-{slot}"));
            workers.push(tokio::spawn(worker_loop(ctx, shutdown, worker_id)));
        }
    }

    /// Stop accepting work and wait for the workers to drain.
    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.ctx.new_action.notify_waiters();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.await;
        }
    }

    /// Submit an action; it is stored READY (or INIT → WAITING when it has
    /// dependencies) and a worker is woken.
    pub fn submit(&self, req: SubmitRequest) -> Result<ActionId, EngineError> {
        let ctx = &self.ctx;
        let now = ctx.clock.epoch_ms();
        let timeout = req.timeout_secs.unwrap_or(ctx.config.default_action_timeout);
        let mut action = Action::new(req.verb, req.target, now)
            .cause(req.cause)
            .inputs(req.inputs)
            .timeout_secs(timeout);
        if let Some(name) = req.name {
            action = action.name(name);
        }
        if !req.depends_on.is_empty() {
            action = action.status(ActionStatus::Init);
        }
        let id = ctx.store.action_create(action)?;
        if !req.depends_on.is_empty() {
            ctx.store.dependency_add(&req.depends_on, id)?;
        }
        self.start_action(id);
        Ok(id)
    }

    /// Wake a worker for a newly READY action.
    pub fn start_action(&self, id: ActionId) {
        tracing::debug!(action_id = %id, "action ready for dispatch");
        self.ctx.new_action.notify_waiters();
    }

    /// Deliver a signal. Illegal signals are a silent no-op recorded as an
    /// error event.
    pub fn signal(&self, id: ActionId, signal: Signal) -> Result<(), EngineError> {
        let action = self.ctx.store.action_get(id)?;
        if !signal.legal_in(action.status) {
            let reason = format!(
                "Action ({id}) is in unexpected status ({}) for signal {signal}.",
                action.status
            );
            self.ctx.events.emit(EventLevel::Error, &action, ActionPhase::Error, &reason);
            return Ok(());
        }
        self.ctx.store.action_signal(id, signal)?;
        Ok(())
    }
}

async fn worker_loop<C: Clock>(
    ctx: Arc<EngineContext<C>>,
    shutdown: Arc<AtomicBool>,
    worker_id: WorkerId,
) {
    tracing::debug!(worker = %worker_id, "worker started");
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let now = ctx.clock.epoch_ms();
        match ctx.store.action_acquire_first_ready(ctx.engine_id, now) {
            Some(action) => {
                exec::execute_action(&ctx, action).await;
            }
            None => {
                let _ = tokio::time::timeout(IDLE_POLL, ctx.new_action.notified()).await;
            }
        }
    }
    tracing::debug!(worker = %worker_id, "worker stopped");
}

/// Block the in-flight parent until every action it depends on reaches a
/// terminal status, honoring cancel/suspend signals and the parent's
/// timeout at every wake-up.
pub async fn wait_for_dependents<C: Clock>(
    ctx: &EngineContext<C>,
    parent: &Action,
) -> (ActionResult, String) {
    loop {
        // Listen before checking so completions between the check and the
        // await still wake us (the bounded timeout covers the rest).
        let notified = ctx.completions.notified();

        if let Some(outcome) = check_interrupts(ctx, parent).await {
            return outcome;
        }

        let children = match ctx.store.dependency_get_depended(parent.id) {
            Ok(children) => children,
            Err(e) => return (ActionResult::Error, e.to_string()),
        };

        let mut first_failed: Option<(u64, ActionId)> = None;
        let mut pending = 0usize;
        for child in &children {
            let Ok(action) = ctx.store.action_get(*child) else { continue };
            match action.status {
                ActionStatus::Succeeded => {}
                ActionStatus::Failed | ActionStatus::Cancelled => {
                    let end = action.end_time.unwrap_or(u64::MAX);
                    if first_failed.is_none_or(|(t, _)| end < t) {
                        first_failed = Some((end, *child));
                    }
                }
                _ => pending += 1,
            }
        }

        if pending == 0 {
            return match first_failed {
                None => (ActionResult::Ok, "All dependent actions completed.".to_string()),
                Some((_, id)) => {
                    (ActionResult::Error, format!("Failed dependent action '{id}'."))
                }
            };
        }

        let _ = tokio::time::timeout(WAIT_POLL, notified).await;
    }
}

/// Check timeout and signals at a suspension point.
///
/// Returns the result the handler must propagate, or `None` to continue.
/// A SUSPEND signal parks the action here until RESUME (or cancel/timeout).
pub(crate) async fn check_interrupts<C: Clock>(
    ctx: &EngineContext<C>,
    action: &Action,
) -> Option<(ActionResult, String)> {
    let now = ctx.clock.epoch_ms();
    if action.is_timeout(now) {
        return Some((ActionResult::Timeout, format!("{} timeout", action.verb)));
    }

    match ctx.store.action_signal_query(action.id).ok()? {
        None => None,
        Some(Signal::Cancel) => {
            let _ = ctx.store.action_signal_clear(action.id);
            Some((ActionResult::Cancel, format!("{} cancelled", action.verb)))
        }
        Some(Signal::Suspend) => {
            let _ = ctx.store.action_signal_clear(action.id);
            let _ = ctx.store.action_mark_suspended(action.id);
            tracing::info!(action_id = %action.id, "action suspended");
            loop {
                tokio::time::sleep(WAIT_POLL).await;
                let now = ctx.clock.epoch_ms();
                if action.is_timeout(now) {
                    let _ = ctx.store.action_mark_running(action.id);
                    return Some((ActionResult::Timeout, format!("{} timeout", action.verb)));
                }
                match ctx.store.action_signal_query(action.id).ok()? {
                    Some(Signal::Cancel) => {
                        let _ = ctx.store.action_signal_clear(action.id);
                        let _ = ctx.store.action_mark_running(action.id);
                        return Some((
                            ActionResult::Cancel,
                            format!("{} cancelled", action.verb),
                        ));
                    }
                    Some(Signal::Resume) => {
                        let _ = ctx.store.action_signal_clear(action.id);
                        let _ = ctx.store.action_mark_running(action.id);
                        tracing::info!(action_id = %action.id, "action resumed");
                        return None;
                    }
                    _ => {}
                }
            }
        }
        // RESUME outside suspension is a no-op.
        Some(Signal::Resume) => {
            let _ = ctx.store.action_signal_clear(action.id);
            None
        }
    }
}

/// Sleep in bounded slices, re-checking signals and timeout each slice.
pub(crate) async fn sleep_interruptible<C: Clock>(
    ctx: &EngineContext<C>,
    action: &Action,
    secs: u64,
) -> Option<(ActionResult, String)> {
    let mut remaining = Duration::from_secs(secs);
    while !remaining.is_zero() {
        let slice = remaining.min(Duration::from_secs(1));
        tokio::time::sleep(slice).await;
        remaining -= slice;
        if let Some(outcome) = check_interrupts(ctx, action).await {
            return Some(outcome);
        }
    }
    None
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
