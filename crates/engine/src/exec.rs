// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker boundary: run one claimed action to a terminal status.

use crate::cluster_action::ClusterAction;
use crate::context::EngineContext;
use crate::node_action::NodeAction;
use muster_core::{Action, ActionPhase, ActionResult, Clock, EventLevel, EventSink};
use std::time::Duration;
use muster_store::Store;

/// Execute a claimed action and persist its outcome.
///
/// Any error escaping the handler is converted to a FAILED status here; a
/// bad action never kills a worker.
pub async fn execute_action<C: Clock>(ctx: &EngineContext<C>, mut action: Action) {
    tracing::info!(
        action_id = %action.id,
        verb = %action.verb,
        target = %action.target,
        "action start"
    );
    ctx.events.emit(EventLevel::Info, &action, ActionPhase::Start, "");

    let outcome = if action.verb.is_cluster() {
        ClusterAction::new(ctx, &mut action).execute().await
    } else {
        NodeAction::new(ctx, &mut action).execute().await
    };

    let (result, reason) = match outcome {
        Ok((result, reason)) => (result, reason),
        Err(e) => {
            tracing::error!(
                action_id = %action.id,
                verb = %action.verb,
                error = %e,
                "unexpected failure during action execution"
            );
            (ActionResult::Error, e.to_string())
        }
    };

    set_status(ctx, &action, result, &reason).await;
}

/// Map a handler result onto a stored status and wake whoever is waiting.
pub async fn set_status<C: Clock>(
    ctx: &EngineContext<C>,
    action: &Action,
    result: ActionResult,
    reason: &str,
) {
    let now = ctx.clock.epoch_ms();
    let store = &ctx.store;
    let id = action.id;

    let wakeups = match result {
        ActionResult::Ok | ActionResult::LifecycleComplete => {
            // Positive-interval actions repeat instead of terminating.
            if action.interval > 0 {
                reschedule(ctx, action).await;
                return;
            }
            let reason = if reason.is_empty() { "Action completed" } else { reason };
            ctx.events.emit(EventLevel::Info, action, ActionPhase::End, reason);
            store.action_mark_succeeded(id, now, reason)
        }
        ActionResult::Error => {
            ctx.events.emit(EventLevel::Error, action, ActionPhase::Error, reason);
            store.action_mark_failed(id, now, if reason.is_empty() { "ERROR" } else { reason })
        }
        ActionResult::Timeout => {
            ctx.events.emit(EventLevel::Error, action, ActionPhase::Error, reason);
            store.action_mark_failed(id, now, if reason.is_empty() { "TIMEOUT" } else { reason })
        }
        ActionResult::Cancel => {
            ctx.events.emit(EventLevel::Error, action, ActionPhase::End, reason);
            store.action_mark_cancelled(id, now)
        }
        ActionResult::Retry => {
            retry(ctx, action, reason).await;
            return;
        }
    };

    match wakeups {
        Ok(wakeups) => {
            ctx.completions.notify_waiters();
            if !wakeups.ready.is_empty() {
                tracing::debug!(
                    action_id = %id,
                    ready = wakeups.ready.len(),
                    "dependents became ready"
                );
                ctx.new_action.notify_waiters();
            }
        }
        Err(e) => {
            tracing::error!(action_id = %id, error = %e, "failed to persist terminal status");
        }
    }
    tracing::info!(action_id = %id, result = %result, reason, "action end");
}

/// RETRY path: bump the attempt counter, give up past the budget, otherwise
/// release the claim after a backoff so another worker picks it up.
async fn retry<C: Clock>(ctx: &EngineContext<C>, action: &Action, reason: &str) {
    let store = &ctx.store;
    let now = ctx.clock.epoch_ms();

    let mut current = match store.action_get(action.id) {
        Ok(current) => current,
        Err(e) => {
            tracing::error!(action_id = %action.id, error = %e, "retry on missing action");
            return;
        }
    };
    current.data.retries += 1;
    current.updated_at = now;
    let retries = current.data.retries;
    if let Err(e) = store.action_update(current) {
        tracing::error!(action_id = %action.id, error = %e, "failed to persist retry count");
    }

    if retries >= ctx.config.retry_max {
        let reason = format!("Retry budget exhausted after {retries} attempts: {reason}");
        ctx.events.emit(EventLevel::Error, action, ActionPhase::Error, &reason);
        if let Ok(_wakeups) = store.action_mark_failed(action.id, now, &reason) {
            ctx.completions.notify_waiters();
        }
        return;
    }

    ctx.events.emit(EventLevel::Warning, action, ActionPhase::End, reason);
    tracing::info!(
        action_id = %action.id,
        retries,
        reason,
        "re-enqueueing action with backoff"
    );
    let backoff = Duration::from_secs(ctx.config.lock_retry_interval);
    let store = std::sync::Arc::clone(&ctx.store);
    let id = action.id;
    // The claim is held through the backoff so no one re-runs it early.
    tokio::spawn(async move {
        tokio::time::sleep(backoff).await;
        if let Err(e) = store.action_abandon(id) {
            tracing::error!(action_id = %id, error = %e, "failed to abandon action");
        }
    });
}

/// Re-mark a repeating action READY after its interval.
async fn reschedule<C: Clock>(ctx: &EngineContext<C>, action: &Action) {
    ctx.events.emit(EventLevel::Info, action, ActionPhase::End, "Action completed");
    let interval = Duration::from_secs(action.interval.max(0) as u64);
    let store = std::sync::Arc::clone(&ctx.store);
    let id = action.id;
    tokio::spawn(async move {
        tokio::time::sleep(interval).await;
        if let Err(e) = store.action_abandon(id) {
            tracing::error!(action_id = %id, error = %e, "failed to reschedule action");
        }
    });
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
