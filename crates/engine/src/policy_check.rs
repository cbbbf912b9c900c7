// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Policy check pipeline.

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::plugin::{PolicyPhase, PolicyPlugin};
use muster_store::Store;
use muster_core::{
    Action, ActionPhase, CheckStatus, Clock, ClusterId, EventLevel, EventSink, PolicyLevel,
};

/// Run every enabled policy bound to the cluster, ascending priority.
///
/// Writes `CHECK_OK`/`CHECK_ERROR` plus a reason into `action.data`; the
/// handler decides what to do with the verdict. AFTER walks refresh every
/// enabled binding's `last_op` regardless of the policy's target set, so
/// cooldown accounting stays accurate.
pub async fn policy_check<C: Clock>(
    ctx: &EngineContext<C>,
    cluster_id: ClusterId,
    action: &mut Action,
    phase: PolicyPhase,
) -> Result<(), EngineError> {
    let bindings = ctx.store.bindings_by_cluster(cluster_id);
    action.data.reset_check("Completed policy checking.");

    for pb in bindings.iter().filter(|b| b.enabled) {
        let Some(plugin) = ctx.policy(&pb.policy_id) else {
            tracing::warn!(
                policy_id = %pb.policy_id,
                cluster_id = %cluster_id,
                "binding references an unregistered policy, skipping"
            );
            continue;
        };

        if phase == PolicyPhase::After {
            let now = ctx.clock.epoch_ms();
            ctx.store.binding_update_last_op(cluster_id, pb.policy_id, now)?;
        }

        if !plugin.targets().contains(&(phase, action.verb)) {
            continue;
        }

        if pb.cooldown_in_progress(ctx.clock.epoch_ms()) {
            action.data.fail_check(format!(
                "Policy {} cooldown is still in progress.",
                pb.policy_id
            ));
            persist(ctx, action);
            return Ok(());
        }

        let hook_result = match phase {
            PolicyPhase::Before => plugin.pre_op(cluster_id, action).await,
            PolicyPhase::After => plugin.post_op(cluster_id, action).await,
        };
        if let Err(e) = hook_result {
            action.data.fail_check(format!("Policy {} error: {e}", pb.policy_id));
        }

        if action.data.status == CheckStatus::Error {
            let reason =
                format!("Failed policy '{}': {}.", pb.policy_id, action.data.reason);
            let level = match pb.level {
                PolicyLevel::Must => EventLevel::Critical,
                PolicyLevel::Should => EventLevel::Error,
                PolicyLevel::Would => EventLevel::Warning,
                PolicyLevel::Might => EventLevel::Info,
            };
            ctx.events.emit(level, action, ActionPhase::Error, &reason);

            // Severities below SHOULD are tolerated: the verdict stands but
            // the remaining policies still get their look.
            if pb.level >= PolicyLevel::Should {
                persist(ctx, action);
                return Ok(());
            }
        } else {
            ctx.events.emit(
                EventLevel::Debug,
                action,
                ActionPhase::End,
                &format!("Policy '{}' check passed.", pb.policy_id),
            );
        }
    }

    persist(ctx, action);
    Ok(())
}

/// Best-effort persistence of the policy-written data bag.
fn persist<C: Clock>(ctx: &EngineContext<C>, action: &Action) {
    if let Err(e) = ctx.store.action_update(action.clone()) {
        tracing::error!(action_id = %action.id, error = %e, "failed to persist action data");
    }
}

#[cfg(test)]
#[path = "policy_check_tests.rs"]
mod tests;
