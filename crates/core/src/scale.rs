// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scaling math shared by resize/scale handlers and scaling policies.

use crate::cluster::Cluster;
use crate::id::NodeId;
use crate::node::{Node, NodeStatus};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Resize adjustment kinds (wire-visible input values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentType {
    ExactCapacity,
    ChangeInCapacity,
    ChangeInPercentage,
}

crate::simple_display! {
    AdjustmentType {
        ExactCapacity => "EXACT_CAPACITY",
        ChangeInCapacity => "CHANGE_IN_CAPACITY",
        ChangeInPercentage => "CHANGE_IN_PERCENTAGE",
    }
}

/// Input keys of a CLUSTER_RESIZE request.
pub const ADJUSTMENT_TYPE: &str = "adjustment_type";
pub const ADJUSTMENT_NUMBER: &str = "number";
pub const ADJUSTMENT_MIN_SIZE: &str = "min_size";
pub const ADJUSTMENT_MAX_SIZE: &str = "max_size";
pub const ADJUSTMENT_MIN_STEP: &str = "min_step";
pub const ADJUSTMENT_STRICT: &str = "strict";

/// Compute the desired capacity from an adjustment.
///
/// Percentage deltas with absolute value below one round away from zero so a
/// small percentage still moves the cluster; above one they truncate toward
/// zero. `min_step` then floors the magnitude.
pub fn calculate_desired(
    current: i64,
    adj_type: AdjustmentType,
    number: f64,
    min_step: Option<i64>,
) -> i64 {
    match adj_type {
        AdjustmentType::ExactCapacity => number as i64,
        AdjustmentType::ChangeInCapacity => current + number as i64,
        AdjustmentType::ChangeInPercentage => {
            let delta = number * current as f64 / 100.0;
            let rounded = if delta > 0.0 {
                if delta.abs() < 1.0 { delta.ceil() as i64 } else { delta.floor() as i64 }
            } else if delta.abs() < 1.0 {
                delta.floor() as i64
            } else {
                delta.ceil() as i64
            };

            match min_step {
                Some(step) if step > rounded.abs() => {
                    let adjust = if rounded > 0 { step } else { -step };
                    current + adjust
                }
                _ => current + rounded,
            }
        }
    }
}

/// Clamp a desired capacity into range for non-strict requests.
pub fn truncate_desired(
    cluster: &Cluster,
    desired: i64,
    min_size: Option<u32>,
    max_size: Option<i64>,
) -> i64 {
    let mut desired = desired;

    if let Some(min) = min_size {
        if desired < min as i64 {
            desired = min as i64;
            tracing::debug!(desired, "truncating shrinkage to specified min_size");
        }
    } else if desired < cluster.min_size as i64 {
        desired = cluster.min_size as i64;
        tracing::debug!(desired, "truncating shrinkage to cluster min_size");
    }

    match max_size {
        Some(max) if max > 0 && desired > max => {
            desired = max;
            tracing::debug!(desired, "truncating growth to specified max_size");
        }
        None if cluster.max_size > 0 && desired > cluster.max_size => {
            desired = cluster.max_size;
            tracing::debug!(desired, "truncating growth to cluster max_size");
        }
        _ => {}
    }

    desired
}

/// Validate a (desired, min_size, max_size) proposal against the cluster.
///
/// Returns `None` when the proposal is acceptable, or the exact violation
/// message otherwise. `strict` gates the checks against the cluster's own
/// current bounds; explicit new bounds are always enforced.
pub fn check_size_params(
    cluster: &Cluster,
    desired: Option<i64>,
    min_size: Option<u32>,
    max_size: Option<i64>,
    strict: bool,
) -> Option<String> {
    if let Some(desired) = desired {
        if let Some(min) = min_size {
            if desired < min as i64 {
                return Some(format!(
                    "The target capacity ({desired}) is less than the specified min_size ({min})."
                ));
            }
        } else if strict && desired < cluster.min_size as i64 {
            return Some(format!(
                "The target capacity ({desired}) is less than the cluster's min_size ({}).",
                cluster.min_size
            ));
        }

        if let Some(max) = max_size {
            if max >= 0 && desired > max {
                return Some(format!(
                    "The target capacity ({desired}) is greater than the specified max_size ({max})."
                ));
            }
        } else if strict && cluster.max_size >= 0 && desired > cluster.max_size {
            return Some(format!(
                "The target capacity ({desired}) is greater than the cluster's max_size ({}).",
                cluster.max_size
            ));
        }
    }

    if let Some(min) = min_size {
        match max_size {
            Some(max) if max >= 0 && (min as i64) > max => {
                return Some(format!(
                    "The specified min_size ({min}) is greater than the specified max_size ({max})."
                ));
            }
            None if cluster.max_size >= 0 && (min as i64) > cluster.max_size => {
                return Some(format!(
                    "The specified min_size ({min}) is greater than the current max_size ({}) \
                     of the cluster.",
                    cluster.max_size
                ));
            }
            _ => {}
        }

        if desired.is_none() && strict && min > cluster.desired_capacity {
            return Some(format!(
                "The specified min_size ({min}) is greater than the current desired_capacity \
                 ({}) of the cluster.",
                cluster.desired_capacity
            ));
        }
    }

    if let Some(max) = max_size {
        if min_size.is_none() && max >= 0 && max < cluster.min_size as i64 {
            return Some(format!(
                "The specified max_size ({max}) is less than the current min_size ({}) \
                 of the cluster.",
                cluster.min_size
            ));
        }

        if desired.is_none() && strict && max >= 0 && max < cluster.desired_capacity as i64 {
            return Some(format!(
                "The specified max_size ({max}) is less than the current desired_capacity \
                 ({}) of the cluster.",
                cluster.desired_capacity
            ));
        }
    }

    None
}

/// Sanitized outcome of parsing CLUSTER_RESIZE inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizePlan {
    pub desired: u32,
    pub min_size: Option<u32>,
    pub max_size: Option<i64>,
    /// Nodes to add (desired above current).
    pub creation_count: u32,
    /// Nodes to remove (desired below current).
    pub deletion_count: u32,
}

/// Parse and validate the parameters of a CLUSTER_RESIZE action.
pub fn parse_resize_params(
    inputs: &serde_json::Map<String, serde_json::Value>,
    cluster: &Cluster,
) -> Result<ResizePlan, String> {
    let adj_type = match inputs.get(ADJUSTMENT_TYPE).and_then(|v| v.as_str()) {
        Some(s) => Some(
            serde_json::from_value::<AdjustmentType>(serde_json::Value::String(s.to_string()))
                .map_err(|_| format!("Invalid adjustment_type: {s}."))?,
        ),
        None => None,
    };
    let number = inputs.get(ADJUSTMENT_NUMBER).and_then(|v| v.as_f64());
    let min_size = inputs.get(ADJUSTMENT_MIN_SIZE).and_then(|v| v.as_u64()).map(|v| v as u32);
    let max_size = inputs.get(ADJUSTMENT_MAX_SIZE).and_then(|v| v.as_i64());
    let min_step = inputs.get(ADJUSTMENT_MIN_STEP).and_then(|v| v.as_i64());
    let strict = inputs.get(ADJUSTMENT_STRICT).and_then(|v| v.as_bool()).unwrap_or(false);

    let current = cluster.desired_capacity as i64;
    let mut desired = current;
    if let Some(adj_type) = adj_type {
        let number = number.ok_or_else(|| "Missing number value for size adjustment.".to_string())?;
        desired = calculate_desired(current, adj_type, number, min_step);
    }

    // truncate adjustment if permitted (strict == false)
    if !strict {
        desired = truncate_desired(cluster, desired, min_size, max_size);
    }

    if let Some(msg) = check_size_params(cluster, Some(desired), min_size, max_size, strict) {
        return Err(msg);
    }

    let delta = desired - current;
    Ok(ResizePlan {
        desired: desired.max(0) as u32,
        min_size,
        max_size,
        creation_count: delta.max(0) as u32,
        deletion_count: (-delta).max(0) as u32,
    })
}

/// Split a candidate list into ERROR nodes (always chosen first) and the rest.
pub fn filter_error_nodes(nodes: &[Node]) -> (Vec<NodeId>, Vec<&Node>) {
    let mut bad = Vec::new();
    let mut good = Vec::new();
    for n in nodes {
        if n.status == NodeStatus::Error {
            bad.push(n.id);
        } else {
            good.push(n);
        }
    }
    (bad, good)
}

/// Select victim nodes at random (ERROR nodes first).
pub fn nodes_by_random(nodes: &[Node], count: usize) -> Vec<NodeId> {
    let (mut selected, mut candidates) = filter_error_nodes(nodes);
    if count <= selected.len() {
        selected.truncate(count);
        return selected;
    }

    let mut remaining = count - selected.len();
    let mut rng = rand::rng();
    while remaining > 0 && !candidates.is_empty() {
        let pick = rng.random_range(0..candidates.len());
        selected.push(candidates.swap_remove(pick).id);
        remaining -= 1;
    }

    selected
}

/// Select victim nodes by creation time (ERROR nodes first).
pub fn nodes_by_age(nodes: &[Node], count: usize, old_first: bool) -> Vec<NodeId> {
    let (mut selected, mut candidates) = filter_error_nodes(nodes);
    if count <= selected.len() {
        selected.truncate(count);
        return selected;
    }

    let remaining = count - selected.len();
    candidates.sort_by_key(|n| n.created_at.unwrap_or(n.init_at));
    if !old_first {
        candidates.reverse();
    }
    selected.extend(candidates.iter().take(remaining).map(|n| n.id));

    selected
}

#[cfg(test)]
#[path = "scale_tests.rs"]
mod tests;
