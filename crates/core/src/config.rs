// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables for one engine instance. All fields have serde defaults so a
/// partial TOML/JSON document deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size per engine.
    pub workers: usize,
    /// Heartbeat + cleanup cadence, seconds.
    pub periodic_interval: u64,
    /// Liveness threshold for lock stealing, seconds.
    pub service_down_time: u64,
    /// Per-action timeout when the caller does not specify one, seconds.
    pub default_action_timeout: u64,
    /// Lock acquisition attempts before steal/fail.
    pub lock_retry_times: u32,
    /// Nominal lock backoff, seconds (actual sleep is 1–2 s jitter).
    pub lock_retry_interval: u64,
    /// Upper bound enforced in size checks.
    pub max_nodes_per_cluster: u32,
    /// Child actions dispatched per wave; 0 = unlimited.
    pub max_actions_per_batch: usize,
    /// Pause between node-action batches, seconds.
    pub batch_interval: u64,
    /// RETRY results beyond this count are promoted to ERROR.
    pub retry_max: u32,
    /// TTL for terminal actions, seconds; `None` = keep forever.
    pub action_retention: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            periodic_interval: 60,
            service_down_time: 60,
            default_action_timeout: 3600,
            lock_retry_times: 3,
            lock_retry_interval: 10,
            max_nodes_per_cluster: 1000,
            max_actions_per_batch: 0,
            batch_interval: 3,
            retry_max: 3,
            action_retention: None,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
