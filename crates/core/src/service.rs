// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service registry record.

use crate::id::ServiceId;
use serde::{Deserialize, Serialize};

/// Heartbeat record for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    /// Service family name (peers of the same name GC each other).
    pub name: String,
    pub host: String,
    pub topic: String,
    /// Epoch ms of the last heartbeat.
    pub updated_at: u64,
}

impl ServiceRecord {
    pub fn new(
        id: ServiceId,
        name: impl Into<String>,
        host: impl Into<String>,
        topic: impl Into<String>,
        now_ms: u64,
    ) -> Self {
        Self { id, name: name.into(), host: host.into(), topic: topic.into(), updated_at: now_ms }
    }

    /// A service is alive iff its heartbeat is within `down_time_secs`.
    pub fn is_alive(&self, now_ms: u64, down_time_secs: u64) -> bool {
        now_ms.saturating_sub(self.updated_at) <= down_time_secs * 1000
    }
}
