// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event hand-off to out-of-band observers.
//!
//! The engine emits one record per action transition; health managers and
//! notification back-ends subscribe through an [`EventSink`] implementation.

use crate::action::Action;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

crate::simple_display! {
    EventLevel {
        Debug => "DEBUG",
        Info => "INFO",
        Warning => "WARNING",
        Error => "ERROR",
        Critical => "CRITICAL",
    }
}

/// Where in an action's life the event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    Start,
    End,
    Error,
}

crate::simple_display! {
    ActionPhase {
        Start => "start",
        End => "end",
        Error => "error",
    }
}

/// Sink for action lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, level: EventLevel, action: &Action, phase: ActionPhase, reason: &str);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _level: EventLevel, _action: &Action, _phase: ActionPhase, _reason: &str) {}
}

/// Recorded event for test assertions.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub level: EventLevel,
    pub action_id: crate::id::ActionId,
    pub verb: crate::verb::ActionVerb,
    pub phase: ActionPhase,
    pub reason: String,
}

/// Sink that records events in memory.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct MemorySink {
    events: parking_lot::Mutex<Vec<RecordedEvent>>,
}

#[cfg(any(test, feature = "test-support"))]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn phases_for(&self, action_id: crate::id::ActionId) -> Vec<ActionPhase> {
        self.events.lock().iter().filter(|e| e.action_id == action_id).map(|e| e.phase).collect()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl EventSink for MemorySink {
    fn emit(&self, level: EventLevel, action: &Action, phase: ActionPhase, reason: &str) {
        self.events.lock().push(RecordedEvent {
            level,
            action_id: action.id,
            verb: action.verb,
            phase,
            reason: reason.to_string(),
        });
    }
}
