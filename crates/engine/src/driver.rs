// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Profile driver seam.
//!
//! The driver owns the physical resource behind each node. The engine
//! treats it as an opaque capability: truthy success or a reasoned error,
//! which handlers map to OK/ERROR results. In-flight driver calls are never
//! pre-empted; cancellation is observed between calls.

use async_trait::async_trait;
use muster_core::{ClusterId, Node};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// The pluggable capability that creates/destroys/reconfigures the backing
/// resource of a node.
#[async_trait]
pub trait ProfileDriver: Send + Sync {
    /// Instantiate the physical resource; returns its opaque handle.
    async fn create(&self, node: &Node) -> DriverResult<String>;

    async fn delete(&self, node: &Node) -> DriverResult<()>;

    /// Reconfigure the resource onto a new profile.
    async fn update(&self, node: &Node, new_profile: &str) -> DriverResult<()>;

    /// Health probe; `Ok(true)` means the resource is healthy.
    async fn check(&self, node: &Node) -> DriverResult<bool>;

    /// Recover the resource; the driver decides between reboot, rebuild,
    /// and recreate based on `params`.
    async fn recover(
        &self,
        node: &Node,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> DriverResult<()>;

    async fn join(&self, node: &Node, cluster_id: ClusterId) -> DriverResult<()>;

    async fn leave(&self, node: &Node) -> DriverResult<()>;

    /// Driver-specific operation (NODE_OPERATION / CLUSTER_OPERATION).
    async fn operation(
        &self,
        node: &Node,
        operation: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> DriverResult<()>;
}
