// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store error type.

use muster_core::NotFound;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    /// Attaching a second enabled policy of the same type to one cluster.
    #[error("Policy of type '{policy_type}' is already attached to cluster '{cluster_id}'.")]
    PolicyTypeConflict { policy_type: String, cluster_id: String },

    /// The binding already exists.
    #[error("Policy '{policy_id}' is already attached to cluster '{cluster_id}'.")]
    BindingExists { policy_id: String, cluster_id: String },
}
