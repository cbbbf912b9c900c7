// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error type.
//!
//! Handlers communicate expected outcomes through `ActionResult`; this enum
//! covers the faults that escape a handler. The worker boundary converts
//! every variant to a FAILED action instead of letting a worker die.

use crate::driver::DriverError;
use muster_core::NotFound;
use muster_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Policy check failure: {0}")]
    PolicyCheckFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
