// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared error shapes.

use thiserror::Error;

/// A referenced object does not exist.
///
/// The message format is part of the user-visible surface; keep it stable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The {kind} '{id}' could not be found.")]
pub struct NotFound {
    pub kind: &'static str,
    pub id: String,
}

impl NotFound {
    pub fn cluster(id: impl std::fmt::Display) -> Self {
        Self { kind: "cluster", id: id.to_string() }
    }

    pub fn node(id: impl std::fmt::Display) -> Self {
        Self { kind: "node", id: id.to_string() }
    }

    pub fn action(id: impl std::fmt::Display) -> Self {
        Self { kind: "action", id: id.to_string() }
    }

    pub fn policy(id: impl std::fmt::Display) -> Self {
        Self { kind: "policy", id: id.to_string() }
    }

    pub fn service(id: impl std::fmt::Display) -> Self {
        Self { kind: "service", id: id.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_format() {
        let err = NotFound::cluster("clu-x");
        assert_eq!(err.to_string(), "The cluster 'clu-x' could not be found.");
    }
}
