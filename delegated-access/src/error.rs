// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// A caller supplied value was rejected before anything was written.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct InvalidInput {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidInput {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Error types for access resolution, tree building and mutations.
///
/// Generic over the error type of the hierarchy store.
#[derive(Debug, Error)]
pub enum AccessError<E> {
    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("no node found for site {0}")]
    SiteNotFound(String),

    #[error("root node of hierarchy {0} not found")]
    RootNotFound(String),

    #[error("node {0} has more than one direct parent")]
    MultipleParents(String),

    #[error("site {0} is mapped to more than one node")]
    MultipleSiteNodes(String),

    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),

    #[error("node {0} is not editable by the acting user")]
    PermissionDenied(String),

    #[error("walk from node {node_id} exceeded the depth limit of {limit}")]
    DepthExceeded { node_id: String, limit: usize },

    #[error("empty node cleanup did not finish within {0} iterations")]
    CleanupLimit(usize),

    #[error("hierarchy store error: {0}")]
    Store(E),
}
