// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::error::AccessError;
use crate::node::HierarchyNode;
use crate::store::HierarchyStore;

/// Read-through cache of hierarchy nodes, shared between concurrent requests.
///
/// Nodes are immutable per id, so two threads missing on the same id at once only cause a
/// duplicate fetch. The cache must be cleared whenever nodes are added or removed.
#[derive(Debug, Default)]
pub struct NodeCache {
    nodes: RwLock<HashMap<String, Arc<HierarchyNode>>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached node or fetch it from the store.
    pub fn get<S>(&self, store: &S, node_id: &str) -> Result<Arc<HierarchyNode>, AccessError<S::Error>>
    where
        S: HierarchyStore,
    {
        if let Some(node) = self.nodes.read().get(node_id) {
            return Ok(node.clone());
        }

        trace!(node_id, "node cache miss");
        let node = store
            .node(node_id)
            .map_err(AccessError::Store)?
            .ok_or_else(|| AccessError::NodeNotFound(node_id.to_owned()))?;
        let node = Arc::new(node);
        self.nodes.write().insert(node_id.to_owned(), node.clone());

        Ok(node)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.read().contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Invalidate all cached nodes.
    pub fn clear(&self) {
        self.nodes.write().clear();
    }
}
