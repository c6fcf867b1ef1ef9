// SPDX-License-Identifier: MIT OR Apache-2.0

use tracing::{debug, warn};

use crate::codec::SITE_VISIT;
use crate::error::AccessError;
use crate::graph::Subtree;
use crate::resolver::AccessResolver;
use crate::store::HierarchyStore;

/// Result of removing a subtree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Removal {
    /// Removed node ids, children before their parents.
    pub nodes: Vec<String>,

    /// Number of permission tokens removed along with the nodes.
    pub tokens: usize,
}

/// Structural edits of the hierarchy.
#[derive(Debug)]
pub struct Maintenance<'a, S> {
    resolver: AccessResolver<'a, S>,
}

impl<'a, S> Maintenance<'a, S>
where
    S: HierarchyStore,
{
    pub fn new(resolver: AccessResolver<'a, S>) -> Self {
        Self { resolver }
    }

    /// Remove a node and all its descendants.
    ///
    /// Each node is detached, every user holding direct access on it loses all their tokens
    /// there, then the node is disabled. The node cache is cleared afterwards.
    pub fn remove_node(&self, node_id: &str) -> Result<Removal, AccessError<S::Error>> {
        let store = self.resolver.store();
        let subtree = Subtree::load(&self.resolver, node_id)?;
        let mut removal = Removal::default();

        for node in subtree.post_order() {
            let id = node.id.as_str();
            store.remove_node(id).map_err(AccessError::Store)?;

            let users = store
                .user_ids_with_permission_on_nodes(&[id], SITE_VISIT)
                .map_err(AccessError::Store)?;
            for user_id in &users {
                let tokens = store
                    .permissions_for_user_on_nodes(user_id, &[id])
                    .map_err(AccessError::Store)?;
                for token in &tokens {
                    store
                        .remove_user_node_permission(user_id, id, token)
                        .map_err(AccessError::Store)?;
                }
                removal.tokens += tokens.len();
            }

            store.disable_node(id).map_err(AccessError::Store)?;
            removal.nodes.push(node.id.clone());
        }

        self.resolver.nodes().clear();
        debug!(node_id, removed = removal.nodes.len(), tokens = removal.tokens, "removed subtree");

        Ok(removal)
    }

    /// Repeatedly remove nodes which are neither sites nor have children, until none are left.
    ///
    /// Fails with [`AccessError::CleanupLimit`] if the store keeps reporting empty nodes.
    pub fn delete_empty_non_site_nodes(
        &self,
        hierarchy_id: &str,
    ) -> Result<Vec<String>, AccessError<S::Error>> {
        let limit = self.resolver.config().cleanup_iterations();
        let store = self.resolver.store();
        let mut removed = Vec::new();

        for _ in 0..limit {
            let empty = store
                .empty_non_site_nodes(hierarchy_id)
                .map_err(AccessError::Store)?;
            if empty.is_empty() {
                return Ok(removed);
            }

            for node_id in empty {
                removed.extend(self.remove_node(&node_id)?.nodes);
            }
        }

        warn!(hierarchy_id, limit, "empty node cleanup did not converge");
        Err(AccessError::CleanupLimit(limit))
    }
}
