// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of a user's access on single nodes.
//!
//! Direct lookups never climb the tree. Only [`AccessResolver::find_site_access`] walks upward,
//! and the nearest ancestor with direct access provides all settings as one unit.
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::NodeCache;
use crate::codec::{ACCESS_ADMIN, PermissionSet, SHOPPING_ADMIN, SITE_VISIT};
use crate::config::Config;
use crate::error::AccessError;
use crate::node::{HierarchyNode, ParentLink};
use crate::state::NodeAccessState;
use crate::store::HierarchyStore;

/// Access granted to a site through the nearest node holding direct access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteAccess {
    /// Node the settings were taken from.
    pub node_id: String,

    /// Number of levels above the site node, 0 for the site node itself.
    pub distance: usize,

    pub state: NodeAccessState,
}

/// A node with the user's own settings and those of every ancestor, nearest first.
#[derive(Clone, Debug)]
pub struct ResolvedNode {
    pub node: Arc<HierarchyNode>,
    pub state: NodeAccessState,
    pub ancestors: Vec<(Arc<HierarchyNode>, NodeAccessState)>,
}

impl ResolvedNode {
    /// The node's own settings if it has direct access, otherwise the nearest ancestor's.
    pub fn effective(&self) -> Option<(&HierarchyNode, &NodeAccessState)> {
        if self.state.direct_access {
            return Some((&self.node, &self.state));
        }

        self.ancestors
            .iter()
            .find(|(_, state)| state.direct_access)
            .map(|(node, state)| (node.as_ref(), state))
    }
}

/// Lookups of permission data, borrowing the store, node cache and configuration.
#[derive(Debug)]
pub struct AccessResolver<'a, S> {
    store: &'a S,
    nodes: &'a NodeCache,
    config: &'a Config,
}

impl<S> Clone for AccessResolver<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for AccessResolver<'_, S> {}

impl<'a, S> AccessResolver<'a, S>
where
    S: HierarchyStore,
{
    pub fn new(store: &'a S, nodes: &'a NodeCache, config: &'a Config) -> Self {
        Self {
            store,
            nodes,
            config,
        }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn nodes(&self) -> &'a NodeCache {
        self.nodes
    }

    /// Node from the cache, fetched from the store on a miss.
    pub fn node(&self, node_id: &str) -> Result<Arc<HierarchyNode>, AccessError<S::Error>> {
        self.nodes.get(self.store, node_id)
    }

    /// Root of a hierarchy.
    pub fn root(&self, hierarchy_id: &str) -> Result<Option<HierarchyNode>, AccessError<S::Error>> {
        self.store.root_node(hierarchy_id).map_err(AccessError::Store)
    }

    /// Tokens for exactly this (user, node) pair, without looking at ancestors.
    pub fn resolve_direct_access(
        &self,
        user_id: &str,
        node_id: &str,
    ) -> Result<PermissionSet, AccessError<S::Error>> {
        let tokens = self
            .store
            .permissions_for_user_on_nodes(user_id, &[node_id])
            .map_err(AccessError::Store)?;
        Ok(PermissionSet::decode(&tokens))
    }

    pub fn direct_state(
        &self,
        user_id: &str,
        node_id: &str,
    ) -> Result<NodeAccessState, AccessError<S::Error>> {
        self.resolve_direct_access(user_id, node_id)
            .map(NodeAccessState::from)
    }

    /// Single parent of a node, failing on nodes with several parents.
    pub fn parent_of<'n>(
        &self,
        node: &'n HierarchyNode,
    ) -> Result<Option<&'n str>, AccessError<S::Error>> {
        match node.parent_link() {
            ParentLink::Root => Ok(None),
            ParentLink::Parent(parent_id) => Ok(Some(parent_id)),
            ParentLink::Ambiguous => Err(AccessError::MultipleParents(node.id.clone())),
        }
    }

    /// Ancestors of a node ordered from the root down to its direct parent.
    pub fn ancestors(
        &self,
        node: &HierarchyNode,
    ) -> Result<Vec<Arc<HierarchyNode>>, AccessError<S::Error>> {
        let mut chain = Vec::new();
        let mut parent_id = self.parent_of(node)?.map(str::to_owned);

        while let Some(id) = parent_id {
            if chain.len() >= self.config.max_depth {
                return Err(AccessError::DepthExceeded {
                    node_id: node.id.clone(),
                    limit: self.config.max_depth,
                });
            }
            let parent = self.node(&id)?;
            parent_id = self.parent_of(&parent)?.map(str::to_owned);
            chain.push(parent);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Walk upwards from a site's node to the nearest node where the user holds direct access.
    ///
    /// Returns `None` if the root is reached without finding one.
    pub fn find_site_access(
        &self,
        user_id: &str,
        site_node_id: &str,
    ) -> Result<Option<SiteAccess>, AccessError<S::Error>> {
        let mut node_id = site_node_id.to_owned();
        let mut distance = 0;

        loop {
            let permissions = self.resolve_direct_access(user_id, &node_id)?;
            if permissions.site_visit {
                debug!(user_id, site_node_id, granted_by = %node_id, distance, "found site access");
                return Ok(Some(SiteAccess {
                    node_id,
                    distance,
                    state: NodeAccessState::from(permissions),
                }));
            }

            let node = self.node(&node_id)?;
            match self.parent_of(&node)? {
                Some(parent_id) => node_id = parent_id.to_owned(),
                None => {
                    trace!(user_id, site_node_id, "reached root without access");
                    return Ok(None);
                }
            }

            distance += 1;
            if distance > self.config.max_depth {
                return Err(AccessError::DepthExceeded {
                    node_id: site_node_id.to_owned(),
                    limit: self.config.max_depth,
                });
            }
        }
    }

    /// Resolve a node with the user's settings on it and on every ancestor.
    pub fn node_access(
        &self,
        node_id: &str,
        user_id: &str,
    ) -> Result<ResolvedNode, AccessError<S::Error>> {
        let node = self.node(node_id)?;
        let state = self.direct_state(user_id, node_id)?;

        let mut ancestors = Vec::new();
        for ancestor in self.ancestors(&node)?.into_iter().rev() {
            let state = self.direct_state(user_id, &ancestor.id)?;
            ancestors.push((ancestor, state));
        }

        Ok(ResolvedNode {
            node,
            state,
            ancestors,
        })
    }

    fn nodes_with_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Vec<HierarchyNode>, AccessError<S::Error>> {
        if user_id.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .nodes_for_user_permission(user_id, token)
            .map_err(AccessError::Store)
    }

    /// Nodes where the user holds direct access.
    pub fn access_nodes(&self, user_id: &str) -> Result<Vec<HierarchyNode>, AccessError<S::Error>> {
        self.nodes_with_token(user_id, SITE_VISIT)
    }

    /// Nodes where the user administers shopping periods.
    pub fn shopping_admin_nodes(
        &self,
        user_id: &str,
    ) -> Result<Vec<HierarchyNode>, AccessError<S::Error>> {
        self.nodes_with_token(user_id, SHOPPING_ADMIN)
    }

    /// Nodes where the user may grant access to others.
    pub fn access_admin_nodes(
        &self,
        user_id: &str,
    ) -> Result<Vec<HierarchyNode>, AccessError<S::Error>> {
        self.nodes_with_token(user_id, ACCESS_ADMIN)
    }

    /// Every node holding any of the three markers, deduplicated and ordered by id.
    pub fn all_nodes(&self, user_id: &str) -> Result<Vec<HierarchyNode>, AccessError<S::Error>> {
        let mut nodes = BTreeMap::new();
        for node in self
            .access_nodes(user_id)?
            .into_iter()
            .chain(self.shopping_admin_nodes(user_id)?)
            .chain(self.access_admin_nodes(user_id)?)
        {
            nodes.entry(node.id.clone()).or_insert(node);
        }
        Ok(nodes.into_values().collect())
    }

    pub fn has_delegated_access_nodes(&self, user_id: &str) -> Result<bool, AccessError<S::Error>> {
        Ok(!self.access_nodes(user_id)?.is_empty())
    }

    pub fn has_shopping_admin_nodes(&self, user_id: &str) -> Result<bool, AccessError<S::Error>> {
        Ok(!self.shopping_admin_nodes(user_id)?.is_empty())
    }

    pub fn has_access_admin_nodes(&self, user_id: &str) -> Result<bool, AccessError<S::Error>> {
        Ok(!self.access_admin_nodes(user_id)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::cache::NodeCache;
    use crate::config::Config;
    use crate::error::AccessError;
    use crate::test_utils::{HierarchyFixture, MemoryHierarchyStore};

    use super::AccessResolver;

    fn fixture(store: &MemoryHierarchyStore) {
        HierarchyFixture::new(store, "root")
            .child("root", "school", "School")
            .child("school", "dept", "Department")
            .site("dept", "site-1", "/site/1", "Fall 2024");
    }

    #[test]
    fn direct_access_does_not_climb() {
        let store = MemoryHierarchyStore::default();
        fixture(&store);
        store.grant("alice", "school", &["site.visit", "realm:r", "role:x"]);

        let (nodes, config) = (NodeCache::new(), Config::default());
        let resolver = AccessResolver::new(&store, &nodes, &config);

        assert!(resolver.resolve_direct_access("alice", "school").unwrap().site_visit);
        assert!(!resolver.resolve_direct_access("alice", "dept").unwrap().site_visit);
    }

    #[test]
    fn nearest_ancestor_wins_as_a_unit() {
        let store = MemoryHierarchyStore::default();
        fixture(&store);
        store.grant(
            "alice",
            "school",
            &["site.visit", "realm:r1", "role:x1", "denyTool:sakai.chat"],
        );
        // Tokens without the direct access marker are not a grant and never mix in.
        store.grant("alice", "dept", &["denyTool:sakai.forums"]);

        let (nodes, config) = (NodeCache::new(), Config::default());
        let resolver = AccessResolver::new(&store, &nodes, &config);

        let access = resolver.find_site_access("alice", "site-1").unwrap().unwrap();
        assert_eq!(access.node_id, "school");
        assert_eq!(access.distance, 2);
        assert_eq!(access.state.role, "x1");
        assert!(access.state.denied_tools.contains("sakai.chat"));
        assert!(!access.state.denied_tools.contains("sakai.forums"));

        store.grant("alice", "dept", &["site.visit", "realm:r2", "role:x2"]);
        let access = resolver.find_site_access("alice", "site-1").unwrap().unwrap();
        assert_eq!(access.node_id, "dept");
        assert_eq!(access.state.role, "x2");
        assert!(access.state.denied_tools.contains("sakai.forums"));
        assert!(!access.state.denied_tools.contains("sakai.chat"));
    }

    #[test]
    fn no_access_up_to_root() {
        let store = MemoryHierarchyStore::default();
        fixture(&store);
        let (nodes, config) = (NodeCache::new(), Config::default());
        let resolver = AccessResolver::new(&store, &nodes, &config);

        assert_eq!(resolver.find_site_access("bob", "site-1").unwrap(), None);
    }

    #[test]
    fn multiple_parents_are_rejected() {
        let store = MemoryHierarchyStore::default();
        fixture(&store);
        store.link("school", "site-1");

        let (nodes, config) = (NodeCache::new(), Config::default());
        let resolver = AccessResolver::new(&store, &nodes, &config);

        assert_matches!(
            resolver.find_site_access("bob", "site-1"),
            Err(AccessError::MultipleParents(id)) if id == "site-1"
        );
    }

    #[test]
    fn depth_guard() {
        let store = MemoryHierarchyStore::default();
        fixture(&store);
        let nodes = NodeCache::new();
        let config = Config::default().with_max_depth(1);
        let resolver = AccessResolver::new(&store, &nodes, &config);

        assert_matches!(
            resolver.find_site_access("bob", "site-1"),
            Err(AccessError::DepthExceeded { limit: 1, .. })
        );
    }

    #[test]
    fn node_with_ancestor_chain() {
        let store = MemoryHierarchyStore::default();
        fixture(&store);
        store.grant("alice", "school", &["site.visit", "realm:r", "role:x"]);

        let (nodes, config) = (NodeCache::new(), Config::default());
        let resolver = AccessResolver::new(&store, &nodes, &config);

        let resolved = resolver.node_access("site-1", "alice").unwrap();
        let ancestor_ids: Vec<_> = resolved
            .ancestors
            .iter()
            .map(|(node, _)| node.id.as_str())
            .collect();
        assert_eq!(ancestor_ids, ["dept", "school", "root"]);

        let (node, state) = resolved.effective().unwrap();
        assert_eq!(node.id, "school");
        assert_eq!(state.realm, "r");
    }

    #[test]
    fn marker_queries() {
        let store = MemoryHierarchyStore::default();
        fixture(&store);
        store.grant("alice", "school", &["site.visit"]);
        store.grant("alice", "dept", &["shoppingAdmin", "accessAdmin"]);

        let (nodes, config) = (NodeCache::new(), Config::default());
        let resolver = AccessResolver::new(&store, &nodes, &config);

        assert!(resolver.has_delegated_access_nodes("alice").unwrap());
        assert!(resolver.has_shopping_admin_nodes("alice").unwrap());
        assert!(resolver.has_access_admin_nodes("alice").unwrap());
        assert!(!resolver.has_access_admin_nodes("").unwrap());

        let ids: Vec<_> = resolver
            .all_nodes("alice")
            .unwrap()
            .into_iter()
            .map(|node| node.id)
            .collect();
        assert_eq!(ids, ["dept", "school"]);
    }
}
