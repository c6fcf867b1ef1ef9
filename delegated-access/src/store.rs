// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::error::Error;

use crate::node::HierarchyNode;

/// API of the hierarchy storage service.
///
/// The store is authoritative for topology and for raw permission tokens. Permission tokens are
/// scoped to a (user, node) pair and passed around in their stored string form.
pub trait HierarchyStore {
    type Error: Error + Send + Sync + 'static;

    /// Get a node by its id.
    fn node(&self, node_id: &str) -> Result<Option<HierarchyNode>, Self::Error>;

    /// Get the root node of a hierarchy.
    fn root_node(&self, hierarchy_id: &str) -> Result<Option<HierarchyNode>, Self::Error>;

    /// All nodes on which the user holds exactly this token.
    fn nodes_for_user_permission(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Vec<HierarchyNode>, Self::Error>;

    /// Union of all tokens the user holds on the given nodes.
    fn permissions_for_user_on_nodes(
        &self,
        user_id: &str,
        node_ids: &[&str],
    ) -> Result<BTreeSet<String>, Self::Error>;

    fn assign_user_node_permission(
        &self,
        user_id: &str,
        node_id: &str,
        token: &str,
    ) -> Result<(), Self::Error>;

    fn remove_user_node_permission(
        &self,
        user_id: &str,
        node_id: &str,
        token: &str,
    ) -> Result<(), Self::Error>;

    /// Detach a node from the hierarchy.
    fn remove_node(&self, node_id: &str) -> Result<(), Self::Error>;

    /// Mark a node as disabled, removed nodes stay addressable in some stores.
    fn disable_node(&self, node_id: &str) -> Result<(), Self::Error>;

    /// All users holding the token on any of the given nodes.
    fn user_ids_with_permission_on_nodes(
        &self,
        node_ids: &[&str],
        token: &str,
    ) -> Result<BTreeSet<String>, Self::Error>;

    /// Ids of the nodes representing a site reference in a hierarchy.
    fn nodes_by_site_ref(
        &self,
        site_ref: &str,
        hierarchy_id: &str,
    ) -> Result<Vec<String>, Self::Error>;

    /// Ids of non-site nodes without any children.
    fn empty_non_site_nodes(&self, hierarchy_id: &str) -> Result<Vec<String>, Self::Error>;
}
