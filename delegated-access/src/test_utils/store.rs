// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::DEFAULT_SITE_REF_PREFIX;
use crate::node::HierarchyNode;
use crate::store::HierarchyStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("injected write failure")]
    WriteFailed,

    #[error("node {0} does not exist")]
    UnknownNode(String),
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, HierarchyNode>,

    /// Hierarchy id per node id.
    hierarchies: HashMap<String, String>,

    /// Root node id per hierarchy id.
    roots: HashMap<String, String>,

    permissions: BTreeMap<(String, String), BTreeSet<String>>,
    disabled: HashSet<String>,
    stuck_empty: BTreeSet<String>,
    writes_left: Option<usize>,
}

/// Hierarchy store kept in memory, counting the calls made against it.
#[derive(Debug, Default)]
pub struct MemoryHierarchyStore {
    inner: RwLock<Inner>,
    node_fetches: AtomicUsize,
    permission_reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryHierarchyStore {
    pub fn add_root(&self, hierarchy_id: &str, node_id: &str, title: &str) {
        let mut inner = self.inner.write();
        inner
            .nodes
            .insert(node_id.to_owned(), HierarchyNode::new(node_id, title));
        inner
            .hierarchies
            .insert(node_id.to_owned(), hierarchy_id.to_owned());
        inner
            .roots
            .insert(hierarchy_id.to_owned(), node_id.to_owned());
    }

    /// Add a node below `parent_id`, in the parent's hierarchy.
    pub fn add_node(&self, parent_id: &str, node_id: &str, title: &str, perm_token: &str) {
        let mut inner = self.inner.write();
        let hierarchy_id = inner
            .hierarchies
            .get(parent_id)
            .cloned()
            .unwrap_or_default();

        let mut node = HierarchyNode::new(node_id, title);
        node.perm_token = perm_token.to_owned();
        node.direct_parent_ids.insert(parent_id.to_owned());
        inner.nodes.insert(node_id.to_owned(), node);
        inner.hierarchies.insert(node_id.to_owned(), hierarchy_id);

        if let Some(parent) = inner.nodes.get_mut(parent_id) {
            parent.direct_child_ids.insert(node_id.to_owned());
        }
    }

    /// Add another parent to an existing node.
    pub fn link(&self, parent_id: &str, node_id: &str) {
        let mut inner = self.inner.write();
        if let Some(node) = inner.nodes.get_mut(node_id) {
            node.direct_parent_ids.insert(parent_id.to_owned());
        }
        if let Some(parent) = inner.nodes.get_mut(parent_id) {
            parent.direct_child_ids.insert(node_id.to_owned());
        }
    }

    /// Add tokens for a user on a node without counting it as a write.
    pub fn grant(&self, user_id: &str, node_id: &str, tokens: &[&str]) {
        self.inner
            .write()
            .permissions
            .entry((user_id.to_owned(), node_id.to_owned()))
            .or_default()
            .extend(tokens.iter().map(|token| token.to_string()));
    }

    pub fn tokens(&self, user_id: &str, node_id: &str) -> BTreeSet<String> {
        self.inner
            .read()
            .permissions
            .get(&(user_id.to_owned(), node_id.to_owned()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_disabled(&self, node_id: &str) -> bool {
        self.inner.read().disabled.contains(node_id)
    }

    /// Let the next `count` permission writes succeed and fail every one after.
    pub fn fail_writes_after(&self, count: usize) {
        self.inner.write().writes_left = Some(count);
    }

    /// Keep reporting a node as empty, even after it was removed.
    pub fn report_empty_forever(&self, node_id: &str) {
        self.inner.write().stuck_empty.insert(node_id.to_owned());
    }

    pub fn node_fetches(&self) -> usize {
        self.node_fetches.load(Ordering::SeqCst)
    }

    /// Number of calls reading the permission tokens of a user.
    pub fn permission_reads(&self) -> usize {
        self.permission_reads.load(Ordering::SeqCst)
    }

    /// Number of attempted permission assignments and removals.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn write(&self) -> Result<(), MemoryStoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write();
        match inner.writes_left.as_mut() {
            Some(0) => Err(MemoryStoreError::WriteFailed),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl HierarchyStore for MemoryHierarchyStore {
    type Error = MemoryStoreError;

    fn node(&self, node_id: &str) -> Result<Option<HierarchyNode>, Self::Error> {
        self.node_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.read().nodes.get(node_id).cloned())
    }

    fn root_node(&self, hierarchy_id: &str) -> Result<Option<HierarchyNode>, Self::Error> {
        let inner = self.inner.read();
        Ok(inner
            .roots
            .get(hierarchy_id)
            .and_then(|root_id| inner.nodes.get(root_id))
            .cloned())
    }

    fn nodes_for_user_permission(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Vec<HierarchyNode>, Self::Error> {
        let inner = self.inner.read();
        Ok(inner
            .permissions
            .iter()
            .filter(|((user, _), tokens)| user == user_id && tokens.contains(token))
            .filter_map(|((_, node_id), _)| inner.nodes.get(node_id).cloned())
            .collect())
    }

    fn permissions_for_user_on_nodes(
        &self,
        user_id: &str,
        node_ids: &[&str],
    ) -> Result<BTreeSet<String>, Self::Error> {
        self.permission_reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read();
        let mut tokens = BTreeSet::new();
        for node_id in node_ids {
            if let Some(found) = inner
                .permissions
                .get(&(user_id.to_owned(), (*node_id).to_owned()))
            {
                tokens.extend(found.iter().cloned());
            }
        }
        Ok(tokens)
    }

    fn assign_user_node_permission(
        &self,
        user_id: &str,
        node_id: &str,
        token: &str,
    ) -> Result<(), Self::Error> {
        self.write()?;
        self.inner
            .write()
            .permissions
            .entry((user_id.to_owned(), node_id.to_owned()))
            .or_default()
            .insert(token.to_owned());
        Ok(())
    }

    fn remove_user_node_permission(
        &self,
        user_id: &str,
        node_id: &str,
        token: &str,
    ) -> Result<(), Self::Error> {
        self.write()?;
        let mut inner = self.inner.write();
        let key = (user_id.to_owned(), node_id.to_owned());
        if let Some(tokens) = inner.permissions.get_mut(&key) {
            tokens.remove(token);
            if tokens.is_empty() {
                inner.permissions.remove(&key);
            }
        }
        Ok(())
    }

    fn remove_node(&self, node_id: &str) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        let parents = match inner.nodes.get_mut(node_id) {
            Some(node) => std::mem::take(&mut node.direct_parent_ids),
            None => return Err(MemoryStoreError::UnknownNode(node_id.to_owned())),
        };
        for parent_id in parents {
            if let Some(parent) = inner.nodes.get_mut(&parent_id) {
                parent.direct_child_ids.remove(node_id);
            }
        }
        Ok(())
    }

    fn disable_node(&self, node_id: &str) -> Result<(), Self::Error> {
        self.inner.write().disabled.insert(node_id.to_owned());
        Ok(())
    }

    fn user_ids_with_permission_on_nodes(
        &self,
        node_ids: &[&str],
        token: &str,
    ) -> Result<BTreeSet<String>, Self::Error> {
        Ok(self
            .inner
            .read()
            .permissions
            .iter()
            .filter(|((_, node_id), tokens)| {
                node_ids.contains(&node_id.as_str()) && tokens.contains(token)
            })
            .map(|((user_id, _), _)| user_id.clone())
            .collect())
    }

    fn nodes_by_site_ref(
        &self,
        site_ref: &str,
        hierarchy_id: &str,
    ) -> Result<Vec<String>, Self::Error> {
        let inner = self.inner.read();
        Ok(inner
            .nodes
            .values()
            .filter(|node| {
                node.title == site_ref
                    && !inner.disabled.contains(&node.id)
                    && inner.hierarchies.get(&node.id).map(String::as_str) == Some(hierarchy_id)
            })
            .map(|node| node.id.clone())
            .collect())
    }

    fn empty_non_site_nodes(&self, hierarchy_id: &str) -> Result<Vec<String>, Self::Error> {
        let inner = self.inner.read();
        let mut empty: BTreeSet<String> = inner
            .nodes
            .values()
            .filter(|node| {
                inner.hierarchies.get(&node.id).map(String::as_str) == Some(hierarchy_id)
                    && !inner.disabled.contains(&node.id)
                    && !node.direct_parent_ids.is_empty()
                    && node.direct_child_ids.is_empty()
                    && !node.is_site(DEFAULT_SITE_REF_PREFIX)
            })
            .map(|node| node.id.clone())
            .collect();
        empty.extend(inner.stuck_empty.iter().cloned());
        Ok(empty.into_iter().collect())
    }
}
