// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory tree of hierarchy nodes annotated with a user's access state.
//!
//! Nodes live in an arena owned by [`AccessTree`] and refer to each other by [`TreeIndex`]. The
//! parent link is a plain index used for navigation, children are ordered by title.
mod builder;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use builder::{EditableScope, ExpandFilter, TreeBuilder, TreeOptions};

use crate::mutation::NodeEdit;
use crate::node::HierarchyNode;
use crate::shopping::term_gate;
use crate::state::NodeAccessState;

/// Position of a node inside an [`AccessTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeIndex(usize);

#[derive(Clone, Debug)]
pub struct TreeNode {
    pub node: Arc<HierarchyNode>,

    /// State as read from the store when the node was added.
    pub original: NodeAccessState,

    /// State as currently edited.
    pub working: NodeAccessState,

    pub parent: Option<TreeIndex>,
    pub children: Vec<TreeIndex>,

    /// True once all direct children of the node are part of the tree.
    pub populated: bool,

    /// Whether edit controls may be offered for this node.
    pub editable: bool,
}

impl TreeNode {
    pub fn id(&self) -> &str {
        &self.node.id
    }

    pub fn title(&self) -> &str {
        &self.node.title
    }

    pub fn is_modified(&self) -> bool {
        !self.original.diff(&self.working).is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccessTree {
    nodes: Vec<TreeNode>,
    roots: Vec<TreeIndex>,
    index: HashMap<String, TreeIndex>,
}

impl AccessTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[TreeIndex] {
        &self.roots
    }

    /// Panics if the index belongs to another tree.
    pub fn get(&self, idx: TreeIndex) -> &TreeNode {
        &self.nodes[idx.0]
    }

    pub fn children(&self, idx: TreeIndex) -> &[TreeIndex] {
        &self.nodes[idx.0].children
    }

    pub fn parent(&self, idx: TreeIndex) -> Option<TreeIndex> {
        self.nodes[idx.0].parent
    }

    pub fn find(&self, node_id: &str) -> Option<TreeIndex> {
        self.index.get(node_id).copied()
    }

    /// Replace the working copy of a node's state.
    pub fn set_working(&mut self, idx: TreeIndex, state: NodeAccessState) {
        self.nodes[idx.0].working = state;
    }

    pub fn working_mut(&mut self, idx: TreeIndex) -> &mut NodeAccessState {
        &mut self.nodes[idx.0].working
    }

    /// Snapshot pair of a node, ready to be handed to the mutation pipeline.
    pub fn edit(&self, idx: TreeIndex) -> NodeEdit {
        let node = self.get(idx);
        NodeEdit::new(node.id(), node.original.clone(), node.working.clone())
            .with_editable(node.editable)
    }

    /// Edits for every node whose working copy differs from the original.
    pub fn edits(&self) -> Vec<NodeEdit> {
        self.modified_nodes()
            .into_iter()
            .map(|idx| self.edit(idx))
            .collect()
    }

    /// Nearest node with direct access, starting at `idx` and following parent links.
    pub fn effective_state(&self, idx: TreeIndex) -> Option<(TreeIndex, &NodeAccessState)> {
        let mut current = Some(idx);
        while let Some(idx) = current {
            let node = self.get(idx);
            if node.working.direct_access {
                return Some((idx, &node.working));
            }
            current = node.parent;
        }
        None
    }

    /// Site nodes in pre-order.
    pub fn site_nodes(&self, site_ref_prefix: &str) -> Vec<TreeIndex> {
        self.iter()
            .filter(|idx| self.get(*idx).node.is_site(site_ref_prefix))
            .collect()
    }

    /// Nodes whose working copy differs from the original, in pre-order.
    pub fn modified_nodes(&self) -> Vec<TreeIndex> {
        self.iter()
            .filter(|idx| self.get(*idx).is_modified())
            .collect()
    }

    /// Depth-first pre-order traversal over all nodes reachable from the roots.
    pub fn iter(&self) -> impl Iterator<Item = TreeIndex> + '_ {
        let mut stack: Vec<TreeIndex> = self.roots.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let idx = stack.pop()?;
            stack.extend(self.children(idx).iter().rev().copied());
            Some(idx)
        })
    }

    /// Node ids in pre-order.
    pub fn ids(&self) -> Vec<&str> {
        self.iter().map(|idx| self.get(idx).id()).collect()
    }

    /// Add a node below `parent` or as a new root. Children are appended in call order.
    pub(crate) fn insert(
        &mut self,
        node: Arc<HierarchyNode>,
        state: NodeAccessState,
        parent: Option<TreeIndex>,
        editable: bool,
    ) -> TreeIndex {
        let idx = TreeIndex(self.nodes.len());
        self.index.insert(node.id.clone(), idx);
        self.nodes.push(TreeNode {
            node,
            original: state.clone(),
            working: state,
            parent,
            children: Vec::new(),
            populated: false,
            editable,
        });

        match parent {
            Some(parent) => self.nodes[parent.0].children.push(idx),
            None => self.roots.push(idx),
        }

        idx
    }

    /// Order the children of a node by title, ignoring case.
    pub(crate) fn sort_children(&mut self, idx: TreeIndex) {
        let mut children = std::mem::take(&mut self.nodes[idx.0].children);
        children.sort_by_cached_key(|child| self.nodes[child.0].node.title.to_lowercase());
        self.nodes[idx.0].children = children;
    }

    pub(crate) fn set_populated(&mut self, idx: TreeIndex, populated: bool) {
        self.nodes[idx.0].populated = populated;
    }

    /// Drop site nodes whose course term is excluded by the term restriction in effect for them.
    pub(crate) fn trim_terms(&mut self, site_ref_prefix: &str) {
        let excluded: HashSet<TreeIndex> = self
            .site_nodes(site_ref_prefix)
            .into_iter()
            .filter(|idx| {
                let terms = self
                    .effective_state(*idx)
                    .map(|(_, state)| &state.allowed_terms);
                !term_gate(terms, self.get(*idx).node.site_term())
            })
            .collect();

        if !excluded.is_empty() {
            self.prune(&excluded);
        }
    }

    /// Rebuild the arena without the given nodes and their subtrees.
    pub(crate) fn prune(&mut self, excluded: &HashSet<TreeIndex>) {
        let mut pruned = AccessTree::new();
        let mut stack: Vec<(TreeIndex, Option<TreeIndex>)> = self
            .roots
            .iter()
            .rev()
            .map(|idx| (*idx, None))
            .collect();

        while let Some((idx, parent)) = stack.pop() {
            if excluded.contains(&idx) {
                continue;
            }
            let node = &self.nodes[idx.0];
            let new_idx = pruned.insert(node.node.clone(), node.original.clone(), parent, node.editable);
            pruned.nodes[new_idx.0].working = node.working.clone();
            pruned.nodes[new_idx.0].populated = node.populated;
            stack.extend(node.children.iter().rev().map(|child| (*child, Some(new_idx))));
        }

        *self = pruned;
    }
}
