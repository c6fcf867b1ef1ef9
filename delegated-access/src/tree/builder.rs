// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::AccessError;
use crate::node::HierarchyNode;
use crate::resolver::AccessResolver;
use crate::state::NodeAccessState;
use crate::store::HierarchyStore;
use crate::tree::{AccessTree, TreeIndex};

/// Stand-in id for a missing shopping hierarchy root, matches no node.
const MISSING_ROOT: &str = "-1";

/// How much of the hierarchy below the seed nodes is loaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeOptions {
    /// Load the direct children of every ancestor of a seed node, so siblings along the path
    /// are shown. Seeds are left unexpanded unless cascading.
    pub include_direct_children: bool,

    /// Load every descendant of every seed node.
    pub cascade: bool,
}

impl TreeOptions {
    pub fn eager() -> Self {
        Self {
            include_direct_children: true,
            cascade: true,
        }
    }

    pub fn lazy() -> Self {
        Self {
            include_direct_children: true,
            cascade: false,
        }
    }
}

/// Which children [`TreeBuilder::expand_children`] adds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExpandFilter {
    #[default]
    All,

    /// Only children with direct or inherited access.
    AccessOnly,
}

/// Nodes the acting user may edit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EditableScope {
    /// Super-users edit everything.
    #[default]
    Unrestricted,

    /// Access admins edit the nodes they administer.
    Nodes(HashSet<String>),
}

impl EditableScope {
    pub fn allows(&self, node_id: &str) -> bool {
        match self {
            EditableScope::Unrestricted => true,
            EditableScope::Nodes(nodes) => nodes.contains(node_id),
        }
    }
}

/// Whose permissions are decoded onto the nodes of a tree.
#[derive(Debug)]
enum Decoration<'p> {
    Nothing,

    /// Decode for every node.
    All(&'p str),

    /// Decode for seeds, for the given marked nodes and for all their ancestors.
    Marked(&'p str, Vec<HierarchyNode>),
}

#[derive(Debug)]
struct BuildPlan<'p> {
    hierarchy_id: &'p str,
    seeds: Vec<HierarchyNode>,
    options: TreeOptions,
    decoration: Decoration<'p>,
    scope: &'p EditableScope,
    excluded: &'p str,
}

fn sort_by_title(nodes: &mut [Arc<HierarchyNode>]) {
    nodes.sort_by_cached_key(|node| node.title.to_lowercase());
}

/// Builds [`AccessTree`]s for a user, eagerly or on demand.
#[derive(Debug)]
pub struct TreeBuilder<'a, S> {
    resolver: AccessResolver<'a, S>,
}

impl<'a, S> TreeBuilder<'a, S>
where
    S: HierarchyStore,
{
    pub fn new(resolver: AccessResolver<'a, S>) -> Self {
        Self { resolver }
    }

    /// Tree of all nodes where the user holds direct access.
    ///
    /// Site nodes whose course term is excluded by the term restriction in effect for them are
    /// left out.
    pub fn access_tree(
        &self,
        user_id: &str,
        options: TreeOptions,
    ) -> Result<AccessTree, AccessError<S::Error>> {
        let config = self.resolver.config();
        let seeds = self.resolver.access_nodes(user_id)?;

        let mut tree = self.build(BuildPlan {
            hierarchy_id: config.hierarchy_id(),
            seeds,
            options,
            decoration: Decoration::Marked(user_id, Vec::new()),
            scope: &EditableScope::Unrestricted,
            excluded: MISSING_ROOT,
        })?;
        tree.trim_terms(config.site_ref_prefix());

        Ok(tree)
    }

    /// Tree of every node on which the user holds any grant, for editing that user's access.
    ///
    /// Nodes are tagged editable according to the acting user's `scope`.
    pub fn entire_tree(
        &self,
        user_id: &str,
        options: TreeOptions,
        scope: &EditableScope,
    ) -> Result<AccessTree, AccessError<S::Error>> {
        let config = self.resolver.config();
        let seeds = self.resolver.all_nodes(user_id)?;
        let shopping_root = self.resolver.root(config.shopping_hierarchy_id())?;

        self.build(BuildPlan {
            hierarchy_id: config.hierarchy_id(),
            seeds,
            options,
            decoration: Decoration::Marked(user_id, Vec::new()),
            scope,
            excluded: shopping_root
                .as_ref()
                .map(|root| root.id.as_str())
                .unwrap_or(MISSING_ROOT),
        })
    }

    /// The complete shopping hierarchy, optionally with the stored shopping period settings.
    pub fn shopping_tree(&self, include_perms: bool) -> Result<AccessTree, AccessError<S::Error>> {
        let config = self.resolver.config();
        let root = self
            .resolver
            .root(config.shopping_hierarchy_id())?
            .ok_or_else(|| AccessError::RootNotFound(config.shopping_hierarchy_id().to_owned()))?;

        self.build(BuildPlan {
            hierarchy_id: config.shopping_hierarchy_id(),
            seeds: vec![root],
            options: TreeOptions::eager(),
            decoration: if include_perms {
                Decoration::All(config.shopping_period_user())
            } else {
                Decoration::Nothing
            },
            scope: &EditableScope::Unrestricted,
            excluded: MISSING_ROOT,
        })
    }

    /// Nodes the user administers shopping periods for, showing the shopping period settings.
    pub fn shopping_admin_tree(
        &self,
        user_id: &str,
        options: TreeOptions,
    ) -> Result<AccessTree, AccessError<S::Error>> {
        let config = self.resolver.config();
        let seeds = self.resolver.shopping_admin_nodes(user_id)?;

        self.build(BuildPlan {
            hierarchy_id: config.hierarchy_id(),
            seeds,
            options,
            decoration: Decoration::All(config.shopping_period_user()),
            scope: &EditableScope::Unrestricted,
            excluded: MISSING_ROOT,
        })
    }

    /// The complete access hierarchy with the user's settings where they exist.
    pub fn entire_tree_with_user_perms(
        &self,
        user_id: &str,
    ) -> Result<AccessTree, AccessError<S::Error>> {
        let config = self.resolver.config();
        let root = self
            .resolver
            .root(config.hierarchy_id())?
            .ok_or_else(|| AccessError::RootNotFound(config.hierarchy_id().to_owned()))?;
        let marked = self.resolver.all_nodes(user_id)?;

        self.build(BuildPlan {
            hierarchy_id: config.hierarchy_id(),
            seeds: vec![root],
            options: TreeOptions::eager(),
            decoration: Decoration::Marked(user_id, marked),
            scope: &EditableScope::Unrestricted,
            excluded: MISSING_ROOT,
        })
    }

    /// Scope of an access admin: exactly the nodes they hold the access admin marker on.
    pub fn access_admin_scope(&self, actor_id: &str) -> Result<EditableScope, AccessError<S::Error>> {
        let nodes = self.resolver.access_admin_nodes(actor_id)?;
        Ok(EditableScope::Nodes(
            nodes.into_iter().map(|node| node.id).collect(),
        ))
    }

    /// Add the direct children of a node which were not loaded yet.
    ///
    /// Returns true if at least one child passing `filter` was added. Expanding the same node
    /// again adds nothing.
    pub fn expand_children(
        &self,
        tree: &mut AccessTree,
        idx: TreeIndex,
        user_id: &str,
        filter: ExpandFilter,
        scope: &EditableScope,
    ) -> Result<bool, AccessError<S::Error>> {
        let parent = tree.get(idx);
        if parent.populated {
            return Ok(false);
        }
        let node = parent.node.clone();
        let parent_editable = parent.editable;

        let mut children = Vec::new();
        for child_id in &node.direct_child_ids {
            if tree.find(child_id).is_some() {
                continue;
            }
            if !parent_editable && !scope.allows(child_id) {
                continue;
            }
            children.push(self.resolver.node(child_id)?);
        }
        sort_by_title(&mut children);

        let decode = self.resolver.config().is_shopping_period_user(user_id);
        let inherited = tree.effective_state(idx).is_some();

        let mut added = false;
        for child in children {
            let state = if decode {
                self.resolver.direct_state(user_id, &child.id)?
            } else {
                NodeAccessState::default()
            };
            if filter == ExpandFilter::AccessOnly && !(inherited || state.direct_access) {
                continue;
            }
            let editable = parent_editable || scope.allows(&child.id);
            tree.insert(child, state, Some(idx), editable);
            added = true;
        }
        if added {
            tree.sort_children(idx);
        }
        tree.set_populated(idx, true);

        trace!(node_id = %node.id, added, "expanded children");
        Ok(added)
    }

    fn build(&self, plan: BuildPlan<'_>) -> Result<AccessTree, AccessError<S::Error>> {
        let mut included: BTreeMap<String, Arc<HierarchyNode>> = BTreeMap::new();
        let mut populated: HashSet<String> = HashSet::new();
        let mut expanded_ancestors: HashSet<String> = HashSet::new();
        let mut decorated: HashSet<String> = HashSet::new();

        for seed in plan.seeds {
            if seed.id == plan.excluded {
                continue;
            }
            let seed = Arc::new(seed);
            let ancestors = self.resolver.ancestors(&seed)?;
            if ancestors.iter().any(|ancestor| ancestor.id == plan.excluded) {
                continue;
            }

            // Ancestors come with all their direct children, the seed's own children are left
            // to cascading or to `expand_children`.
            let depth = ancestors.len();
            for ancestor in ancestors {
                if plan.options.include_direct_children {
                    self.collect_children(&ancestor, &mut included)?;
                    expanded_ancestors.insert(ancestor.id.clone());
                }
                decorated.insert(ancestor.id.clone());
                included.entry(ancestor.id.clone()).or_insert(ancestor);
            }
            decorated.insert(seed.id.clone());
            included.entry(seed.id.clone()).or_insert_with(|| seed.clone());

            if plan.options.cascade {
                self.collect_descendants(&seed, depth, &mut included, &mut populated)?;
            }
        }
        populated.extend(expanded_ancestors);

        if included.is_empty() && plan.options.include_direct_children {
            let root = self
                .resolver
                .root(plan.hierarchy_id)?
                .ok_or_else(|| AccessError::RootNotFound(plan.hierarchy_id.to_owned()))?;
            debug!(hierarchy_id = plan.hierarchy_id, "no seed nodes, falling back to root");
            let root = Arc::new(root);
            self.collect_children(&root, &mut included)?;
            populated.insert(root.id.clone());
            included.insert(root.id.clone(), root);
        }

        let decoration = match plan.decoration {
            Decoration::Marked(user_id, marked) => {
                for node in marked {
                    for ancestor in self.resolver.ancestors(&node)? {
                        decorated.insert(ancestor.id.clone());
                    }
                    decorated.insert(node.id);
                }
                Decoration::Marked(user_id, Vec::new())
            }
            other => other,
        };

        let state_for = |node_id: &str| match &decoration {
            Decoration::Nothing => Ok(NodeAccessState::default()),
            Decoration::All(user_id) => self.resolver.direct_state(user_id, node_id),
            Decoration::Marked(user_id, _) if decorated.contains(node_id) => {
                self.resolver.direct_state(user_id, node_id)
            }
            Decoration::Marked(..) => Ok(NodeAccessState::default()),
        };
        let tree = self.assemble(&included, state_for, plan.scope, &populated)?;

        debug!(
            hierarchy_id = plan.hierarchy_id,
            nodes = tree.len(),
            roots = tree.roots().len(),
            "built access tree"
        );
        Ok(tree)
    }

    fn collect_children(
        &self,
        node: &HierarchyNode,
        included: &mut BTreeMap<String, Arc<HierarchyNode>>,
    ) -> Result<(), AccessError<S::Error>> {
        for child_id in &node.direct_child_ids {
            if !included.contains_key(child_id) {
                let child = self.resolver.node(child_id)?;
                included.insert(child_id.clone(), child);
            }
        }
        Ok(())
    }

    /// Iterative downward walk from a seed, `depth` being the seed's distance from the root.
    fn collect_descendants(
        &self,
        seed: &Arc<HierarchyNode>,
        depth: usize,
        included: &mut BTreeMap<String, Arc<HierarchyNode>>,
        populated: &mut HashSet<String>,
    ) -> Result<(), AccessError<S::Error>> {
        let max_depth = self.resolver.config().max_depth();
        let mut stack = vec![(seed.clone(), depth)];

        while let Some((node, depth)) = stack.pop() {
            if !populated.insert(node.id.clone()) {
                continue;
            }

            for child_id in &node.direct_child_ids {
                if populated.contains(child_id) {
                    continue;
                }
                if depth + 1 > max_depth {
                    return Err(AccessError::DepthExceeded {
                        node_id: child_id.clone(),
                        limit: max_depth,
                    });
                }
                let child = self.resolver.node(child_id)?;
                included.insert(child_id.clone(), child.clone());
                stack.push((child, depth + 1));
            }
        }

        Ok(())
    }

    /// Link the collected nodes into a forest, children sorted by title at every level.
    fn assemble<F>(
        &self,
        included: &BTreeMap<String, Arc<HierarchyNode>>,
        state_for: F,
        scope: &EditableScope,
        populated: &HashSet<String>,
    ) -> Result<AccessTree, AccessError<S::Error>>
    where
        F: Fn(&str) -> Result<NodeAccessState, AccessError<S::Error>>,
    {
        let mut roots: Vec<Arc<HierarchyNode>> = included
            .values()
            .filter(|node| {
                !node
                    .direct_parent_ids
                    .iter()
                    .any(|parent_id| included.contains_key(parent_id))
            })
            .cloned()
            .collect();
        sort_by_title(&mut roots);

        let mut tree = AccessTree::new();
        let mut stack: Vec<(Arc<HierarchyNode>, Option<TreeIndex>)> =
            roots.into_iter().rev().map(|node| (node, None)).collect();

        while let Some((node, parent)) = stack.pop() {
            // Nodes linked below several included parents are placed once.
            if tree.find(&node.id).is_some() {
                continue;
            }

            let state = state_for(&node.id)?;
            let editable = scope.allows(&node.id);
            let idx = tree.insert(node.clone(), state, parent, editable);
            tree.set_populated(idx, populated.contains(&node.id));

            let mut children: Vec<Arc<HierarchyNode>> = node
                .direct_child_ids
                .iter()
                .filter_map(|child_id| included.get(child_id).cloned())
                .collect();
            sort_by_title(&mut children);
            stack.extend(children.into_iter().rev().map(|child| (child, Some(idx))));
        }

        Ok(tree)
    }
}
