// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph of a hierarchy subtree for bulk operations.
use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;

use crate::error::AccessError;
use crate::node::HierarchyNode;
use crate::resolver::AccessResolver;
use crate::store::HierarchyStore;

/// A node and all its descendants, edges pointing from parent to child.
#[derive(Debug)]
pub struct Subtree {
    graph: DiGraph<Arc<HierarchyNode>, ()>,
    root: NodeIndex,
}

impl Subtree {
    /// Load the subtree below `root_id` with an iterative walk bounded by the configured depth.
    pub fn load<S>(
        resolver: &AccessResolver<'_, S>,
        root_id: &str,
    ) -> Result<Self, AccessError<S::Error>>
    where
        S: HierarchyStore,
    {
        let max_depth = resolver.config().max_depth();
        let mut graph = DiGraph::new();
        let mut indices: HashMap<String, NodeIndex> = HashMap::new();

        let root_node = resolver.node(root_id)?;
        let root = graph.add_node(root_node.clone());
        indices.insert(root_id.to_owned(), root);

        let mut stack = vec![(root_node, root, 0)];
        while let Some((node, idx, depth)) = stack.pop() {
            for child_id in &node.direct_child_ids {
                // Link shared children once, they are removed with the first parent.
                if indices.contains_key(child_id) {
                    continue;
                }
                if depth + 1 > max_depth {
                    return Err(AccessError::DepthExceeded {
                        node_id: root_id.to_owned(),
                        limit: max_depth,
                    });
                }

                let child = resolver.node(child_id)?;
                let child_idx = graph.add_node(child.clone());
                graph.add_edge(idx, child_idx, ());
                indices.insert(child_id.clone(), child_idx);
                stack.push((child, child_idx, depth + 1));
            }
        }

        Ok(Self { graph, root })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes with every child ahead of its parent, the root last.
    pub fn post_order(&self) -> Vec<Arc<HierarchyNode>> {
        let mut nodes = Vec::with_capacity(self.len());
        let mut dfs = DfsPostOrder::new(&self.graph, self.root);
        while let Some(idx) = dfs.next(&self.graph) {
            nodes.push(self.graph[idx].clone());
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::cache::NodeCache;
    use crate::config::Config;
    use crate::error::AccessError;
    use crate::resolver::AccessResolver;
    use crate::test_utils::{HierarchyFixture, MemoryHierarchyStore};

    use super::Subtree;

    #[test]
    fn children_before_parents() {
        let store = MemoryHierarchyStore::default();
        HierarchyFixture::new(&store, "root")
            .child("root", "a", "A")
            .child("a", "a1", "A1")
            .child("a", "a2", "A2")
            .child("root", "b", "B");

        let (nodes, config) = (NodeCache::new(), Config::default());
        let resolver = AccessResolver::new(&store, &nodes, &config);
        let subtree = Subtree::load(&resolver, "a").unwrap();
        assert_eq!(subtree.len(), 3);

        let order: Vec<_> = subtree.post_order().iter().map(|node| node.id.clone()).collect();
        assert_eq!(order.last().map(String::as_str), Some("a"));
        assert!(order.contains(&"a1".to_string()));
        assert!(order.contains(&"a2".to_string()));
    }

    #[test]
    fn deep_subtrees_are_refused() {
        let store = MemoryHierarchyStore::default();
        HierarchyFixture::new(&store, "root")
            .child("root", "a", "A")
            .child("a", "b", "B")
            .child("b", "c", "C");

        let nodes = NodeCache::new();
        let config = Config::default().with_max_depth(2);
        let resolver = AccessResolver::new(&store, &nodes, &config);

        assert_matches!(
            Subtree::load(&resolver, "root"),
            Err(AccessError::DepthExceeded { limit: 2, .. })
        );
        assert!(Subtree::load(&resolver, "a").is_ok());
    }
}
