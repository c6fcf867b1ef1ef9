// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a node in the organisational hierarchy.
///
/// Nodes are created and linked by the hierarchy store, this crate only reads and caches them.
/// Site nodes carry their site reference as title (for example "/site/abc123") and their course
/// term in `perm_token`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HierarchyNode {
    pub id: String,
    pub title: String,
    pub description: String,
    pub direct_parent_ids: BTreeSet<String>,
    pub direct_child_ids: BTreeSet<String>,
    pub perm_token: String,
}

/// Parent link of a node in a single-parent hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentLink<'a> {
    Root,
    Parent(&'a str),
    /// More than one direct parent, upward resolution is undefined.
    Ambiguous,
}

impl HierarchyNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn parent_link(&self) -> ParentLink<'_> {
        let mut parents = self.direct_parent_ids.iter();
        match (parents.next(), parents.next()) {
            (None, _) => ParentLink::Root,
            (Some(parent), None) => ParentLink::Parent(parent),
            (Some(_), Some(_)) => ParentLink::Ambiguous,
        }
    }

    /// Returns true if this node represents a site, given the site reference prefix.
    pub fn is_site(&self, site_ref_prefix: &str) -> bool {
        self.title.starts_with(site_ref_prefix)
    }

    /// Course term of a site node, if one was recorded.
    pub fn site_term(&self) -> Option<&str> {
        if self.perm_token.is_empty() {
            None
        } else {
            Some(&self.perm_token)
        }
    }
}
