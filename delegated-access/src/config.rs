// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Hierarchy holding delegated access nodes.
pub const DEFAULT_HIERARCHY_ID: &str = "delegatedAccessHierarchyId";

/// Hierarchy holding shopping period nodes.
pub const DEFAULT_SHOPPING_HIERARCHY_ID: &str = "shoppingPeriodHierarchyId";

/// Pseudo-user under which shopping period settings are stored.
pub const DEFAULT_SHOPPING_PERIOD_USER: &str = "120dv0f43cv90sdf0asv9";

pub const DEFAULT_SITE_REF_PREFIX: &str = "/site/";

/// Configuration for a delegated access instance.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// Id of the access hierarchy.
    pub(crate) hierarchy_id: String,

    /// Id of the shopping period hierarchy.
    pub(crate) shopping_hierarchy_id: String,

    /// User id used to store shopping period settings.
    pub(crate) shopping_period_user: String,

    /// Title prefix which marks a node as a site.
    pub(crate) site_ref_prefix: String,

    /// Maximum number of levels any walk through the hierarchy may take.
    pub(crate) max_depth: usize,

    /// Maximum number of rounds when deleting empty nodes.
    pub(crate) cleanup_iterations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hierarchy_id: DEFAULT_HIERARCHY_ID.to_owned(),
            shopping_hierarchy_id: DEFAULT_SHOPPING_HIERARCHY_ID.to_owned(),
            shopping_period_user: DEFAULT_SHOPPING_PERIOD_USER.to_owned(),
            site_ref_prefix: DEFAULT_SITE_REF_PREFIX.to_owned(),
            max_depth: 512,
            cleanup_iterations: 10_000,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hierarchy_ids(
        mut self,
        hierarchy_id: impl Into<String>,
        shopping_hierarchy_id: impl Into<String>,
    ) -> Self {
        self.hierarchy_id = hierarchy_id.into();
        self.shopping_hierarchy_id = shopping_hierarchy_id.into();
        self
    }

    pub fn with_shopping_period_user(mut self, user_id: impl Into<String>) -> Self {
        self.shopping_period_user = user_id.into();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_cleanup_iterations(mut self, iterations: usize) -> Self {
        self.cleanup_iterations = iterations;
        self
    }

    pub fn hierarchy_id(&self) -> &str {
        &self.hierarchy_id
    }

    pub fn shopping_hierarchy_id(&self) -> &str {
        &self.shopping_hierarchy_id
    }

    pub fn shopping_period_user(&self) -> &str {
        &self.shopping_period_user
    }

    pub fn site_ref_prefix(&self) -> &str {
        &self.site_ref_prefix
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn cleanup_iterations(&self) -> usize {
        self.cleanup_iterations
    }

    pub fn is_shopping_period_user(&self, user_id: &str) -> bool {
        self.shopping_period_user == user_id
    }

    /// Strip the site reference prefix, "/site/abc" becomes "abc".
    pub fn site_id<'a>(&self, site_ref: &'a str) -> &'a str {
        site_ref.strip_prefix(self.site_ref_prefix.as_str()).unwrap_or(site_ref)
    }
}
