// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delegated access to sites, granted on nodes of an organisational hierarchy.
//!
//! Users are given access on a node (school, department, course) and inherit it on every site
//! below, with the nearest node holding direct access providing all settings. Sites can
//! additionally open a time-boxed shopping period for anonymous or authenticated visitors.
pub mod access;
pub mod cache;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod maintenance;
pub mod mutation;
pub mod node;
pub mod resolver;
pub mod shopping;
pub mod site_access;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(test)]
mod tests;
pub mod tree;

pub use access::{AccessSession, DelegatedAccess};
pub use cache::NodeCache;
pub use clock::{Clock, FixedClock, SystemClock};
pub use codec::{PermissionSet, PermissionToken, RealmRole};
pub use config::Config;
pub use error::{AccessError, InvalidInput};
pub use event::{AccessEvent, AccessEventKind, BroadcastEventBus, EventBus};
pub use maintenance::{Maintenance, Removal};
pub use mutation::{MutationOutcome, MutationPipeline, NodeEdit};
pub use node::HierarchyNode;
pub use resolver::{AccessResolver, ResolvedNode, SiteAccess};
pub use shopping::{ShoppingPeriod, ShoppingSettings};
pub use site_access::{
    AccessGrant, CachedAccess, RestrictedToolsCache, SiteAccessCache, SiteDirectory, VisitKind,
};
pub use state::{AccessDiff, AccessField, NodeAccessState, ShoppingAuth};
pub use store::HierarchyStore;
pub use tree::{AccessTree, EditableScope, ExpandFilter, TreeBuilder, TreeIndex, TreeOptions};
