// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stores, fixtures and event sinks for testing code built on delegated access.
mod store;

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rand::Rng;
use rand_chacha::ChaCha20Rng;

use crate::config::DEFAULT_HIERARCHY_ID;
use crate::event::{AccessEvent, EventBus};
use crate::site_access::SiteDirectory;

pub use store::{MemoryHierarchyStore, MemoryStoreError};

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Builds a hierarchy into a [`MemoryHierarchyStore`].
#[derive(Debug)]
pub struct HierarchyFixture<'s> {
    store: &'s MemoryHierarchyStore,
}

impl<'s> HierarchyFixture<'s> {
    /// Start the default hierarchy with a root titled after its id.
    pub fn new(store: &'s MemoryHierarchyStore, root_id: &str) -> Self {
        Self::in_hierarchy(store, DEFAULT_HIERARCHY_ID, root_id)
    }

    pub fn in_hierarchy(store: &'s MemoryHierarchyStore, hierarchy_id: &str, root_id: &str) -> Self {
        store.add_root(hierarchy_id, root_id, root_id);
        Self { store }
    }

    pub fn child(self, parent_id: &str, node_id: &str, title: &str) -> Self {
        self.store.add_node(parent_id, node_id, title, "");
        self
    }

    /// Add a site node, titled with its site reference and carrying its term.
    pub fn site(self, parent_id: &str, node_id: &str, site_ref: &str, term: &str) -> Self {
        self.store.add_node(parent_id, node_id, site_ref, term);
        self
    }
}

/// Event bus keeping every posted event.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<AccessEvent>>,
}

impl RecordingEventBus {
    pub fn events(&self) -> Vec<AccessEvent> {
        self.events.lock().clone()
    }
}

impl EventBus for RecordingEventBus {
    fn post(&self, event: AccessEvent) {
        self.events.lock().push(event);
    }
}

/// Site directory with a fixed set of memberships.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    members: HashSet<(String, String)>,
    terms: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn with_member(mut self, user_id: &str, site_ref: &str) -> Self {
        self.members.insert((user_id.to_owned(), site_ref.to_owned()));
        self
    }

    pub fn with_term(mut self, site_ref: &str, term: &str) -> Self {
        self.terms.insert(site_ref.to_owned(), term.to_owned());
        self
    }
}

impl SiteDirectory for StaticDirectory {
    fn is_member(&self, user_id: &str, site_ref: &str) -> bool {
        self.members
            .contains(&(user_id.to_owned(), site_ref.to_owned()))
    }

    fn site_term(&self, site_ref: &str) -> Option<String> {
        self.terms.get(site_ref).cloned()
    }
}

/// Grow a random tree of `size` nodes below `root_id`.
///
/// Every new node picks an already existing node as parent. Node ids are "n0", "n1" and so
/// on, returned in insertion order so parents always come before their children.
pub fn random_hierarchy(
    store: &MemoryHierarchyStore,
    rng: &mut ChaCha20Rng,
    root_id: &str,
    size: usize,
) -> Vec<String> {
    let mut ids = vec![root_id.to_owned()];
    for i in 0..size {
        let parent = ids[rng.random_range(0..ids.len())].clone();
        let id = format!("n{i}");
        store.add_node(&parent, &id, &format!("Node {i}"), "");
        ids.push(id);
    }
    ids.split_off(1)
}
