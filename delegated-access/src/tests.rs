// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::access::DelegatedAccess;
use crate::cache::NodeCache;
use crate::clock::FixedClock;
use crate::config::{Config, DEFAULT_SHOPPING_HIERARCHY_ID, DEFAULT_SHOPPING_PERIOD_USER};
use crate::event::AccessEventKind;
use crate::node::ParentLink;
use crate::resolver::AccessResolver;
use crate::site_access::VisitKind;
use crate::state::NodeAccessState;
use crate::store::HierarchyStore;
use crate::test_utils::{
    HierarchyFixture, MemoryHierarchyStore, RecordingEventBus, StaticDirectory, random_hierarchy,
    setup_logging,
};
use crate::tree::{EditableScope, ExpandFilter, TreeOptions};

const NOW: i64 = 1_730_000_000_000;

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(NOW).unwrap()
}

fn access(store: MemoryHierarchyStore) -> DelegatedAccess<MemoryHierarchyStore, RecordingEventBus> {
    DelegatedAccess::new(store, RecordingEventBus::default(), Config::default())
        .with_clock(FixedClock(now()))
}

/// Nearest node with the direct access marker, found by reading the store node by node.
fn nearest_grant(store: &MemoryHierarchyStore, user_id: &str, node_id: &str) -> Option<String> {
    let mut current = node_id.to_owned();
    loop {
        if store.tokens(user_id, &current).contains("site.visit") {
            return Some(current);
        }
        let node = store.node(&current).unwrap().unwrap();
        match node.parent_link() {
            ParentLink::Parent(parent) => current = parent.to_owned(),
            ParentLink::Root => return None,
            ParentLink::Ambiguous => unreachable!("random hierarchies are trees"),
        }
    }
}

#[test]
fn inherited_access_comes_from_nearest_grant() {
    setup_logging();

    let mut rng = ChaCha20Rng::from_seed([1; 32]);
    let store = MemoryHierarchyStore::default();
    HierarchyFixture::new(&store, "root");
    let ids = random_hierarchy(&store, &mut rng, "root", 80);

    for (i, id) in ids.iter().enumerate() {
        if rng.random_bool(0.15) {
            let realm = format!("realm:r{i}");
            store.grant("alice", id, &["site.visit", realm.as_str(), "role:x"]);
        }
    }

    let (nodes, config) = (NodeCache::new(), Config::default());
    let resolver = AccessResolver::new(&store, &nodes, &config);

    for id in &ids {
        let expected = nearest_grant(&store, "alice", id);
        let found = resolver.find_site_access("alice", id).unwrap();
        assert_eq!(found.as_ref().map(|access| &access.node_id), expected.as_ref());

        let resolved = resolver.node_access(id, "alice").unwrap();
        match (found, resolved.effective()) {
            (None, None) => (),
            (Some(access), Some((node, state))) => {
                assert_eq!(access.node_id, node.id);
                assert_eq!(&access.state, state);
                // Settings come from the granting node as a whole.
                let own = resolver.direct_state("alice", &node.id).unwrap();
                assert_eq!(access.state.realm, own.realm);
            }
            (found, effective) => panic!("{id}: walk found {found:?}, chain found {effective:?}"),
        }
    }
}

#[test]
fn eager_tree_includes_ancestors() {
    let store = MemoryHierarchyStore::default();
    HierarchyFixture::new(&store, "root")
        .child("root", "a", "A")
        .child("a", "b", "B");
    store.grant("alice", "b", &["site.visit", "realm:r", "role:x"]);
    let access = access(store);

    let tree = access
        .tree_builder()
        .access_tree("alice", TreeOptions::eager())
        .unwrap();
    assert_eq!(tree.ids(), ["root", "a", "b"]);

    let state = |id| tree.get(tree.find(id).unwrap()).working.clone();
    assert!(!state("root").direct_access);
    assert!(!state("a").direct_access);
    assert_eq!(state("root"), NodeAccessState::default());
    assert!(state("b").direct_access);
    assert_eq!(state("b").realm, "r");
}

#[test]
fn expanding_twice_adds_nothing() {
    let store = MemoryHierarchyStore::default();
    HierarchyFixture::new(&store, "root")
        .child("root", "a", "A")
        .child("root", "z", "Z")
        .child("a", "b", "B")
        .child("a", "c", "C")
        .child("b", "d", "D");
    store.grant("alice", "b", &["site.visit"]);
    let access = access(store);
    let builder = access.tree_builder();

    let mut tree = builder.access_tree("alice", TreeOptions::lazy()).unwrap();
    assert_eq!(tree.ids(), ["root", "a", "b", "c", "z"]);
    let populated: Vec<bool> = tree.iter().map(|idx| tree.get(idx).populated).collect();
    assert_eq!(populated, [true, true, false, false, false]);

    let b = tree.find("b").unwrap();
    let scope = EditableScope::Unrestricted;
    assert!(
        builder
            .expand_children(&mut tree, b, "alice", ExpandFilter::All, &scope)
            .unwrap()
    );
    assert_eq!(tree.ids(), ["root", "a", "b", "d", "c", "z"]);

    assert!(
        !builder
            .expand_children(&mut tree, b, "alice", ExpandFilter::All, &scope)
            .unwrap()
    );
    assert_eq!(tree.len(), 6);
    assert_eq!(tree.children(b).len(), 1);
}

#[test]
fn unchanged_tree_writes_nothing() {
    let store = MemoryHierarchyStore::default();
    HierarchyFixture::new(&store, "root").child("root", "dept", "Department");
    store.grant("alice", "dept", &["site.visit", "realm:r", "role:x"]);
    let access = access(store);

    let tree = access
        .tree_builder()
        .entire_tree("alice", TreeOptions::eager(), &EditableScope::Unrestricted)
        .unwrap();
    let outcomes = access.save_tree(&tree, "alice", "admin").unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(access.store().writes(), 0);
    assert!(access.events().events().is_empty());
}

#[test]
fn revoking_clears_settings_with_one_event() {
    let store = MemoryHierarchyStore::default();
    HierarchyFixture::new(&store, "root")
        .child("root", "dept", "Department")
        .site("dept", "site-1", "/site/1", "Fall 2024");
    store.grant(
        "alice",
        "dept",
        &[
            "site.visit",
            "realm:r",
            "role:x",
            "denyTool:sakai.chat",
            "term:Fall 2024",
        ],
    );
    let access = access(store);

    let mut tree = access
        .tree_builder()
        .entire_tree("alice", TreeOptions::eager(), &EditableScope::Unrestricted)
        .unwrap();
    let dept = tree.find("dept").unwrap();
    tree.working_mut(dept).direct_access = false;
    access.save_tree(&tree, "alice", "admin").unwrap();

    let events = access.events().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AccessEventKind::AccessRevoked);
    assert!(access.store().tokens("alice", "dept").is_empty());

    let state = access.node_access("dept", "alice").unwrap().state;
    assert!(!state.direct_access);
    assert!(state.realm.is_empty() && state.role.is_empty());
    assert!(state.denied_tools.is_empty());
    assert!(state.allowed_terms.is_empty());
    assert!(state.shopping_auth.is_none());
}

#[test]
fn session_memoizes_both_answers() {
    let store = MemoryHierarchyStore::default();
    HierarchyFixture::new(&store, "root")
        .child("root", "dept", "Department")
        .child("root", "other", "Other")
        .site("dept", "site-1", "/site/1", "")
        .site("other", "site-2", "/site/2", "");
    store.grant("bob", "other", &["site.visit", "realm:r", "role:x"]);
    let access = access(store);
    let directory = StaticDirectory::default();

    let session = access.session("bob").unwrap();
    assert!(session.has_delegated_access());

    let granted = session
        .site_access(&directory, "/site/2", VisitKind::Delegated)
        .unwrap();
    let denied = session
        .site_access(&directory, "/site/1", VisitKind::Delegated)
        .unwrap();
    assert!(granted.is_some());
    assert!(denied.is_none());

    let reads = access.store().permission_reads();
    assert_eq!(
        session
            .site_access(&directory, "/site/2", VisitKind::Delegated)
            .unwrap(),
        granted
    );
    assert_eq!(
        session
            .site_access(&directory, "/site/1", VisitKind::Delegated)
            .unwrap(),
        None
    );
    assert_eq!(access.store().permission_reads(), reads);
}

fn shopping_store() -> MemoryHierarchyStore {
    let start = NOW - Duration::days(1).num_milliseconds();
    let end = NOW + Duration::days(1).num_milliseconds();
    let (start, end) = (
        format!("shoppingStartDate:{start}"),
        format!("shoppingEndDate:{end}"),
    );

    let store = MemoryHierarchyStore::default();
    HierarchyFixture::new(&store, "root")
        .child("root", "dept", "Department")
        .site("dept", "site-1", "/site/1", "Fall 2024");
    store.grant(
        DEFAULT_SHOPPING_PERIOD_USER,
        "dept",
        &[
            "site.visit",
            "realm:r",
            "role:x",
            "shoppingAuth:.auth",
            start.as_str(),
            end.as_str(),
        ],
    );
    store
}

#[test]
fn shopping_period_follows_the_clock() {
    let directory = StaticDirectory::default();
    let visit = VisitKind::Shopping { active_only: true };

    let open = access(shopping_store());
    let grant = open
        .session("carol")
        .unwrap()
        .site_access(&directory, "/site/1", visit)
        .unwrap()
        .unwrap();
    assert_eq!(grant.node_id, "dept");
    assert_eq!(grant.realm_role.realm(), "r");

    // Authenticated shopping periods are closed to anonymous visitors.
    let anonymous = open.session("").unwrap();
    assert!(anonymous.site_access(&directory, "/site/1", visit).unwrap().is_none());

    let closed = DelegatedAccess::new(
        shopping_store(),
        RecordingEventBus::default(),
        Config::default(),
    )
    .with_clock(FixedClock(now() + Duration::days(2)));
    let session = closed.session("carol").unwrap();
    assert!(session.site_access(&directory, "/site/1", visit).unwrap().is_none());

    // Outside the window the stored settings are still visible when not restricted to open ones.
    assert!(
        session
            .site_access(&directory, "/site/1", VisitKind::Shopping { active_only: false })
            .unwrap()
            .is_some()
    );
}

#[test]
fn shopping_admin_opens_a_period_for_visitors() {
    setup_logging();

    let store = MemoryHierarchyStore::default();
    HierarchyFixture::new(&store, "root")
        .child("root", "dept", "Department")
        .site("dept", "site-1", "/site/1", "Fall 2024");
    // A shopping hierarchy node for the same site carries no settings.
    HierarchyFixture::in_hierarchy(&store, DEFAULT_SHOPPING_HIERARCHY_ID, "shop")
        .site("shop", "shop-1", "/site/1", "Fall 2024");
    store.grant("dana", "dept", &["shoppingAdmin"]);
    let access = access(store);
    let directory = StaticDirectory::default();
    let visit = VisitKind::Shopping { active_only: true };

    let carol = access.session("carol").unwrap();
    assert!(carol.site_access(&directory, "/site/1", visit).unwrap().is_none());

    let mut tree = access
        .tree_builder()
        .shopping_admin_tree("dana", TreeOptions::eager())
        .unwrap();
    assert_eq!(tree.ids(), ["root", "dept", "site-1"]);

    let dept = tree.find("dept").unwrap();
    let working = tree.working_mut(dept);
    working.direct_access = true;
    working.realm = "r".into();
    working.role = "x".into();
    working.shopping_auth = Some(".auth".into());
    working.shopping_start = Some(now() - Duration::days(1));
    working.shopping_end = Some(now() + Duration::days(1));
    access
        .save_tree(&tree, DEFAULT_SHOPPING_PERIOD_USER, "dana")
        .unwrap();

    let grant = carol
        .site_access(&directory, "/site/1", visit)
        .unwrap()
        .unwrap();
    assert_eq!(grant.node_id, "dept");
    assert_eq!(grant.realm_role.role(), "x");
    let anonymous = access.session("").unwrap();
    assert!(anonymous.site_access(&directory, "/site/1", visit).unwrap().is_none());

    // Opening the period to anonymous visitors through the parameter boundary.
    let day = Duration::days(1).num_milliseconds();
    let params = HashMap::from([
        ("shoppingStartDate".to_string(), (NOW - day).to_string()),
        ("shoppingEndDate".to_string(), (NOW + day).to_string()),
        ("shoppingRealm".to_string(), "r".to_string()),
        ("shoppingRole".to_string(), "x".to_string()),
        ("shoppingAuth".to_string(), ".anon".to_string()),
    ]);
    access
        .update_shopping_settings("dept", &params, "dana")
        .unwrap();

    let grant = anonymous
        .site_access(&directory, "/site/1", visit)
        .unwrap()
        .unwrap();
    assert_eq!(grant.node_id, "dept");
}
