// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entry point tying the store, caches and event bus of one deployment together.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::cache::NodeCache;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::AccessError;
use crate::event::EventBus;
use crate::maintenance::{Maintenance, Removal};
use crate::mutation::{MutationOutcome, MutationPipeline, NodeEdit};
use crate::resolver::{AccessResolver, ResolvedNode};
use crate::shopping::ShoppingSettings;
use crate::site_access::{
    AccessGrant, RestrictedToolsCache, SiteAccessCache, SiteDirectory, VisitContext, VisitKind,
};
use crate::store::HierarchyStore;
use crate::tree::{AccessTree, TreeBuilder};

/// Delegated access for one hierarchy store.
///
/// Holds the caches shared by all requests. Resolvers, tree builders and mutation pipelines are
/// cheap views borrowing from it and can be created per request.
pub struct DelegatedAccess<S, B> {
    store: S,
    events: B,
    config: Config,
    nodes: NodeCache,
    restricted_tools: RestrictedToolsCache,
    clock: Arc<dyn Clock>,
}

impl<S, B> DelegatedAccess<S, B>
where
    S: HierarchyStore,
    B: EventBus,
{
    pub fn new(store: S, events: B, config: Config) -> Self {
        Self {
            store,
            events,
            config,
            nodes: NodeCache::new(),
            restricted_tools: RestrictedToolsCache::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn events(&self) -> &B {
        &self.events
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn nodes(&self) -> &NodeCache {
        &self.nodes
    }

    pub fn restricted_tools(&self) -> &RestrictedToolsCache {
        &self.restricted_tools
    }

    pub fn resolver(&self) -> AccessResolver<'_, S> {
        AccessResolver::new(&self.store, &self.nodes, &self.config)
    }

    pub fn tree_builder(&self) -> TreeBuilder<'_, S> {
        TreeBuilder::new(self.resolver())
    }

    pub fn mutations(&self) -> MutationPipeline<'_, S, B> {
        MutationPipeline::new(&self.store, &self.events, &self.config, self.clock.as_ref())
    }

    pub fn maintenance(&self) -> Maintenance<'_, S> {
        Maintenance::new(self.resolver())
    }

    /// Settings of a user on a node, together with those of every ancestor.
    pub fn node_access(
        &self,
        node_id: &str,
        user_id: &str,
    ) -> Result<ResolvedNode, AccessError<S::Error>> {
        self.resolver().node_access(node_id, user_id)
    }

    /// Start a session for a user visiting sites.
    pub fn session(&self, user_id: &str) -> Result<AccessSession<'_, S, B>, AccessError<S::Error>> {
        let cache = SiteAccessCache::new(user_id);
        cache.initialize(&self.resolver(), &self.restricted_tools)?;
        Ok(AccessSession {
            access: self,
            cache,
        })
    }

    /// Persist a single edited node of a user.
    pub fn save_user_access(
        &self,
        edit: &NodeEdit,
        user_id: &str,
        actor_id: &str,
    ) -> Result<MutationOutcome, AccessError<S::Error>> {
        let outcome = self.mutations().apply_user_access(edit, user_id, actor_id)?;
        if !outcome.is_noop() {
            self.restricted_tools.remove_user(user_id);
        }
        Ok(outcome)
    }

    /// Persist every modified node of an edited tree.
    pub fn save_tree(
        &self,
        tree: &AccessTree,
        user_id: &str,
        actor_id: &str,
    ) -> Result<Vec<MutationOutcome>, AccessError<S::Error>> {
        let outcomes = self.mutations().apply_tree(&tree.edits(), user_id, actor_id)?;
        if outcomes.iter().any(|outcome| !outcome.is_noop()) {
            self.restricted_tools.remove_user(user_id);
        }
        Ok(outcomes)
    }

    /// Update the shopping period of a node from submitted parameters.
    ///
    /// Invalid parameters are rejected before anything is written.
    pub fn update_shopping_settings(
        &self,
        node_id: &str,
        params: &HashMap<String, String>,
        actor_id: &str,
    ) -> Result<MutationOutcome, AccessError<S::Error>> {
        let settings = ShoppingSettings::from_params(params)?;
        let shopping_user = self.config.shopping_period_user();

        let original = self.resolver().direct_state(shopping_user, node_id)?;
        let working = settings.apply_to(&original);
        debug!(node_id, actor_id, open = settings.direct_access, "updating shopping settings");

        self.mutations().apply_user_access(
            &NodeEdit::new(node_id, original, working),
            shopping_user,
            actor_id,
        )
    }

    /// Remove a node with its subtree and forget every denied tool remembered for users.
    pub fn remove_node(&self, node_id: &str) -> Result<Removal, AccessError<S::Error>> {
        let removal = self.maintenance().remove_node(node_id)?;
        self.restricted_tools.clear();
        Ok(removal)
    }
}

/// Site visits of one user, memoizing delegated access answers.
pub struct AccessSession<'a, S, B> {
    access: &'a DelegatedAccess<S, B>,
    cache: SiteAccessCache,
}

impl<S, B> AccessSession<'_, S, B>
where
    S: HierarchyStore,
    B: EventBus,
{
    pub fn user_id(&self) -> &str {
        self.cache.user_id()
    }

    pub fn has_delegated_access(&self) -> bool {
        self.cache.has_delegated_access()
    }

    pub fn cache(&self) -> &SiteAccessCache {
        &self.cache
    }

    /// Access of the user to a site, or `None` if the visit is not covered by delegated access.
    pub fn site_access<D>(
        &self,
        directory: &D,
        site_ref: &str,
        kind: VisitKind,
    ) -> Result<Option<AccessGrant>, AccessError<S::Error>>
    where
        D: SiteDirectory,
    {
        let ctx = VisitContext {
            resolver: self.access.resolver(),
            directory,
            restricted_tools: &self.access.restricted_tools,
            now: self.access.clock.now(),
        };
        self.cache.resolve_for_visitor(&ctx, site_ref, kind)
    }

    pub fn denied_tools(&self, site_ref: &str) -> Option<BTreeSet<String>> {
        self.cache.denied_tools(site_ref)
    }

    /// Forget every answer, for example after the user's access was changed.
    pub fn clear(&self) {
        self.cache.clear();
    }
}
