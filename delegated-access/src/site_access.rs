// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session scoped answers to "may this visitor enter site X".
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::codec::RealmRole;
use crate::error::AccessError;
use crate::resolver::{AccessResolver, SiteAccess};
use crate::shopping::{ShoppingPeriod, term_gate};
use crate::state::ShoppingAuth;
use crate::store::HierarchyStore;

/// Read access to the site and membership directory of the host system.
pub trait SiteDirectory {
    /// Returns true if the user is a member of the site through regular membership.
    fn is_member(&self, user_id: &str, site_ref: &str) -> bool;

    /// Course term of a site. Defaults to the term recorded on the site's hierarchy node.
    fn site_term(&self, _site_ref: &str) -> Option<String> {
        None
    }
}

/// Access a visitor is granted to one site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessGrant {
    /// Node the settings were taken from.
    pub node_id: String,
    pub realm_role: RealmRole,
    pub denied_tools: BTreeSet<String>,
    pub shopping_auth: Option<ShoppingAuth>,
    pub shopping_start: Option<DateTime<Utc>>,
    pub shopping_end: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
}

impl AccessGrant {
    /// Grant for a resolved site access, `None` if the settings name no realm and role.
    fn from_site_access(access: SiteAccess) -> Option<Self> {
        let realm_role = access.state.realm_role()?;
        let shopping_auth = access.state.shopping_auth_mode();
        Some(Self {
            node_id: access.node_id,
            realm_role,
            denied_tools: access.state.denied_tools,
            shopping_auth,
            shopping_start: access.state.shopping_start,
            shopping_end: access.state.shopping_end,
            modified: access.state.modified,
            modified_by: access.state.modified_by,
        })
    }
}

/// Memoized answer for one site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CachedAccess {
    Granted(AccessGrant),

    /// Checked, no access. Distinct from a site which was never checked.
    Denied,
}

impl CachedAccess {
    pub fn grant(&self) -> Option<&AccessGrant> {
        match self {
            CachedAccess::Granted(grant) => Some(grant),
            CachedAccess::Denied => None,
        }
    }
}

/// In which capacity a visitor enters a site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisitKind {
    /// Through delegated access granted to the visitor.
    Delegated,

    /// Through the site's shopping period. With `active_only` the window, authorization mode
    /// and term restriction must currently allow the visit.
    Shopping { active_only: bool },
}

/// Denied tools per user and site, shared by all sessions.
#[derive(Debug, Default)]
pub struct RestrictedToolsCache {
    users: RwLock<HashMap<String, HashMap<String, BTreeSet<String>>>>,
}

impl RestrictedToolsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> HashMap<String, BTreeSet<String>> {
        self.users.read().get(user_id).cloned().unwrap_or_default()
    }

    pub fn insert(&self, user_id: &str, site_ref: &str, tools: BTreeSet<String>) {
        self.users
            .write()
            .entry(user_id.to_owned())
            .or_default()
            .insert(site_ref.to_owned(), tools);
    }

    pub fn remove_user(&self, user_id: &str) {
        self.users.write().remove(user_id);
    }

    pub fn clear(&self) {
        self.users.write().clear();
    }
}

/// Everything a site access query needs besides the session itself.
pub struct VisitContext<'a, S, D> {
    pub resolver: AccessResolver<'a, S>,
    pub directory: &'a D,
    pub restricted_tools: &'a RestrictedToolsCache,
    pub now: DateTime<Utc>,
}

/// Per-session cache of site access answers for one user.
#[derive(Debug)]
pub struct SiteAccessCache {
    user_id: String,
    has_delegated_access: AtomicBool,
    entries: RwLock<HashMap<String, CachedAccess>>,
    denied_tools: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl SiteAccessCache {
    /// Session for a user. Until [`SiteAccessCache::initialize`] ran every site is checked.
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            has_delegated_access: AtomicBool::new(true),
            entries: RwLock::default(),
            denied_tools: RwLock::default(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn has_delegated_access(&self) -> bool {
        self.has_delegated_access.load(Ordering::Acquire)
    }

    /// Look up whether the user holds delegated access anywhere and restore their denied tools.
    pub fn initialize<S>(
        &self,
        resolver: &AccessResolver<'_, S>,
        restricted_tools: &RestrictedToolsCache,
    ) -> Result<(), AccessError<S::Error>>
    where
        S: HierarchyStore,
    {
        let has_access = resolver.has_delegated_access_nodes(&self.user_id)?;
        self.has_delegated_access.store(has_access, Ordering::Release);

        let restored = restricted_tools.get(&self.user_id);
        trace!(user_id = %self.user_id, has_access, sites = restored.len(), "session initialized");
        self.denied_tools.write().extend(restored);

        Ok(())
    }

    /// Memoized answer for a site, if it was checked before.
    pub fn cached(&self, site_ref: &str) -> Option<CachedAccess> {
        self.entries.read().get(site_ref).cloned()
    }

    /// Tools hidden from the user in a site they entered through delegated access.
    pub fn denied_tools(&self, site_ref: &str) -> Option<BTreeSet<String>> {
        self.denied_tools.read().get(site_ref).cloned()
    }

    /// Forget all answers of this session.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.denied_tools.write().clear();
    }

    /// Resolve the user's access to a site.
    ///
    /// Members of the site never need delegated access, they are answered before anything
    /// else. Delegated answers are memoized including negative ones, shopping answers depend
    /// on the current time and are always computed.
    pub fn resolve_for_visitor<S, D>(
        &self,
        ctx: &VisitContext<'_, S, D>,
        site_ref: &str,
        kind: VisitKind,
    ) -> Result<Option<AccessGrant>, AccessError<S::Error>>
    where
        S: HierarchyStore,
        D: SiteDirectory,
    {
        if ctx.directory.is_member(&self.user_id, site_ref) {
            trace!(user_id = %self.user_id, site_ref, "member, skipping delegated access");
            return Ok(None);
        }

        match kind {
            VisitKind::Delegated => self.resolve_delegated(ctx, site_ref),
            VisitKind::Shopping { active_only } => self.resolve_shopping(ctx, site_ref, active_only),
        }
    }

    fn resolve_delegated<S, D>(
        &self,
        ctx: &VisitContext<'_, S, D>,
        site_ref: &str,
    ) -> Result<Option<AccessGrant>, AccessError<S::Error>>
    where
        S: HierarchyStore,
        D: SiteDirectory,
    {
        if let Some(cached) = self.cached(site_ref) {
            return Ok(cached.grant().cloned());
        }

        let entry = if self.has_delegated_access() {
            let config = ctx.resolver.config();
            let node_id = site_node(&ctx.resolver, site_ref, config.hierarchy_id())?;
            let site_term = site_term(ctx, site_ref, &node_id)?;

            ctx.resolver
                .find_site_access(&self.user_id, &node_id)?
                .filter(|access| {
                    term_gate(Some(&access.state.allowed_terms), site_term.as_deref())
                })
                .and_then(AccessGrant::from_site_access)
                .map_or(CachedAccess::Denied, CachedAccess::Granted)
        } else {
            CachedAccess::Denied
        };

        if let CachedAccess::Granted(grant) = &entry {
            self.denied_tools
                .write()
                .insert(site_ref.to_owned(), grant.denied_tools.clone());
            ctx.restricted_tools
                .insert(&self.user_id, site_ref, grant.denied_tools.clone());
        }

        debug!(
            user_id = %self.user_id,
            site_ref,
            granted = entry.grant().is_some(),
            "resolved delegated site access"
        );
        let grant = entry.grant().cloned();
        self.entries.write().insert(site_ref.to_owned(), entry);

        Ok(grant)
    }

    fn resolve_shopping<S, D>(
        &self,
        ctx: &VisitContext<'_, S, D>,
        site_ref: &str,
        active_only: bool,
    ) -> Result<Option<AccessGrant>, AccessError<S::Error>>
    where
        S: HierarchyStore,
        D: SiteDirectory,
    {
        // Shopping periods are stored for the pseudo-user on access hierarchy nodes.
        let config = ctx.resolver.config();
        let node_id = site_node(&ctx.resolver, site_ref, config.hierarchy_id())?;
        let Some(access) = ctx
            .resolver
            .find_site_access(config.shopping_period_user(), &node_id)?
        else {
            return Ok(None);
        };

        if active_only {
            let site_term = site_term(ctx, site_ref, &node_id)?;
            if !ShoppingPeriod::from(&access.state).is_open(ctx.now, site_term.as_deref()) {
                return Ok(None);
            }
        }

        let grant = AccessGrant::from_site_access(access);
        if let Some(ShoppingAuth::Authenticated) = grant.as_ref().and_then(|grant| grant.shopping_auth)
        {
            if self.user_id.is_empty() {
                return Ok(None);
            }
        }

        Ok(grant)
    }
}

/// The single node representing a site in a hierarchy.
fn site_node<S>(
    resolver: &AccessResolver<'_, S>,
    site_ref: &str,
    hierarchy_id: &str,
) -> Result<String, AccessError<S::Error>>
where
    S: HierarchyStore,
{
    let mut nodes = resolver
        .store()
        .nodes_by_site_ref(site_ref, hierarchy_id)
        .map_err(AccessError::Store)?;

    match nodes.len() {
        0 => Err(AccessError::SiteNotFound(site_ref.to_owned())),
        1 => Ok(nodes.remove(0)),
        _ => Err(AccessError::MultipleSiteNodes(site_ref.to_owned())),
    }
}

fn site_term<S, D>(
    ctx: &VisitContext<'_, S, D>,
    site_ref: &str,
    node_id: &str,
) -> Result<Option<String>, AccessError<S::Error>>
where
    S: HierarchyStore,
    D: SiteDirectory,
{
    match ctx.directory.site_term(site_ref) {
        Some(term) => Ok(Some(term)),
        None => Ok(ctx.resolver.node(node_id)?.site_term().map(str::to_owned)),
    }
}
