// SPDX-License-Identifier: MIT OR Apache-2.0

//! Writing edited access state back to the hierarchy store.
//!
//! Every change is a full rewrite of the user's tokens on a node: all existing tokens are
//! removed, then the tokens describing the working state are assigned. Nothing is written for
//! edits whose working copy equals the original.
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::codec::{PermissionSet, RealmRole};
use crate::config::Config;
use crate::error::AccessError;
use crate::event::{AccessEvent, AccessEventKind, EventBus};
use crate::state::{AccessDiff, AccessField, NodeAccessState};
use crate::store::HierarchyStore;

/// Original and edited state of one node for one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEdit {
    pub node_id: String,
    pub original: NodeAccessState,
    pub working: NodeAccessState,

    /// Set by whoever built the edit, never overridden here.
    pub editable: bool,
}

impl NodeEdit {
    pub fn new(node_id: &str, original: NodeAccessState, working: NodeAccessState) -> Self {
        Self {
            node_id: node_id.to_owned(),
            original,
            working,
            editable: true,
        }
    }

    pub fn with_editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    pub fn diff(&self) -> AccessDiff {
        self.original.diff(&self.working)
    }
}

/// What a single mutation did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    pub removed: usize,
    pub written: usize,
    pub events: Vec<AccessEvent>,
}

impl MutationOutcome {
    /// Returns true if the store was not touched.
    pub fn is_noop(&self) -> bool {
        self.removed == 0 && self.written == 0
    }
}

/// Full-rewrite writer of user access, posting an event per distinct change.
pub struct MutationPipeline<'a, S, B> {
    store: &'a S,
    events: &'a B,
    config: &'a Config,
    clock: &'a dyn Clock,
}

impl<'a, S, B> MutationPipeline<'a, S, B>
where
    S: HierarchyStore,
    B: EventBus,
{
    pub fn new(store: &'a S, events: &'a B, config: &'a Config, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            events,
            config,
            clock,
        }
    }

    /// Check an edit without writing anything.
    pub fn check(&self, edit: &NodeEdit) -> Result<(), AccessError<S::Error>> {
        if !edit.editable {
            return Err(AccessError::PermissionDenied(edit.node_id.clone()));
        }
        edit.working.validate()?;
        Ok(())
    }

    /// Persist the working state of `edit` for `user_id` on behalf of `actor_id`.
    pub fn apply_user_access(
        &self,
        edit: &NodeEdit,
        user_id: &str,
        actor_id: &str,
    ) -> Result<MutationOutcome, AccessError<S::Error>> {
        self.check(edit)?;

        let diff = edit.diff();
        if diff.is_empty() {
            trace!(user_id, node_id = %edit.node_id, "unchanged, skipping rewrite");
            return Ok(MutationOutcome::default());
        }

        let mut outcome = MutationOutcome::default();
        let node_id = edit.node_id.as_str();

        let existing = self
            .store
            .permissions_for_user_on_nodes(user_id, &[node_id])
            .map_err(AccessError::Store)?;
        for token in &existing {
            self.store
                .remove_user_node_permission(user_id, node_id, token)
                .map_err(AccessError::Store)?;
            outcome.removed += 1;
        }

        let target = self.target_permissions(edit, &diff, user_id, actor_id);
        for token in target.encode() {
            self.store
                .assign_user_node_permission(user_id, node_id, &token)
                .map_err(AccessError::Store)?;
            outcome.written += 1;
        }

        debug!(
            user_id,
            node_id,
            actor_id,
            removed = outcome.removed,
            written = outcome.written,
            "rewrote node permissions"
        );

        outcome.events = self.events_for(edit, &diff, user_id, target.realm_role());
        for event in &outcome.events {
            self.events.post(event.clone());
        }

        Ok(outcome)
    }

    /// Apply every modified edit of a tree. All edits are checked before the first write.
    pub fn apply_tree(
        &self,
        edits: &[NodeEdit],
        user_id: &str,
        actor_id: &str,
    ) -> Result<Vec<MutationOutcome>, AccessError<S::Error>> {
        for edit in edits {
            self.check(edit)?;
        }

        edits
            .iter()
            .map(|edit| self.apply_user_access(edit, user_id, actor_id))
            .collect()
    }

    fn target_permissions(
        &self,
        edit: &NodeEdit,
        diff: &AccessDiff,
        user_id: &str,
        actor_id: &str,
    ) -> PermissionSet {
        let working = &edit.working;
        let shopping_user = self.config.is_shopping_period_user(user_id);
        let now = self.clock.now();

        let mut target = PermissionSet {
            access_admin: working.access_admin && !shopping_user,
            shopping_admin: working.shopping_admin && !shopping_user,
            ..Default::default()
        };

        if working.direct_access {
            target.site_visit = true;
            if let Some(pair) = RealmRole::new(working.realm.clone(), working.role.clone()) {
                target.realm = Some(pair.realm().to_owned());
                target.role = Some(pair.role().to_owned());
            }
            target.denied_tools = working.denied_tools.clone();
            target.terms = working.allowed_terms.clone();

            if shopping_user {
                target.shopping_auth = working.shopping_auth_mode().map(|auth| auth.to_string());
                target.shopping_start = working.shopping_start;
                target.shopping_end = working.shopping_end;
            }
        }

        if target.site_visit || target.access_admin || target.shopping_admin {
            target.modified = Some(now);
            target.modified_by = Some(actor_id.to_owned());
        }

        if !shopping_user {
            if diff.contains(AccessField::ShoppingAdmin) {
                target.shopping_admin_modified = Some(now);
                target.shopping_admin_modified_by = Some(actor_id.to_owned());
            } else {
                target.shopping_admin_modified = edit.original.shopping_admin_modified;
                target.shopping_admin_modified_by = edit.original.shopping_admin_modified_by.clone();
            }
        }

        target
    }

    fn events_for(
        &self,
        edit: &NodeEdit,
        diff: &AccessDiff,
        user_id: &str,
        realm_role: Option<RealmRole>,
    ) -> Vec<AccessEvent> {
        let node_id = edit.node_id.as_str();
        let shopping_user = self.config.is_shopping_period_user(user_id);
        let event = |kind| AccessEvent::new(kind, user_id, node_id);
        let mut events = Vec::new();

        match (edit.original.direct_access, edit.working.direct_access) {
            (false, true) => {
                events.push(event(AccessEventKind::AccessGranted).with_realm_role(realm_role))
            }
            (true, false) => events.push(event(AccessEventKind::AccessRevoked)),
            (true, true) if diff.settings_changed() => {
                events.push(event(AccessEventKind::AccessModified).with_realm_role(realm_role))
            }
            _ => (),
        }

        if !shopping_user && diff.contains(AccessField::ShoppingAdmin) {
            events.push(event(if edit.working.shopping_admin {
                AccessEventKind::ShoppingAdminGranted
            } else {
                AccessEventKind::ShoppingAdminRevoked
            }));
        }

        if !shopping_user && diff.contains(AccessField::AccessAdmin) {
            events.push(event(if edit.working.access_admin {
                AccessEventKind::AccessAdminGranted
            } else {
                AccessEventKind::AccessAdminRevoked
            }));
        }

        events
    }
}
