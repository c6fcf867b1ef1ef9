// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::codec::{PermissionSet, RealmRole, is_usable_value};
use crate::error::InvalidInput;

/// Authorization mode of a shopping period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShoppingAuth {
    /// Open to anyone, including visitors who are not logged in.
    Anonymous,

    /// Open to every logged in user.
    Authenticated,
}

impl ShoppingAuth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShoppingAuth::Anonymous => ".anon",
            ShoppingAuth::Authenticated => ".auth",
        }
    }
}

impl FromStr for ShoppingAuth {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ".anon" => Ok(ShoppingAuth::Anonymous),
            ".auth" => Ok(ShoppingAuth::Authenticated),
            _ => Err(InvalidInput::new(
                "shoppingAuth",
                format!("\"{s}\" is neither .anon nor .auth"),
            )),
        }
    }
}

impl Display for ShoppingAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access settings one user holds directly on one node.
///
/// Derived from a [`PermissionSet`] and never stored as such. Editing works on two snapshots of
/// this value, the original as read from the store and a working copy, compared with
/// [`NodeAccessState::diff`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeAccessState {
    pub direct_access: bool,
    pub realm: String,
    pub role: String,
    pub denied_tools: BTreeSet<String>,
    pub allowed_terms: BTreeSet<String>,
    pub shopping_admin: bool,
    pub access_admin: bool,
    pub shopping_auth: Option<String>,
    pub shopping_start: Option<DateTime<Utc>>,
    pub shopping_end: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
    pub shopping_admin_modified: Option<DateTime<Utc>>,
    pub shopping_admin_modified_by: Option<String>,
}

impl From<&PermissionSet> for NodeAccessState {
    fn from(set: &PermissionSet) -> Self {
        Self {
            direct_access: set.site_visit,
            realm: set.realm.clone().unwrap_or_default(),
            role: set.role.clone().unwrap_or_default(),
            denied_tools: set.denied_tools.clone(),
            allowed_terms: set.terms.clone(),
            shopping_admin: set.shopping_admin,
            access_admin: set.access_admin,
            shopping_auth: set.shopping_auth.clone(),
            shopping_start: set.shopping_start,
            shopping_end: set.shopping_end,
            modified: set.modified,
            modified_by: set.modified_by.clone(),
            shopping_admin_modified: set.shopping_admin_modified,
            shopping_admin_modified_by: set.shopping_admin_modified_by.clone(),
        }
    }
}

impl From<PermissionSet> for NodeAccessState {
    fn from(set: PermissionSet) -> Self {
        Self::from(&set)
    }
}

impl NodeAccessState {
    /// Realm and role as a complete pair, `None` when either is missing or "null".
    pub fn realm_role(&self) -> Option<RealmRole> {
        RealmRole::new(self.realm.clone(), self.role.clone())
    }

    /// Returns true if any kind of grant remains on this node.
    pub fn has_any_access(&self) -> bool {
        self.direct_access || self.shopping_admin || self.access_admin
    }

    pub fn with_direct_access(mut self, realm_role: Option<&RealmRole>) -> Self {
        self.direct_access = true;
        match realm_role {
            Some(pair) => {
                self.realm = pair.realm().to_owned();
                self.role = pair.role().to_owned();
            }
            None => {
                self.realm.clear();
                self.role.clear();
            }
        }
        self
    }

    /// Parsed shopping authorization mode, `None` if absent or unrecognised.
    pub fn shopping_auth_mode(&self) -> Option<ShoppingAuth> {
        self.shopping_auth.as_deref().and_then(|auth| auth.parse().ok())
    }

    /// Field-by-field comparison of every value an editor can change.
    ///
    /// Modification stamps are bookkeeping and never count as a change.
    pub fn diff(&self, other: &NodeAccessState) -> AccessDiff {
        let mut fields = Vec::new();
        let mut check = |field: AccessField, changed: bool| {
            if changed {
                fields.push(field);
            }
        };

        check(AccessField::DirectAccess, self.direct_access != other.direct_access);
        check(AccessField::Realm, self.realm != other.realm);
        check(AccessField::Role, self.role != other.role);
        check(AccessField::DeniedTools, self.denied_tools != other.denied_tools);
        check(AccessField::Terms, self.allowed_terms != other.allowed_terms);
        check(AccessField::ShoppingAuth, self.shopping_auth != other.shopping_auth);
        check(AccessField::ShoppingStart, self.shopping_start != other.shopping_start);
        check(AccessField::ShoppingEnd, self.shopping_end != other.shopping_end);
        check(AccessField::ShoppingAdmin, self.shopping_admin != other.shopping_admin);
        check(AccessField::AccessAdmin, self.access_admin != other.access_admin);

        AccessDiff { fields }
    }

    /// Check the values a mutation would write.
    pub fn validate(&self) -> Result<(), InvalidInput> {
        if self.direct_access {
            match (is_usable_value(&self.realm), is_usable_value(&self.role)) {
                (true, false) => {
                    return Err(InvalidInput::new("role", "a realm was given without a role"));
                }
                (false, true) => {
                    return Err(InvalidInput::new("realm", "a role was given without a realm"));
                }
                _ => (),
            }
        }

        if let Some(auth) = self.shopping_auth.as_deref() {
            if is_usable_value(auth) {
                auth.parse::<ShoppingAuth>()?;
            }
        }

        if let (Some(start), Some(end)) = (self.shopping_start, self.shopping_end) {
            if end < start {
                return Err(InvalidInput::new(
                    "shoppingEndDate",
                    format!("end {end} is before start {start}"),
                ));
            }
        }

        Ok(())
    }
}

/// Editable fields of a [`NodeAccessState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessField {
    DirectAccess,
    Realm,
    Role,
    DeniedTools,
    Terms,
    ShoppingAuth,
    ShoppingStart,
    ShoppingEnd,
    ShoppingAdmin,
    AccessAdmin,
}

/// Fields which differ between two snapshots of the same node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessDiff {
    fields: Vec<AccessField>,
}

impl AccessDiff {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: AccessField) -> bool {
        self.fields.contains(&field)
    }

    pub fn fields(&self) -> &[AccessField] {
        &self.fields
    }

    /// Returns true if a value of the access grant itself changed, ignoring the admin flags and
    /// the direct access toggle.
    pub fn settings_changed(&self) -> bool {
        self.fields.iter().any(|field| {
            !matches!(
                field,
                AccessField::DirectAccess | AccessField::ShoppingAdmin | AccessField::AccessAdmin
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, Utc};

    use crate::codec::{PermissionSet, RealmRole};

    use super::{AccessField, NodeAccessState, ShoppingAuth};

    #[test]
    fn derived_from_permissions() {
        let set = PermissionSet::decode(["site.visit", "realm:r", "role:x", "term:F24", "accessAdmin"]);
        let state = NodeAccessState::from(&set);

        assert!(state.direct_access);
        assert!(state.access_admin);
        assert!(!state.shopping_admin);
        assert_eq!(state.realm_role(), RealmRole::new("r", "x"));
        assert_eq!(state.allowed_terms, BTreeSet::from(["F24".to_string()]));
    }

    #[test]
    fn identical_snapshots_have_no_diff() {
        let original = NodeAccessState::default().with_direct_access(RealmRole::new("r", "x").as_ref());
        let mut working = original.clone();
        working.modified = Some(Utc::now());

        assert!(original.diff(&working).is_empty());
    }

    #[test]
    fn diff_reports_changed_fields() {
        let original = NodeAccessState::default();
        let mut working = original.clone();
        working.access_admin = true;
        working.denied_tools.insert("sakai.chat".into());

        let diff = original.diff(&working);
        assert_eq!(diff.fields(), &[AccessField::DeniedTools, AccessField::AccessAdmin]);
        assert!(diff.settings_changed());

        let mut toggled = original.clone();
        toggled.shopping_admin = true;
        assert!(!original.diff(&toggled).settings_changed());
    }

    #[test]
    fn validation() {
        let mut state = NodeAccessState {
            direct_access: true,
            realm: "r".into(),
            ..Default::default()
        };
        assert_eq!(state.validate().unwrap_err().field, "role");

        state.role = "x".into();
        assert!(state.validate().is_ok());

        state.shopping_auth = Some("public".into());
        assert_eq!(state.validate().unwrap_err().field, "shoppingAuth");

        state.shopping_auth = Some(ShoppingAuth::Anonymous.to_string());
        let now = Utc::now();
        state.shopping_start = Some(now);
        state.shopping_end = Some(now - Duration::days(1));
        assert_eq!(state.validate().unwrap_err().field, "shoppingEndDate");
    }
}
