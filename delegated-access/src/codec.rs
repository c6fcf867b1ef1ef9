// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flat permission tokens stored per (user, node) pair and their typed decoding.
//!
//! The hierarchy store keeps permissions as plain strings with a small fixed prefix vocabulary.
//! [`PermissionToken`] is the typed form of a single string and [`PermissionSet`] is the record
//! of everything one user holds on one node. Decoding is lenient: unparseable timestamps are
//! dropped and unknown prefixes land in an extension bucket instead of failing.
use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

pub const REALM_PREFIX: &str = "realm:";
pub const ROLE_PREFIX: &str = "role:";
pub const DENY_TOOL_PREFIX: &str = "denyTool:";
pub const TERM_PREFIX: &str = "term:";
pub const SITE_VISIT: &str = "site.visit";
pub const SHOPPING_ADMIN: &str = "shoppingAdmin";
pub const ACCESS_ADMIN: &str = "accessAdmin";
pub const SHOPPING_AUTH_PREFIX: &str = "shoppingAuth:";
pub const SHOPPING_START_DATE_PREFIX: &str = "shoppingStartDate:";
pub const SHOPPING_END_DATE_PREFIX: &str = "shoppingEndDate:";
pub const MODIFIED_PREFIX: &str = "modified:";
pub const MODIFIED_BY_PREFIX: &str = "modifiedBy:";
pub const SHOPPING_ADMIN_MODIFIED_PREFIX: &str = "shoppingAdminModified:";
pub const SHOPPING_ADMIN_MODIFIED_BY_PREFIX: &str = "shoppingAdminModifiedBy:";

/// Literal some external writers store instead of leaving a value empty.
const NULL_LITERAL: &str = "null";

/// A stored token which carries a known prefix but an unusable value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed permission token \"{token}\": {reason}")]
pub struct MalformedToken {
    pub token: String,
    pub reason: &'static str,
}

/// A single typed permission fact about a (user, node) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PermissionToken {
    /// The node grants delegated access itself instead of inheriting it.
    SiteVisit,

    /// Realm the delegated role is taken from.
    Realm(String),

    /// Role inside the realm.
    Role(String),

    /// Tool hidden from the user, one token per tool.
    DenyTool(String),

    /// Course term the access is restricted to, one token per term.
    Term(String),

    /// User may edit shopping period settings at and below this node.
    ShoppingAdmin,

    /// User may grant delegated access to others at and below this node.
    AccessAdmin,

    /// Authorization mode of the shopping period (`.anon` or `.auth`).
    ShoppingAuth(String),

    ShoppingStartDate(DateTime<Utc>),

    ShoppingEndDate(DateTime<Utc>),

    Modified(DateTime<Utc>),

    ModifiedBy(String),

    ShoppingAdminModified(DateTime<Utc>),

    ShoppingAdminModifiedBy(String),

    /// Token written by a newer or foreign writer, kept as-is.
    Unknown(String),
}

impl PermissionToken {
    /// Encode this token into its stored string form.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Returns true for the three marker tokens which put a node into a user's seed set.
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            PermissionToken::SiteVisit | PermissionToken::ShoppingAdmin | PermissionToken::AccessAdmin
        )
    }
}

fn parse_millis(token: &str, value: &str) -> Result<DateTime<Utc>, MalformedToken> {
    let millis: i64 = value.parse().map_err(|_| MalformedToken {
        token: token.to_owned(),
        reason: "timestamp is not an integer",
    })?;

    DateTime::from_timestamp_millis(millis).ok_or_else(|| MalformedToken {
        token: token.to_owned(),
        reason: "timestamp out of range",
    })
}

impl FromStr for PermissionToken {
    type Err = MalformedToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Exact markers first, longer prefixes before the shorter ones they start with.
        let token = match s {
            SITE_VISIT => PermissionToken::SiteVisit,
            SHOPPING_ADMIN => PermissionToken::ShoppingAdmin,
            ACCESS_ADMIN => PermissionToken::AccessAdmin,
            _ => {
                if let Some(value) = s.strip_prefix(REALM_PREFIX) {
                    PermissionToken::Realm(value.to_owned())
                } else if let Some(value) = s.strip_prefix(ROLE_PREFIX) {
                    PermissionToken::Role(value.to_owned())
                } else if let Some(value) = s.strip_prefix(DENY_TOOL_PREFIX) {
                    PermissionToken::DenyTool(value.to_owned())
                } else if let Some(value) = s.strip_prefix(TERM_PREFIX) {
                    PermissionToken::Term(value.to_owned())
                } else if let Some(value) = s.strip_prefix(SHOPPING_AUTH_PREFIX) {
                    PermissionToken::ShoppingAuth(value.to_owned())
                } else if let Some(value) = s.strip_prefix(SHOPPING_START_DATE_PREFIX) {
                    PermissionToken::ShoppingStartDate(parse_millis(s, value)?)
                } else if let Some(value) = s.strip_prefix(SHOPPING_END_DATE_PREFIX) {
                    PermissionToken::ShoppingEndDate(parse_millis(s, value)?)
                } else if let Some(value) = s.strip_prefix(SHOPPING_ADMIN_MODIFIED_BY_PREFIX) {
                    PermissionToken::ShoppingAdminModifiedBy(value.to_owned())
                } else if let Some(value) = s.strip_prefix(SHOPPING_ADMIN_MODIFIED_PREFIX) {
                    PermissionToken::ShoppingAdminModified(parse_millis(s, value)?)
                } else if let Some(value) = s.strip_prefix(MODIFIED_BY_PREFIX) {
                    PermissionToken::ModifiedBy(value.to_owned())
                } else if let Some(value) = s.strip_prefix(MODIFIED_PREFIX) {
                    PermissionToken::Modified(parse_millis(s, value)?)
                } else {
                    PermissionToken::Unknown(s.to_owned())
                }
            }
        };

        Ok(token)
    }
}

impl Display for PermissionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionToken::SiteVisit => write!(f, "{SITE_VISIT}"),
            PermissionToken::Realm(realm) => write!(f, "{REALM_PREFIX}{realm}"),
            PermissionToken::Role(role) => write!(f, "{ROLE_PREFIX}{role}"),
            PermissionToken::DenyTool(tool) => write!(f, "{DENY_TOOL_PREFIX}{tool}"),
            PermissionToken::Term(term) => write!(f, "{TERM_PREFIX}{term}"),
            PermissionToken::ShoppingAdmin => write!(f, "{SHOPPING_ADMIN}"),
            PermissionToken::AccessAdmin => write!(f, "{ACCESS_ADMIN}"),
            PermissionToken::ShoppingAuth(auth) => write!(f, "{SHOPPING_AUTH_PREFIX}{auth}"),
            PermissionToken::ShoppingStartDate(date) => {
                write!(f, "{SHOPPING_START_DATE_PREFIX}{}", date.timestamp_millis())
            }
            PermissionToken::ShoppingEndDate(date) => {
                write!(f, "{SHOPPING_END_DATE_PREFIX}{}", date.timestamp_millis())
            }
            PermissionToken::Modified(date) => {
                write!(f, "{MODIFIED_PREFIX}{}", date.timestamp_millis())
            }
            PermissionToken::ModifiedBy(user) => write!(f, "{MODIFIED_BY_PREFIX}{user}"),
            PermissionToken::ShoppingAdminModified(date) => write!(
                f,
                "{SHOPPING_ADMIN_MODIFIED_PREFIX}{}",
                date.timestamp_millis()
            ),
            PermissionToken::ShoppingAdminModifiedBy(user) => {
                write!(f, "{SHOPPING_ADMIN_MODIFIED_BY_PREFIX}{user}")
            }
            PermissionToken::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

/// Returns true when a realm or role value can be written to the store.
pub fn is_usable_value(value: &str) -> bool {
    !value.is_empty() && value != NULL_LITERAL
}

/// A realm and role pair which is always complete.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RealmRole {
    realm: String,
    role: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("\"{0}\" is not a <realm>:<role> pair")]
pub struct InvalidRealmRole(pub String);

impl RealmRole {
    /// Returns `None` if either part is empty or the literal "null".
    pub fn new(realm: impl Into<String>, role: impl Into<String>) -> Option<Self> {
        let realm = realm.into();
        let role = role.into();
        if is_usable_value(&realm) && is_usable_value(&role) {
            Some(Self { realm, role })
        } else {
            None
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn role(&self) -> &str {
        &self.role
    }
}

impl FromStr for RealmRole {
    type Err = InvalidRealmRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (realm, role) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidRealmRole(s.to_owned()))?;
        RealmRole::new(realm, role).ok_or_else(|| InvalidRealmRole(s.to_owned()))
    }
}

impl Display for RealmRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.realm, self.role)
    }
}

/// Typed record of every token one user holds on one node.
///
/// At most one realm and one role can be held. Tool and term restrictions are sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PermissionSet {
    pub site_visit: bool,
    pub realm: Option<String>,
    pub role: Option<String>,
    pub denied_tools: BTreeSet<String>,
    pub terms: BTreeSet<String>,
    pub shopping_admin: bool,
    pub access_admin: bool,
    pub shopping_auth: Option<String>,
    pub shopping_start: Option<DateTime<Utc>>,
    pub shopping_end: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
    pub shopping_admin_modified: Option<DateTime<Utc>>,
    pub shopping_admin_modified_by: Option<String>,

    /// Tokens with a prefix outside the known vocabulary.
    ///
    /// They are kept for inspection but never re-encoded: a full permission rewrite drops them.
    pub unknown: BTreeSet<String>,
}

/// Set a single-valued field, keeping the first value seen.
fn set_once<T: PartialEq + std::fmt::Debug>(slot: &mut Option<T>, value: T, field: &str) {
    match slot {
        Some(current) if *current != value => {
            warn!(field, ?current, ignored = ?value, "conflicting permission tokens");
        }
        Some(_) => (),
        None => *slot = Some(value),
    }
}

impl PermissionSet {
    /// Decode stored tokens in a single pass.
    ///
    /// Malformed tokens are dropped. Where more than one realm, role or other single-valued
    /// token exists the first one in iteration order wins.
    pub fn decode<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut set = PermissionSet::default();

        for raw in tokens {
            let raw = raw.as_ref();
            let token = match raw.parse::<PermissionToken>() {
                Ok(token) => token,
                Err(err) => {
                    trace!("dropping token: {err}");
                    continue;
                }
            };

            match token {
                PermissionToken::SiteVisit => set.site_visit = true,
                PermissionToken::Realm(realm) => {
                    if is_usable_value(&realm) {
                        set_once(&mut set.realm, realm, "realm");
                    }
                }
                PermissionToken::Role(role) => {
                    if is_usable_value(&role) {
                        set_once(&mut set.role, role, "role");
                    }
                }
                PermissionToken::DenyTool(tool) => {
                    set.denied_tools.insert(tool);
                }
                PermissionToken::Term(term) => {
                    set.terms.insert(term);
                }
                PermissionToken::ShoppingAdmin => set.shopping_admin = true,
                PermissionToken::AccessAdmin => set.access_admin = true,
                PermissionToken::ShoppingAuth(auth) => {
                    if !auth.is_empty() {
                        set_once(&mut set.shopping_auth, auth, "shopping_auth");
                    }
                }
                PermissionToken::ShoppingStartDate(date) => {
                    set_once(&mut set.shopping_start, date, "shopping_start")
                }
                PermissionToken::ShoppingEndDate(date) => {
                    set_once(&mut set.shopping_end, date, "shopping_end")
                }
                PermissionToken::Modified(date) => set_once(&mut set.modified, date, "modified"),
                PermissionToken::ModifiedBy(user) => {
                    set_once(&mut set.modified_by, user, "modified_by")
                }
                PermissionToken::ShoppingAdminModified(date) => set_once(
                    &mut set.shopping_admin_modified,
                    date,
                    "shopping_admin_modified",
                ),
                PermissionToken::ShoppingAdminModifiedBy(user) => set_once(
                    &mut set.shopping_admin_modified_by,
                    user,
                    "shopping_admin_modified_by",
                ),
                PermissionToken::Unknown(raw) => {
                    set.unknown.insert(raw);
                }
            }
        }

        set
    }

    /// Typed tokens for every known field which is set.
    pub fn tokens(&self) -> Vec<PermissionToken> {
        let mut tokens = Vec::new();

        if self.access_admin {
            tokens.push(PermissionToken::AccessAdmin);
        }
        if self.shopping_admin {
            tokens.push(PermissionToken::ShoppingAdmin);
        }
        if self.site_visit {
            tokens.push(PermissionToken::SiteVisit);
        }
        if let Some(realm) = &self.realm {
            tokens.push(PermissionToken::Realm(realm.clone()));
        }
        if let Some(role) = &self.role {
            tokens.push(PermissionToken::Role(role.clone()));
        }
        tokens.extend(self.denied_tools.iter().cloned().map(PermissionToken::DenyTool));
        tokens.extend(self.terms.iter().cloned().map(PermissionToken::Term));
        if let Some(auth) = &self.shopping_auth {
            tokens.push(PermissionToken::ShoppingAuth(auth.clone()));
        }
        if let Some(date) = self.shopping_start {
            tokens.push(PermissionToken::ShoppingStartDate(date));
        }
        if let Some(date) = self.shopping_end {
            tokens.push(PermissionToken::ShoppingEndDate(date));
        }
        if let Some(date) = self.modified {
            tokens.push(PermissionToken::Modified(date));
        }
        if let Some(user) = &self.modified_by {
            tokens.push(PermissionToken::ModifiedBy(user.clone()));
        }
        if let Some(date) = self.shopping_admin_modified {
            tokens.push(PermissionToken::ShoppingAdminModified(date));
        }
        if let Some(user) = &self.shopping_admin_modified_by {
            tokens.push(PermissionToken::ShoppingAdminModifiedBy(user.clone()));
        }

        tokens
    }

    /// Stored string form of [`PermissionSet::tokens`].
    pub fn encode(&self) -> Vec<String> {
        self.tokens().iter().map(PermissionToken::encode).collect()
    }

    /// Realm and role as a complete pair, if both are held.
    pub fn realm_role(&self) -> Option<RealmRole> {
        match (&self.realm, &self.role) {
            (Some(realm), Some(role)) => RealmRole::new(realm.clone(), role.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{DateTime, Utc};

    use super::{PermissionSet, PermissionToken, RealmRole};

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn parse_vocabulary() {
        assert_eq!("site.visit".parse(), Ok(PermissionToken::SiteVisit));
        assert_eq!("shoppingAdmin".parse(), Ok(PermissionToken::ShoppingAdmin));
        assert_eq!("accessAdmin".parse(), Ok(PermissionToken::AccessAdmin));
        assert_eq!(
            "realm:!site.template".parse(),
            Ok(PermissionToken::Realm("!site.template".into()))
        );
        assert_eq!(
            "denyTool:sakai.gradebook".parse(),
            Ok(PermissionToken::DenyTool("sakai.gradebook".into()))
        );
        assert_eq!(
            "shoppingAdminModified:1000".parse(),
            Ok(PermissionToken::ShoppingAdminModified(at(1000)))
        );
        assert_eq!(
            "shoppingAdminModifiedBy:admin".parse(),
            Ok(PermissionToken::ShoppingAdminModifiedBy("admin".into()))
        );
        assert_eq!(
            "modifiedBy:admin".parse(),
            Ok(PermissionToken::ModifiedBy("admin".into()))
        );
        assert_eq!("modified:42".parse(), Ok(PermissionToken::Modified(at(42))));
        assert_eq!(
            "siteHierarchyJobLastRunDate:1".parse(),
            Ok(PermissionToken::Unknown("siteHierarchyJobLastRunDate:1".into()))
        );
    }

    #[test]
    fn encoding_is_bit_exact() {
        let tokens = [
            "site.visit",
            "realm:/site/abc",
            "role:Instructor",
            "shoppingStartDate:1325376000000",
            "shoppingAdminModified:1325376000000",
            "shoppingAdminModifiedBy:admin",
        ];
        for raw in tokens {
            let token: PermissionToken = raw.parse().unwrap();
            assert_eq!(token.encode(), raw);
        }
    }

    #[test]
    fn malformed_timestamps_are_dropped() {
        let set = PermissionSet::decode([
            "site.visit",
            "shoppingStartDate:yesterday",
            "shoppingEndDate:2000",
            "modified:",
        ]);

        assert!(set.site_visit);
        assert_eq!(set.shopping_start, None);
        assert_eq!(set.shopping_end, Some(at(2000)));
        assert_eq!(set.modified, None);
    }

    #[test]
    fn decode_and_encode_full_set() {
        let set = PermissionSet {
            site_visit: true,
            realm: Some("!site.template.course".into()),
            role: Some("Student".into()),
            denied_tools: BTreeSet::from(["sakai.chat".into(), "sakai.forums".into()]),
            terms: BTreeSet::from(["Fall 2024".into(), "Spring 2025".into()]),
            shopping_auth: Some(".auth".into()),
            shopping_start: Some(at(1_000)),
            shopping_end: Some(at(9_000)),
            modified: Some(at(500)),
            modified_by: Some("admin".into()),
            ..Default::default()
        };

        let encoded = set.encode();
        assert_eq!(encoded.len(), 12);
        assert_eq!(PermissionSet::decode(&encoded), set);
    }

    #[test]
    fn unknown_tokens_are_kept_but_not_encoded() {
        let set = PermissionSet::decode(["accessAdmin", "futureFlag:1"]);
        assert!(set.access_admin);
        assert!(set.unknown.contains("futureFlag:1"));
        assert_eq!(set.encode(), vec!["accessAdmin".to_string()]);
    }

    #[test]
    fn first_realm_wins() {
        let tokens = BTreeSet::from(["realm:a".to_string(), "realm:b".to_string()]);
        let set = PermissionSet::decode(&tokens);
        assert_eq!(set.realm.as_deref(), Some("a"));
    }

    #[test]
    fn null_realm_role_is_absent() {
        let set = PermissionSet::decode(["site.visit", "realm:null", "role:"]);
        assert_eq!(set.realm, None);
        assert_eq!(set.role, None);
        assert_eq!(set.realm_role(), None);
    }

    #[test]
    fn realm_role_pairs() {
        let pair: RealmRole = "/site/abc:access".parse().unwrap();
        assert_eq!(pair.realm(), "/site/abc");
        assert_eq!(pair.role(), "access");
        assert_eq!(pair.to_string(), "/site/abc:access");

        assert!("noseparator".parse::<RealmRole>().is_err());
        assert!("realm:null".parse::<RealmRole>().is_err());
        assert!(":role".parse::<RealmRole>().is_err());
    }
}
