// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shopping period evaluation.
//!
//! A shopping period opens a site to visitors who are not members for a limited time, either
//! anonymously or for any logged in user. Whether it is open is a pure function of the stored
//! settings, the site's course term and the current time.
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::codec::RealmRole;
use crate::error::InvalidInput;
use crate::state::{NodeAccessState, ShoppingAuth};

/// Settings of a shopping period as stored on a node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShoppingPeriod<'a> {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub realm_role: Option<RealmRole>,
    pub auth: Option<&'a str>,
    pub allowed_terms: Option<&'a BTreeSet<String>>,
}

impl<'a> From<&'a NodeAccessState> for ShoppingPeriod<'a> {
    fn from(state: &'a NodeAccessState) -> Self {
        Self {
            start: state.shopping_start,
            end: state.shopping_end,
            realm_role: state.realm_role(),
            auth: state.shopping_auth.as_deref(),
            allowed_terms: Some(&state.allowed_terms),
        }
    }
}

impl ShoppingPeriod<'_> {
    /// Returns true if every gate passes at `now` for a site in `site_term`.
    pub fn is_open(&self, now: DateTime<Utc>, site_term: Option<&str>) -> bool {
        date_gate(self.start, self.end, now)
            && self.realm_role.is_some()
            && self
                .auth
                .is_some_and(|auth| auth.parse::<ShoppingAuth>().is_ok())
            && term_gate(self.allowed_terms, site_term)
    }
}

/// Open inside `[start, end]`. With one bound only that bound is checked, with none the period
/// is never open.
fn date_gate(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match (start, end) {
        (Some(start), Some(end)) => start <= now && now <= end,
        (Some(start), None) => start <= now,
        (None, Some(end)) => now <= end,
        (None, None) => false,
    }
}

/// An empty or missing restriction lets every term pass.
pub fn term_gate(allowed_terms: Option<&BTreeSet<String>>, site_term: Option<&str>) -> bool {
    match allowed_terms {
        Some(terms) if !terms.is_empty() => match site_term {
            Some(term) if !term.is_empty() => terms.contains(term),
            _ => false,
        },
        _ => true,
    }
}

/// Returns true if the shopping period described by the arguments is open at `now`.
pub fn is_open(
    now: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    realm_role: Option<&RealmRole>,
    auth: Option<&str>,
    allowed_terms: &BTreeSet<String>,
    site_term: Option<&str>,
) -> bool {
    ShoppingPeriod {
        start,
        end,
        realm_role: realm_role.cloned(),
        auth,
        allowed_terms: Some(allowed_terms),
    }
    .is_open(now, site_term)
}

/// Shopping settings submitted for a single site, for example through a REST endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShoppingSettings {
    pub direct_access: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub realm_role: Option<RealmRole>,
    pub auth: Option<ShoppingAuth>,
}

/// Accepts epoch milliseconds or an RFC 3339 timestamp.
pub fn parse_date(field: &'static str, value: &str) -> Result<DateTime<Utc>, InvalidInput> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| InvalidInput::new(field, format!("{millis} is out of range")));
    }

    DateTime::parse_from_rfc3339(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|err| InvalidInput::new(field, format!("\"{value}\" is not a date: {err}")))
}

fn non_empty<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

impl ShoppingSettings {
    /// Parse submitted parameters, failing on the first invalid field.
    ///
    /// Missing `directAccess` defaults to true.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, InvalidInput> {
        let start = non_empty(params, "shoppingStartDate")
            .map(|value| parse_date("shoppingStartDate", value))
            .transpose()?;
        let end = non_empty(params, "shoppingEndDate")
            .map(|value| parse_date("shoppingEndDate", value))
            .transpose()?;

        let realm_role = match (
            non_empty(params, "shoppingRealm"),
            non_empty(params, "shoppingRole"),
        ) {
            (None, None) => None,
            (Some(realm), Some(role)) => Some(RealmRole::new(realm, role).ok_or_else(|| {
                InvalidInput::new("shoppingRealm", format!("\"{realm}:{role}\" is not usable"))
            })?),
            (Some(_), None) => {
                return Err(InvalidInput::new("shoppingRole", "missing while a realm is given"));
            }
            (None, Some(_)) => {
                return Err(InvalidInput::new("shoppingRealm", "missing while a role is given"));
            }
        };

        let auth = non_empty(params, "shoppingAuth")
            .map(str::parse::<ShoppingAuth>)
            .transpose()?;

        let direct_access = match non_empty(params, "directAccess") {
            None => true,
            Some(value) => value.parse::<bool>().map_err(|_| {
                InvalidInput::new("directAccess", format!("\"{value}\" is not a boolean"))
            })?,
        };

        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return Err(InvalidInput::new("shoppingEndDate", "ends before the start date"));
            }
        }

        Ok(Self {
            direct_access,
            start,
            end,
            realm_role,
            auth,
        })
    }

    /// Working copy of `state` with these settings applied. Tool and term selections are kept.
    pub fn apply_to(&self, state: &NodeAccessState) -> NodeAccessState {
        let mut working = state.clone();
        working.direct_access = self.direct_access;
        match &self.realm_role {
            Some(pair) => {
                working.realm = pair.realm().to_owned();
                working.role = pair.role().to_owned();
            }
            None => {
                working.realm.clear();
                working.role.clear();
            }
        }
        working.shopping_auth = self.auth.map(|auth| auth.as_str().to_owned());
        working.shopping_start = self.start;
        working.shopping_end = self.end;
        working
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use chrono::{Duration, TimeZone, Utc};

    use crate::codec::RealmRole;
    use crate::state::{NodeAccessState, ShoppingAuth};

    use super::{ShoppingSettings, is_open, parse_date, term_gate};

    fn realm_role() -> Option<RealmRole> {
        RealmRole::new("!site.template.course", "Student")
    }

    #[test]
    fn open_inside_window() {
        let now = Utc::now();
        assert!(is_open(
            now,
            Some(now - Duration::days(1)),
            Some(now + Duration::days(1)),
            realm_role().as_ref(),
            Some(".auth"),
            &BTreeSet::new(),
            None,
        ));
    }

    #[test]
    fn never_open_without_dates() {
        let now = Utc::now();
        assert!(!is_open(
            now,
            None,
            None,
            realm_role().as_ref(),
            Some(".anon"),
            &BTreeSet::new(),
            None,
        ));
    }

    #[test]
    fn single_bound() {
        let now = Utc::now();
        let open = |start, end| {
            is_open(now, start, end, realm_role().as_ref(), Some(".anon"), &BTreeSet::new(), None)
        };

        assert!(open(Some(now - Duration::hours(1)), None));
        assert!(!open(Some(now + Duration::hours(1)), None));
        assert!(open(None, Some(now + Duration::hours(1))));
        assert!(!open(None, Some(now - Duration::hours(1))));
    }

    #[test]
    fn every_gate_must_pass() {
        let now = Utc::now();
        let start = Some(now - Duration::days(1));
        let end = Some(now + Duration::days(1));
        let terms = BTreeSet::from(["Fall 2024".to_string()]);

        // Missing realm and role.
        assert!(!is_open(now, start, end, None, Some(".auth"), &BTreeSet::new(), None));

        // Missing or unknown authorization mode.
        assert!(!is_open(now, start, end, realm_role().as_ref(), None, &BTreeSet::new(), None));
        assert!(!is_open(
            now,
            start,
            end,
            realm_role().as_ref(),
            Some("public"),
            &BTreeSet::new(),
            None
        ));

        // Term restriction.
        assert!(is_open(
            now,
            start,
            end,
            realm_role().as_ref(),
            Some(".auth"),
            &terms,
            Some("Fall 2024")
        ));
        assert!(!is_open(
            now,
            start,
            end,
            realm_role().as_ref(),
            Some(".auth"),
            &terms,
            Some("Spring 2025")
        ));
        assert!(!is_open(now, start, end, realm_role().as_ref(), Some(".auth"), &terms, None));
    }

    #[test]
    fn term_restriction() {
        let terms = BTreeSet::from(["F24".to_string()]);
        assert!(term_gate(None, None));
        assert!(term_gate(Some(&BTreeSet::new()), Some("S25")));
        assert!(term_gate(Some(&terms), Some("F24")));
        assert!(!term_gate(Some(&terms), Some("")));
    }

    #[test]
    fn dates_from_millis_or_rfc3339() {
        let expected = Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_date("shoppingStartDate", "1325376000000").unwrap(), expected);
        assert_eq!(
            parse_date("shoppingStartDate", "2012-01-01T00:00:00Z").unwrap(),
            expected
        );

        let err = parse_date("shoppingEndDate", "next tuesday").unwrap_err();
        assert_eq!(err.field, "shoppingEndDate");
    }

    #[test]
    fn settings_from_params() {
        let params: HashMap<String, String> = [
            ("shoppingStartDate", "1325376000000"),
            ("shoppingEndDate", "2012-02-01T00:00:00Z"),
            ("shoppingRealm", "!site.template.course"),
            ("shoppingRole", "Student"),
            ("shoppingAuth", ".anon"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

        let settings = ShoppingSettings::from_params(&params).unwrap();
        assert!(settings.direct_access);
        assert_eq!(settings.auth, Some(ShoppingAuth::Anonymous));
        assert_eq!(settings.realm_role, realm_role());

        let working = settings.apply_to(&NodeAccessState::default());
        assert!(working.direct_access);
        assert_eq!(working.shopping_auth.as_deref(), Some(".anon"));
        assert_eq!(working.role, "Student");
    }

    #[test]
    fn invalid_params_name_the_field() {
        let params = |pairs: &[(&str, &str)]| -> HashMap<String, String> {
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect()
        };

        let err = ShoppingSettings::from_params(&params(&[("shoppingStartDate", "soon")]))
            .unwrap_err();
        assert_eq!(err.field, "shoppingStartDate");

        let err = ShoppingSettings::from_params(&params(&[("shoppingRealm", "r")])).unwrap_err();
        assert_eq!(err.field, "shoppingRole");

        let err = ShoppingSettings::from_params(&params(&[("directAccess", "maybe")])).unwrap_err();
        assert_eq!(err.field, "directAccess");

        let err = ShoppingSettings::from_params(&params(&[
            ("shoppingStartDate", "2000"),
            ("shoppingEndDate", "1000"),
        ]))
        .unwrap_err();
        assert_eq!(err.field, "shoppingEndDate");
    }
}
