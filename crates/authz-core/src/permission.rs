//! Permission codes and the allow/deny decision.
//!
//! # Code shapes
//!
//! | Code            | Meaning                                         |
//! |-----------------|-------------------------------------------------|
//! | `users:read`    | exact capability                                |
//! | `finance:*`     | every action on `finance` (and `finance:a:b`)   |
//! | `*`             | everything                                      |
//!
//! `*:read` is not a wildcard; it only matches the literal code `*:read`.
//!
//! Codes are compared after trimming and lower-casing.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// The global wildcard code.
pub const GLOBAL_WILDCARD: &str = "*";

/// A single `resource:action` capability.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PermissionCode(String);

impl PermissionCode {
    /// Normalize a raw code. Returns `None` for blank input.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_lowercase()))
    }

    /// The normalized code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the global wildcard `*`.
    #[must_use]
    pub fn is_global_wildcard(&self) -> bool {
        self.0 == GLOBAL_WILDCARD
    }

    /// The resource segment (everything before the first `:`).
    #[must_use]
    pub fn resource(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(resource, _)| resource)
    }

    /// Wildcard codes that would grant this code, one per `:` boundary.
    ///
    /// `finance:reports:read` yields `finance:*` and `finance:reports:*`.
    fn granting_wildcards(&self) -> impl Iterator<Item = String> + '_ {
        self.0
            .match_indices(':')
            .map(|(idx, _)| format!("{}:*", &self.0[..idx]))
    }
}

impl fmt::Display for PermissionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PermissionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The effective permissions of a caller: the union across all of its roles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    codes: BTreeSet<PermissionCode>,
}

impl PermissionSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the cached payload for one role: a JSON array of code strings.
    ///
    /// Blank entries are dropped. Entries are normalized like required
    /// codes, so stored codes match regardless of case or padding.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the payload is not an array of strings.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        let raw: Vec<String> = serde_json::from_str(payload)?;
        Ok(raw.iter().filter_map(|code| PermissionCode::parse(code)).collect())
    }

    /// Add a code.
    pub fn insert(&mut self, code: PermissionCode) -> bool {
        self.codes.insert(code)
    }

    /// Union another set into this one.
    pub fn merge(&mut self, other: Self) {
        self.codes.extend(other.codes);
    }

    /// Exact membership.
    #[must_use]
    pub fn contains(&self, code: &PermissionCode) -> bool {
        self.codes.contains(code)
    }

    /// Whether `*` was granted.
    #[must_use]
    pub fn has_global_wildcard(&self) -> bool {
        self.codes.iter().any(PermissionCode::is_global_wildcard)
    }

    /// Whether `required` is granted exactly, by a `resource:*` wildcard, or by `*`.
    #[must_use]
    pub fn satisfies(&self, required: &PermissionCode) -> bool {
        if self.has_global_wildcard() || self.contains(required) {
            return true;
        }
        required.granting_wildcards().any(|wildcard| {
            self.codes.iter().any(|granted| granted.as_str() == wildcard)
        })
    }

    /// Number of distinct codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether no code was granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Iterate in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &PermissionCode> {
        self.codes.iter()
    }
}

impl FromIterator<PermissionCode> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PermissionCode>>(iter: I) -> Self {
        Self {
            codes: iter.into_iter().collect(),
        }
    }
}

impl Extend<PermissionCode> for PermissionSet {
    fn extend<I: IntoIterator<Item = PermissionCode>>(&mut self, iter: I) {
        self.codes.extend(iter);
    }
}

/// Permission codes attached to a route. Satisfying any one grants access.
///
/// An empty list means the route needs no specific permission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequiredPermissions(Vec<PermissionCode>);

impl RequiredPermissions {
    /// No requirement.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from raw strings, normalizing and dropping blanks and duplicates.
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<PermissionCode> = Vec::new();
        for code in codes.into_iter().filter_map(|c| PermissionCode::parse(c.as_ref())) {
            if !out.contains(&code) {
                out.push(code);
            }
        }
        Self(out)
    }

    /// Whether no code is required.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The codes, in declaration order.
    #[must_use]
    pub fn codes(&self) -> &[PermissionCode] {
        &self.0
    }
}

/// Evaluate a route requirement against granted permissions.
///
/// True when nothing is required, when `*` was granted, or when any required
/// code is satisfied exactly or through a `resource:*` wildcard.
#[must_use]
pub fn decide(required: &RequiredPermissions, granted: &PermissionSet) -> bool {
    if required.is_empty() || granted.has_global_wildcard() {
        return true;
    }
    required.codes().iter().any(|code| granted.satisfies(code))
}

/// The required codes that `granted` does not satisfy.
#[must_use]
pub fn unsatisfied(required: &RequiredPermissions, granted: &PermissionSet) -> Vec<PermissionCode> {
    required
        .codes()
        .iter()
        .filter(|code| !granted.satisfies(code))
        .cloned()
        .collect()
}
