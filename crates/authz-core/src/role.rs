//! Role names.

use std::fmt;

use serde::Serialize;

/// The role that bypasses every permission check.
pub const OWNER_ROLE: &str = "OWNER";

/// A role claim, trimmed and upper-cased.
///
/// Role names arrive from token claims in whatever case the identity
/// provider chose; the permission cache is keyed by the upper-cased form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    /// Normalize a raw role claim. Returns `None` for blank input.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_uppercase()))
    }

    /// The normalized name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the `OWNER` role.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.0 == OWNER_ROLE
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether any role in `roles` is `OWNER`.
pub fn contains_owner<'a>(roles: impl IntoIterator<Item = &'a Role>) -> bool {
    roles.into_iter().any(Role::is_owner)
}
