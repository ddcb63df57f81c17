//! Role → permission resolution.
//!
//! One store lookup per role, run concurrently, each bounded by the lookup
//! timeout. A role whose lookup fails, times out or returns an unparsable
//! document contributes nothing; the remaining roles still count.
//!
//! Dropping the returned future (client disconnect) cancels every in-flight
//! lookup.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use authz_core::{PermissionSet, Role};
use futures::future::join_all;
use tracing::{debug, warn};

use super::store::{PermissionStore, StoreError};
use crate::config::PermissionsConfig;

/// Why one role's permissions could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The stored document is not a JSON array of strings.
    #[error("invalid permission document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The store did not answer in time.
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Resolves a caller's effective permissions from their roles.
pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,
    key_prefix: String,
    lookup_timeout: Duration,
}

impl PermissionResolver {
    /// Create a resolver over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn PermissionStore>, config: &PermissionsConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            lookup_timeout: config.lookup_timeout,
        }
    }

    /// Store key holding `role`'s permissions.
    #[must_use]
    pub fn key_for(&self, role: &Role) -> String {
        format!("{}{}", self.key_prefix, role.as_str())
    }

    /// Union of the permissions granted to `roles`.
    pub async fn resolve(&self, roles: &BTreeSet<Role>) -> PermissionSet {
        let lookups = roles.iter().map(|role| async move {
            match self.lookup(role).await {
                Ok(set) => set,
                Err(e) => {
                    warn!(role = %role, store = %self.store.describe(), error = %e, "Permission lookup failed; role grants nothing");
                    PermissionSet::new()
                }
            }
        });

        let mut granted = PermissionSet::new();
        for set in join_all(lookups).await {
            granted.merge(set);
        }
        granted
    }

    /// Permissions of a single role. A missing key is an empty set.
    ///
    /// # Errors
    ///
    /// Returns a [`LookupError`] if the store fails, times out or holds an
    /// invalid document.
    pub async fn lookup(&self, role: &Role) -> Result<PermissionSet, LookupError> {
        let key = self.key_for(role);
        let raw = tokio::time::timeout(self.lookup_timeout, self.store.fetch(&key))
            .await
            .map_err(|_| LookupError::Timeout(self.lookup_timeout))??;

        match raw {
            Some(doc) => Ok(PermissionSet::from_json(&doc)?),
            None => {
                debug!(key = %key, "No permissions stored for role");
                Ok(PermissionSet::new())
            }
        }
    }
}
