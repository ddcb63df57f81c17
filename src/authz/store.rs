//! Role-permission storage.
//!
//! The store is a key-value lookup: key `<prefix><ROLE>` holds a JSON array
//! of permission codes. Missing keys are not errors.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::PermissionsConfig;
use crate::{Error, Result};

/// Failure talking to the permission store.
#[derive(Debug, Clone, thiserror::Error)]
#[error("permission store error: {0}")]
pub struct StoreError(pub String);

/// Key-value source of role permission documents.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Raw value stored under `key`, or `None` if absent.
    async fn fetch(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Redis
// ─────────────────────────────────────────────────────────────────────────────

/// Redis-backed store.
///
/// The connection is opened on first use and shared afterwards; the
/// [`ConnectionManager`] reconnects on its own after a dropped connection.
pub struct RedisPermissionStore {
    client: redis::Client,
    connect_timeout: Duration,
    response_timeout: Duration,
    conn: OnceCell<ConnectionManager>,
}

impl RedisPermissionStore {
    /// Create a store for `redis_url`. No connection is made yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is not a valid Redis URL.
    pub fn new(redis_url: &str, config: &PermissionsConfig) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("permissions.redis_url: {e}")))?;
        Ok(Self {
            client,
            connect_timeout: config.connect_timeout,
            response_timeout: config.lookup_timeout,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> std::result::Result<ConnectionManager, StoreError> {
        let manager = self
            .conn
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.connect_timeout)
                    .set_response_timeout(self.response_timeout)
                    .set_number_of_retries(0);
                let manager = ConnectionManager::new_with_config(self.client.clone(), config)
                    .await
                    .map_err(|e| StoreError(e.to_string()))?;
                info!(store = %self.describe(), "Connected to permission store");
                Ok::<_, StoreError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl PermissionStore for RedisPermissionStore {
    async fn fetch(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| StoreError(e.to_string()))
    }

    fn describe(&self) -> String {
        let info = self.client.get_connection_info();
        format!("redis://{}/{}", info.addr, info.redis.db)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed in-memory store. Used when no Redis URL is configured (every lookup
/// misses) and in tests.
#[derive(Debug, Default, Clone)]
pub struct StaticPermissionStore {
    entries: HashMap<String, String>,
}

impl StaticPermissionStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl PermissionStore for StaticPermissionStore {
    async fn fetch(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn describe(&self) -> String {
        format!("static ({} keys)", self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_store_returns_none_for_missing_keys() {
        let store = StaticPermissionStore::new().with("permissions:USER", r#"["a:read"]"#);

        assert_eq!(
            store.fetch("permissions:USER").await.unwrap().as_deref(),
            Some(r#"["a:read"]"#)
        );
        assert_eq!(store.fetch("permissions:ADMIN").await.unwrap(), None);
    }

    #[test]
    fn invalid_redis_url_is_a_config_error() {
        let result = RedisPermissionStore::new("not a url", &PermissionsConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn redis_store_describes_address() {
        let store =
            RedisPermissionStore::new("redis://cache.internal:6380/2", &PermissionsConfig::default())
                .unwrap();
        let described = store.describe();
        assert!(described.contains("cache.internal:6380"), "{described}");
    }
}
