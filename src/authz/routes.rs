//! Route table and required-permission registry.
//!
//! Routes are registered once at startup. The [`RouteTable`] maps a request
//! path to a [`Route`] (longest prefix wins, on `/` boundaries) and the
//! [`RouteRegistry`] maps a route id to its [`RequiredPermissions`]. The gate
//! only sees the registry through the [`RouteMetadata`] trait.

use std::collections::HashMap;
use std::sync::Arc;

use authz_core::RequiredPermissions;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use url::Url;

use crate::config::RouteConfig;
use crate::gateway::response::{ErrorEnvelope, NOT_FOUND};
use crate::{Error, Result};

/// Supplies the required permissions of a matched route.
pub trait RouteMetadata: Send + Sync {
    /// Required permissions for `route_id`; empty when the route has none or
    /// is unknown.
    fn required_permissions(&self, route_id: &str) -> RequiredPermissions;
}

/// Route id → required permissions.
#[derive(Debug, Default, Clone)]
pub struct RouteRegistry {
    by_id: HashMap<String, RequiredPermissions>,
}

impl RouteRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `route_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the id is already registered.
    pub fn register(&mut self, route_id: &str, required: RequiredPermissions) -> Result<()> {
        if self.by_id.contains_key(route_id) {
            return Err(Error::Config(format!("Route '{route_id}' registered twice")));
        }
        self.by_id.insert(route_id.to_string(), required);
        Ok(())
    }

    /// Build from the `routes` config section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on duplicate route ids.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for route in routes {
            registry.register(&route.id, RequiredPermissions::from_codes(&route.permissions))?;
        }
        Ok(registry)
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl RouteMetadata for RouteRegistry {
    fn required_permissions(&self, route_id: &str) -> RequiredPermissions {
        self.by_id.get(route_id).cloned().unwrap_or_default()
    }
}

/// A configured route.
#[derive(Debug, Clone)]
pub struct Route {
    /// Stable identifier.
    pub id: String,
    /// Path prefix, always starting with `/`.
    pub path_prefix: String,
    /// Backend base URL.
    pub upstream: Url,
    /// Whether unauthenticated requests are let through.
    pub anonymous: bool,
}

impl Route {
    fn matches(&self, path: &str) -> bool {
        let prefix = self.path_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// The route a request was matched to, stored in request extensions.
#[derive(Debug, Clone)]
pub struct MatchedRoute(pub Arc<Route>);

impl MatchedRoute {
    /// Route id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Whether the route accepts unauthenticated requests.
    #[must_use]
    pub fn anonymous(&self) -> bool {
        self.0.anonymous
    }

    /// The matched route.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.0
    }
}

/// Path → route lookup.
#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    // Longest prefix first.
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Build from the `routes` config section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an upstream URL does not parse.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let mut table = Vec::with_capacity(routes.len());
        for route in routes {
            let upstream = Url::parse(&route.upstream).map_err(|e| {
                Error::Config(format!("route '{}': invalid upstream: {e}", route.id))
            })?;
            table.push(Arc::new(Route {
                id: route.id.clone(),
                path_prefix: route.path_prefix.clone(),
                upstream,
                anonymous: route.anonymous,
            }));
        }
        table.sort_by_key(|r| std::cmp::Reverse(r.path_prefix.trim_end_matches('/').len()));
        Ok(Self { routes: table })
    }

    /// Find the route for `path`.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<MatchedRoute> {
        self.routes
            .iter()
            .find(|r| r.matches(path))
            .map(|r| MatchedRoute(Arc::clone(r)))
    }

    /// Number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether there are no routes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Route-matching middleware: stores [`MatchedRoute`] or answers 404.
pub async fn route_middleware(
    State(table): State<Arc<RouteTable>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(matched) = table.find(request.uri().path()) else {
        debug!(path = %request.uri().path(), "No route matches path");
        return ErrorEnvelope::new(NOT_FOUND, "No route matches this path.")
            .into_response_with(StatusCode::NOT_FOUND);
    };
    request.extensions_mut().insert(matched);
    next.run(request).await
}
