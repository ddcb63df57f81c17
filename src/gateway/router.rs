//! HTTP router.
//!
//! ```text
//! GET /health                         → {"status":"ok"}
//! any other path → route match (404)  → authentication (401)
//!                → authorization (403) → forward to upstream (502)
//! ```

use std::sync::Arc;

use axum::{Json, Router, middleware, response::IntoResponse, routing::get};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::proxy::{Forwarder, proxy_handler};
use crate::auth::{HttpKeySource, KeyCachePolicy, SigningKeyCache, TokenAuthenticator, auth_middleware};
use crate::authz::{
    AuthorizationGate, PermissionResolver, PermissionStore, RedisPermissionStore, RouteRegistry,
    RouteTable, StaticPermissionStore, gate_middleware, route_middleware,
};
use crate::config::Config;
use crate::mtls::backend_client;
use crate::Result;

/// Everything the request pipeline needs, built once at startup.
pub struct GatewayServices {
    /// Path → route lookup
    pub routes: Arc<RouteTable>,
    /// Bearer token verification
    pub authenticator: Arc<TokenAuthenticator>,
    /// Permission enforcement
    pub gate: Arc<AuthorizationGate>,
    /// Upstream forwarding
    pub forwarder: Arc<Forwarder>,
}

impl GatewayServices {
    /// Wire the services described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL, certificate or key in the config is
    /// unusable.
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = Arc::new(HttpKeySource::from_config(&config.auth)?);
        let keys = Arc::new(SigningKeyCache::new(source, KeyCachePolicy::from_config(&config.auth)));
        let authenticator = Arc::new(TokenAuthenticator::new(keys, &config.auth));

        let store: Arc<dyn PermissionStore> = match &config.permissions.redis_url {
            Some(url) => Arc::new(RedisPermissionStore::new(url, &config.permissions)?),
            None => {
                warn!("No permission store configured; only OWNER callers and routes without required permissions are reachable");
                Arc::new(StaticPermissionStore::new())
            }
        };
        let resolver = PermissionResolver::new(store, &config.permissions);
        let registry = Arc::new(RouteRegistry::from_config(&config.routes)?);
        let gate = Arc::new(AuthorizationGate::new(resolver, registry));

        let routes = Arc::new(RouteTable::from_config(&config.routes)?);
        info!(routes = routes.len(), "Routes registered");

        let client = backend_client(&config.mtls, config.server.upstream_timeout)?;

        Ok(Self {
            routes,
            authenticator,
            gate,
            forwarder: Arc::new(Forwarder::new(client)),
        })
    }
}

/// Create the router
pub fn create_router(services: &GatewayServices) -> Router {
    let routed = Router::new()
        .fallback(proxy_handler)
        .with_state(Arc::clone(&services.forwarder))
        // Applied bottom-up: route match, then authentication, then the gate
        .layer(middleware::from_fn_with_state(
            Arc::clone(&services.gate),
            gate_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&services.authenticator),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&services.routes),
            route_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(routed)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
