//! Authorization gate.
//!
//! Runs after authentication, per matched route:
//!
//! | Caller                  | Outcome                                   |
//! |-------------------------|-------------------------------------------|
//! | no principal            | pass through untouched                    |
//! | holds `OWNER`           | allow, permissions are not resolved       |
//! | requirement satisfied   | allow                                     |
//! | otherwise               | 403 with the unsatisfied permission codes |

use std::sync::Arc;

use authz_core::{PermissionCode, PermissionSet, RequiredPermissions};
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::resolver::PermissionResolver;
use super::routes::{MatchedRoute, RouteMetadata};
use crate::auth::Principal;
use crate::gateway::response::{ErrorEnvelope, FORBIDDEN};

/// Message sent with every 403.
pub const FORBIDDEN_MESSAGE: &str = "You don't have permission to access this resource.";

/// A denied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Required codes the caller did not satisfy.
    pub missing: Vec<PermissionCode>,
}

/// Result of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// No authenticated caller; left to the authentication layer.
    PassThrough,
    /// Forward the request.
    Allow,
    /// Answer 403.
    Deny(Denial),
}

/// Decides whether an authenticated caller may use a route.
pub struct AuthorizationGate {
    resolver: PermissionResolver,
    routes: Arc<dyn RouteMetadata>,
}

impl AuthorizationGate {
    /// Create a gate.
    #[must_use]
    pub fn new(resolver: PermissionResolver, routes: Arc<dyn RouteMetadata>) -> Self {
        Self { resolver, routes }
    }

    /// Evaluate `principal` against the requirement of `route_id`.
    pub async fn evaluate(&self, principal: Option<&Principal>, route_id: &str) -> GateDecision {
        let Some(principal) = principal else {
            return GateDecision::PassThrough;
        };

        if principal.is_owner() {
            debug!(route = route_id, "Owner role, permission check bypassed");
            return GateDecision::Allow;
        }

        let granted = self.resolver.resolve(&principal.roles).await;
        let required = self.routes.required_permissions(route_id);

        if authz_core::decide(&required, &granted) {
            return GateDecision::Allow;
        }

        log_denial(principal, route_id, &required, &granted);
        GateDecision::Deny(Denial {
            missing: authz_core::unsatisfied(&required, &granted),
        })
    }
}

fn log_denial(
    principal: &Principal,
    route_id: &str,
    required: &RequiredPermissions,
    granted: &PermissionSet,
) {
    let roles: Vec<&str> = principal.roles.iter().map(authz_core::Role::as_str).collect();
    let required: Vec<&str> = required.codes().iter().map(PermissionCode::as_str).collect();
    let granted: Vec<&str> = granted.iter().map(PermissionCode::as_str).collect();
    warn!(
        subject = principal.subject.as_deref().unwrap_or("-"),
        route = route_id,
        "Access denied for user with roles [{}]. Required: [{}], Has: [{}]",
        roles.join(", "),
        required.join(", "),
        granted.join(", "),
    );
}

/// Authorization middleware.
///
/// Requests without a [`MatchedRoute`] are passed on unchanged.
pub async fn gate_middleware(
    State(gate): State<Arc<AuthorizationGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(route) = request.extensions().get::<MatchedRoute>().cloned() else {
        return next.run(request).await;
    };

    let principal = request.extensions().get::<Principal>().cloned();
    let decision = gate.evaluate(principal.as_ref(), route.id()).await;

    match decision {
        GateDecision::PassThrough | GateDecision::Allow => next.run(request).await,
        GateDecision::Deny(denial) => ErrorEnvelope::new(FORBIDDEN, FORBIDDEN_MESSAGE)
            .with_required_permissions(&denial.missing)
            .into_response_with(StatusCode::FORBIDDEN),
    }
}
