//! Authorization gate scenarios through an axum router
//!
//! The authentication layer is replaced by a tiny middleware that injects a
//! `Principal` built from the `x-test-roles` header, so these tests exercise
//! route matching, permission resolution and the 403 body end to end.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use authz_core::Role;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
};
use gateway_authz::auth::Principal;
use gateway_authz::authz::{
    AuthorizationGate, PermissionResolver, PermissionStore, RouteRegistry, RouteTable,
    StaticPermissionStore, StoreError, gate_middleware, route_middleware,
};
use gateway_authz::config::{PermissionsConfig, RouteConfig};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

struct UnreachableStore;

#[async_trait]
impl PermissionStore for UnreachableStore {
    async fn fetch(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError("connection refused".to_string()))
    }

    fn describe(&self) -> String {
        "unreachable".to_string()
    }
}

fn route(id: &str, prefix: &str, anonymous: bool, permissions: &[&str]) -> RouteConfig {
    RouteConfig {
        id: id.to_string(),
        path_prefix: prefix.to_string(),
        upstream: "http://backend.internal".to_string(),
        anonymous,
        permissions: permissions.iter().map(ToString::to_string).collect(),
    }
}

fn routes() -> Vec<RouteConfig> {
    vec![
        route("finance", "/finance", false, &["finance:write"]),
        route("profile", "/profile", false, &[]),
        route("catalog", "/catalog", true, &["catalog:read"]),
    ]
}

async fn inject_principal(mut request: Request<Body>, next: Next) -> Response {
    let roles = request
        .headers()
        .get("x-test-roles")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').filter_map(Role::new).collect::<BTreeSet<_>>());
    if let Some(roles) = roles {
        request.extensions_mut().insert(Principal {
            subject: Some("user-1".to_string()),
            roles,
            issuer: "https://id.test".to_string(),
            expires_at: None,
        });
    }
    next.run(request).await
}

fn app(store: Arc<dyn PermissionStore>) -> Router {
    let config = routes();
    let gate = Arc::new(AuthorizationGate::new(
        PermissionResolver::new(store, &PermissionsConfig::default()),
        Arc::new(RouteRegistry::from_config(&config).unwrap()),
    ));
    let table = Arc::new(RouteTable::from_config(&config).unwrap());

    Router::new()
        .fallback(|| async { "forwarded" })
        .layer(middleware::from_fn_with_state(gate, gate_middleware))
        .layer(middleware::from_fn(inject_principal))
        .layer(middleware::from_fn_with_state(table, route_middleware))
}

async fn call(app: Router, path: &str, roles: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(path);
    if let Some(roles) = roles {
        builder = builder.header("x-test-roles", roles);
    }
    let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Resource wildcard grants a specific action
#[tokio::test]
async fn test_admin_with_resource_wildcard_is_allowed() {
    let store = StaticPermissionStore::new()
        .with("permissions:ADMIN", r#"["finance:*","users:read"]"#);

    let (status, _) = call(app(Arc::new(store)), "/finance/ledger", Some("ADMIN")).await;

    assert_eq!(status, StatusCode::OK);
}

/// Missing permission yields a structured 403
#[tokio::test]
async fn test_user_without_permission_is_denied_with_required_codes() {
    let store = StaticPermissionStore::new().with("permissions:USER", r#"["users:read"]"#);

    let (status, body) = call(app(Arc::new(store)), "/finance/ledger", Some("USER")).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body,
        json!({
            "success": false,
            "errors": [{
                "message": "You don't have permission to access this resource.",
                "code": "FORBIDDEN",
                "requiredPermissions": ["finance:write"]
            }]
        })
    );
}

/// OWNER bypasses resolution, even with the store down
#[tokio::test]
async fn test_owner_is_allowed_when_store_is_unreachable() {
    let (status, _) = call(app(Arc::new(UnreachableStore)), "/finance", Some("owner")).await;

    assert_eq!(status, StatusCode::OK);
}

/// Routes without requirements admit any authenticated caller
#[tokio::test]
async fn test_guest_on_route_without_requirements_is_allowed() {
    let (status, _) = call(
        app(Arc::new(StaticPermissionStore::new())),
        "/profile",
        Some("GUEST"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

/// Unreachable store fails closed for non-owners
#[tokio::test]
async fn test_unreachable_store_denies_non_owner() {
    let (status, body) = call(app(Arc::new(UnreachableStore)), "/finance", Some("ADMIN")).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errors"][0]["code"], "FORBIDDEN");
}

/// One broken role document does not hide another role's grants
#[tokio::test]
async fn test_broken_role_document_is_isolated() {
    let store = StaticPermissionStore::new()
        .with("permissions:BROKEN", "{not json")
        .with("permissions:FINANCE", r#"["finance:write"]"#);

    let (status, _) = call(app(Arc::new(store)), "/finance", Some("broken,finance")).await;

    assert_eq!(status, StatusCode::OK);
}

/// Requests without a principal pass the gate untouched
#[tokio::test]
async fn test_unauthenticated_request_passes_through_gate() {
    let (status, _) = call(
        app(Arc::new(StaticPermissionStore::new())),
        "/catalog/items",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

/// Paths outside every route are 404
#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (status, body) = call(
        app(Arc::new(StaticPermissionStore::new())),
        "/nowhere",
        Some("OWNER"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "NOT_FOUND");
}

/// Global wildcard satisfies every requirement
#[tokio::test]
async fn test_global_wildcard_is_allowed_everywhere() {
    let store = StaticPermissionStore::new().with("permissions:SUPPORT", r#"["*"]"#);

    let (status, _) = call(app(Arc::new(store)), "/finance", Some("support")).await;

    assert_eq!(status, StatusCode::OK);
}
