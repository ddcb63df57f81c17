//! Bearer authentication middleware.
//!
//! Runs after route matching. On success the caller's [`Principal`](super::Principal) is
//! inserted into request extensions for the authorization gate. Anonymous
//! routes let requests without a valid token through with no principal.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::token::{AuthError, TokenAuthenticator};
use crate::authz::routes::MatchedRoute;
use crate::gateway::response::{ErrorEnvelope, UNAUTHORIZED};

/// Message sent with every 401.
pub const UNAUTHORIZED_MESSAGE: &str =
    "You are not authorized to access this resource. Please provide a valid token.";

/// Set on a 401 caused by an expired token.
pub const TOKEN_EXPIRED_HEADER: &str = "token-expired";

/// Authentication middleware.
pub async fn auth_middleware(
    State(authenticator): State<Arc<TokenAuthenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let anonymous = request
        .extensions()
        .get::<MatchedRoute>()
        .is_some_and(MatchedRoute::anonymous);

    let token = bearer_token(request.headers()).map(str::to_owned);
    let outcome = match token {
        Some(token) => authenticator.authenticate(&token).await,
        None => Err(AuthError::MissingToken),
    };

    match outcome {
        Ok(principal) => {
            debug!(
                subject = principal.subject.as_deref().unwrap_or("-"),
                roles = principal.roles.len(),
                expires_at = ?principal.expires_at,
                path = %request.uri().path(),
                "Authenticated request"
            );
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) if anonymous => {
            debug!(path = %request.uri().path(), reason = %e, "Anonymous route, continuing without principal");
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %request.uri().path(), reason = %e, "Rejected unauthenticated request");
            unauthorized_response(&e)
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn unauthorized_response(error: &AuthError) -> Response {
    let mut response = ErrorEnvelope::new(UNAUTHORIZED, UNAUTHORIZED_MESSAGE)
        .into_response_with(StatusCode::UNAUTHORIZED);
    let headers = response.headers_mut();
    headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    if error.is_expired() {
        headers.insert(TOKEN_EXPIRED_HEADER, HeaderValue::from_static("true"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("BEARER  abc ")), Some("abc"));
    }

    #[test]
    fn other_schemes_and_empty_tokens_are_ignored() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer   ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn expired_token_sets_token_expired_header() {
        let response = unauthorized_response(&AuthError::Expired);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[TOKEN_EXPIRED_HEADER], "true");
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn other_failures_do_not_set_token_expired_header() {
        let response = unauthorized_response(&AuthError::SignatureMismatch);
        assert!(response.headers().get(TOKEN_EXPIRED_HEADER).is_none());
    }
}
