//! Pass-through forwarding to the matched route's upstream.

use std::sync::Arc;

use axum::{
    Extension,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};
use url::Url;

use super::response::{BACKEND_UNAVAILABLE, ErrorEnvelope};
use crate::authz::routes::MatchedRoute;

const BACKEND_UNAVAILABLE_MESSAGE: &str = "The backend service is unavailable.";

/// Hop-by-hop headers, never forwarded in either direction.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

/// Forwards requests with the backend client.
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Forward with `client` (see [`crate::mtls::backend_client`]).
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send `request` to `route`'s upstream and relay the answer.
    pub async fn forward(&self, route: &MatchedRoute, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let url = upstream_url(&route.route().upstream, parts.uri.path(), parts.uri.query());

        let upstream = self
            .client
            .request(parts.method.clone(), url.clone())
            .headers(forwardable(&parts.headers))
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        match upstream {
            Ok(response) => {
                debug!(route = route.id(), %url, status = response.status().as_u16(), "Forwarded");
                relay(response)
            }
            Err(e) => {
                warn!(route = route.id(), %url, error = %e, "Backend request failed");
                ErrorEnvelope::new(BACKEND_UNAVAILABLE, BACKEND_UNAVAILABLE_MESSAGE)
                    .into_response_with(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

/// Fallback handler for every routed path.
pub async fn proxy_handler(
    State(forwarder): State<Arc<Forwarder>>,
    Extension(route): Extension<MatchedRoute>,
    request: Request<Body>,
) -> Response {
    forwarder.forward(&route, request).await
}

/// `base` with `path` appended to its own path and `query` replacing its query.
#[must_use]
pub fn upstream_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url.set_query(query);
    url
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out
}

fn relay(response: reqwest::Response) -> Response {
    let status = response.status();
    let headers = forwardable(response.headers());
    let mut relayed = (status, Body::from_stream(response.bytes_stream())).into_response();
    *relayed.headers_mut() = headers;
    relayed
}
