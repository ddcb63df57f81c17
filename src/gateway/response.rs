//! JSON error envelope shared by every gateway-generated response.
//!
//! ```json
//! { "success": false, "errors": [ { "message": "...", "code": "FORBIDDEN" } ] }
//! ```

use authz_core::PermissionCode;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Error code for a missing or invalid bearer token.
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
/// Error code for an authenticated caller lacking permission.
pub const FORBIDDEN: &str = "FORBIDDEN";
/// Error code for a request path no route covers.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Error code for a backend that could not be reached or trusted.
pub const BACKEND_UNAVAILABLE: &str = "BACKEND_UNAVAILABLE";

/// Top-level error body.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope<'a> {
    success: bool,
    errors: [ErrorItem<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorItem<'a> {
    message: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    required_permissions: Option<&'a [PermissionCode]>,
}

impl<'a> ErrorEnvelope<'a> {
    /// A single error with `code` and `message`.
    #[must_use]
    pub fn new(code: &'a str, message: &'a str) -> Self {
        Self {
            success: false,
            errors: [ErrorItem {
                message,
                code,
                required_permissions: None,
            }],
        }
    }

    /// Attach the permission codes the caller would have needed.
    #[must_use]
    pub fn with_required_permissions(mut self, codes: &'a [PermissionCode]) -> Self {
        self.errors[0].required_permissions = Some(codes);
        self
    }

    /// Render with `status`.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}
