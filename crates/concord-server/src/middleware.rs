//! Request gates: the OCS header check and the admin bearer token.

use crate::ocs::ocs_failure;
use crate::AppState;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Rejects any OCS request that does not carry `OCS-APIRequest: true`.
///
/// This runs before any business logic, as the contract requires: a
/// missing or false header is a 400 regardless of path or method.
pub async fn ocs_gate(req: Request<Body>, next: Next) -> Response {
    let header_ok = req
        .headers()
        .get("OCS-APIRequest")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if !header_ok {
        return ocs_failure(
            StatusCode::BAD_REQUEST,
            "OCS-APIRequest header must be set to true",
        );
    }
    next.run(req).await
}

/// Admin gate for the trusted-server management endpoints.
///
/// The wider auth subsystem is outside this service; the narrow interface
/// is a configured bearer token. An empty configured token disables admin
/// access entirely rather than allowing anonymous administration.
pub async fn admin_gate(req: Request<Body>, next: Next) -> Response {
    let state = match req.extensions().get::<Arc<AppState>>() {
        Some(state) => state.clone(),
        None => return ocs_failure(StatusCode::INTERNAL_SERVER_ERROR, "missing state"),
    };

    if state.admin_token.is_empty() {
        return ocs_failure(
            StatusCode::FORBIDDEN,
            "admin access is disabled (no admin token configured)",
        );
    }

    let presented = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), state.admin_token.as_bytes()) => {
            next.run(req).await
        }
        _ => ocs_failure(StatusCode::UNAUTHORIZED, "admin authorization required"),
    }
}

/// Length-independent comparison so the token check does not leak a
/// matching prefix through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basic() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }
}
