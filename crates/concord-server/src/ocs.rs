//! OCS response envelope and API error mapping.
//!
//! Every endpoint answers `{ocs: {meta, data}}` with `meta.statuscode`
//! mirroring the HTTP status, so clients can read either.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use concord_types::FederationError;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Serialize)]
pub struct OcsMeta {
    pub status: &'static str,
    pub statuscode: u16,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct OcsBody<T: Serialize> {
    pub meta: OcsMeta,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OcsEnvelope<T: Serialize> {
    pub ocs: OcsBody<T>,
}

/// A successful OCS response.
pub fn ocs_ok<T: Serialize>(data: T) -> Response {
    let envelope = OcsEnvelope {
        ocs: OcsBody {
            meta: OcsMeta {
                status: "ok",
                statuscode: 200,
                message: "OK".to_string(),
            },
            data,
        },
    };
    (StatusCode::OK, Json(envelope)).into_response()
}

/// A failed OCS response with an empty data object.
pub fn ocs_failure(status: StatusCode, message: impl Into<String>) -> Response {
    let envelope = OcsEnvelope {
        ocs: OcsBody {
            meta: OcsMeta {
                status: "failure",
                statuscode: status.as_u16(),
                message: message.into(),
            },
            data: json!({}),
        },
    };
    (status, Json(envelope)).into_response()
}

/// Error type returned by the HTTP handlers.
///
/// Wraps the federation error taxonomy; `Transient` and `Exhausted` never
/// reach this type because background work reports through the registry
/// status, not through a request.
#[derive(Debug)]
pub struct ApiError(pub FederationError);

impl From<FederationError> for ApiError {
    fn from(err: FederationError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FederationError::Conflict(_) => StatusCode::CONFLICT,
            FederationError::NotFound(_) => StatusCode::NOT_FOUND,
            FederationError::Forbidden(_) => StatusCode::FORBIDDEN,
            FederationError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            FederationError::IllegalTransition { .. } => StatusCode::CONFLICT,
            FederationError::Transient(_)
            | FederationError::Exhausted(_)
            | FederationError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
            // Do not leak internals to the caller.
            return ocs_failure(status, "internal error");
        }
        ocs_failure(status, self.0.to_string())
    }
}
