//! Admin handlers for the trusted-server registry.

use crate::background::NegotiationJob;
use crate::ocs::{ocs_ok, ApiError};
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    response::Response,
    Json,
};
use concord_types::FederationError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct AddServerRequest {
    pub url: String,
}

/// Handler for `POST /federation/trusted-servers`.
///
/// Probes the candidate first (unreachable maps to 404, nothing is
/// persisted), inserts it as `pending`, then enqueues the outbound
/// negotiation. The handler does not wait for the handshake; the
/// administrator polls the list to see it advance.
pub async fn add_trusted_server_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<AddServerRequest>,
) -> Result<Response, ApiError> {
    state.negotiator.probe_liveness(&request.url).await?;

    let state_clone = state.clone();
    let url = request.url.clone();
    let server = tokio::task::spawn_blocking(move || state_clone.registry.add(&url))
        .await
        .map_err(|e| FederationError::Db(format!("task join: {e}")))??;

    if state
        .jobs
        .send(NegotiationJob::Outbound {
            server_id: server.id,
        })
        .await
        .is_err()
    {
        tracing::error!(server_id = server.id, "scheduler queue closed");
    }

    Ok(ocs_ok(json!({
        "id": server.id,
        "message": "Server added to the list of trusted servers.",
        "url": server.url,
    })))
}

/// Handler for `GET /federation/trusted-servers`.
///
/// Returns id, status, and url for every known server, id-ascending. The
/// shared secret is not part of the projection and can never appear here.
pub async fn list_trusted_servers_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let entries = tokio::task::spawn_blocking(move || state.registry.list())
        .await
        .map_err(|e| FederationError::Db(format!("task join: {e}")))??;
    Ok(ocs_ok(entries))
}

/// Handler for `DELETE /federation/trusted-servers/{id}`.
///
/// Hard delete; a second delete of the same id is a 404, not a silent
/// success. Any in-flight negotiation for the id notices the missing row
/// on its next attempt and aborts.
pub async fn remove_trusted_server_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    tokio::task::spawn_blocking(move || state.registry.remove(id))
        .await
        .map_err(|e| FederationError::Db(format!("task join: {e}")))??;
    Ok(ocs_ok(json!({ "id": id })))
}
