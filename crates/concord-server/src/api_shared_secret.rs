//! Peer-facing handlers: the `/cloud/shared-secret` pair.

use crate::background::NegotiationJob;
use crate::ocs::{ocs_ok, ApiError};
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    response::Response,
    Json,
};
use concord_federation::SharedSecretPush;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SharedSecretQuery {
    pub url: String,
    pub token: String,
}

/// Handler for `GET /cloud/shared-secret?url=&token=`.
///
/// The peer we initiated a round with calls back here to collect the
/// secret. The token must have been issued by us for exactly that URL;
/// anything else is a 403 with no registry mutation.
pub async fn get_shared_secret_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<SharedSecretQuery>,
) -> Result<Response, ApiError> {
    let reply = state
        .negotiator
        .release_shared_secret(&query.url, &query.token)
        .await?;
    Ok(ocs_ok(reply))
}

/// Handler for `POST /cloud/shared-secret`.
///
/// A peer announces a negotiation round. Validation is synchronous (403
/// when the caller is not an admin-added server); the actual callback
/// fetch runs in the background and the caller gets an empty 200
/// immediately.
pub async fn post_shared_secret_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(push): Json<SharedSecretPush>,
) -> Result<Response, ApiError> {
    let state_clone = state.clone();
    let url = push.url.clone();
    let token = push.token.clone();

    // Registry lookup is a blocking SQLite call.
    let server = tokio::task::spawn_blocking(move || {
        state_clone
            .negotiator
            .accept_shared_secret_request(&url, &token)
    })
    .await
    .map_err(|e| concord_types::FederationError::Db(format!("task join: {e}")))??;

    tracing::info!(server_id = server.id, url = %server.url, "secret request accepted");
    if state
        .jobs
        .send(NegotiationJob::FetchSecret {
            server_id: server.id,
            token: push.token,
        })
        .await
        .is_err()
    {
        tracing::error!(server_id = server.id, "scheduler queue closed");
        return Err(concord_types::FederationError::Db(
            "scheduler unavailable".to_string(),
        )
        .into());
    }

    Ok(ocs_ok(json!({})))
}
