//! Concord server library logic.
//!
//! Wires the federation core (`concord-federation`) to its HTTP surface:
//! route table, OCS envelope shaping, request gates, and the background
//! negotiation scheduler.

pub mod api_shared_secret;
pub mod api_trusted_servers;
pub mod background;
pub mod config;
pub mod middleware;
pub mod ocs;

use axum::{
    routing::{delete, get, post},
    Extension, Json, Router,
};
use background::NegotiationJob;
use concord_federation::{SecretNegotiator, TrustedServerRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Application state shared across all request handlers.
///
/// Everything is constructed explicitly in `main` (or in tests) and
/// injected here; there are no process-wide singletons.
pub struct AppState {
    /// Trusted-server registry.
    pub registry: Arc<TrustedServerRegistry>,
    /// Handshake driver.
    pub negotiator: Arc<SecretNegotiator>,
    /// Queue into the background negotiation scheduler.
    pub jobs: mpsc::Sender<NegotiationJob>,
    /// Bearer token for admin endpoints; empty disables admin access.
    pub admin_token: String,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Liveness document, the target of the add-time probe. Peers check this
/// before admitting us to their registry, and we check theirs.
async fn status() -> Json<Value> {
    Json(json!({
        "installed": true,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
///
/// The peer endpoints exist under two prefixes — the current `/cloud/...`
/// one and the legacy `/apps/federation/api/v1/...` one — bound to the
/// same handler functions, so the two surfaces cannot diverge.
pub fn app(state: AppState) -> Router {
    let peer_routes = Router::new()
        .route(
            "/cloud/shared-secret",
            get(api_shared_secret::get_shared_secret_handler)
                .post(api_shared_secret::post_shared_secret_handler),
        )
        .route(
            "/apps/federation/api/v1/shared-secret",
            get(api_shared_secret::get_shared_secret_handler)
                .post(api_shared_secret::post_shared_secret_handler),
        )
        .route(
            "/apps/federation/api/v1/request-shared-secret",
            post(api_shared_secret::post_shared_secret_handler),
        );

    let admin_routes = Router::new()
        .route(
            "/federation/trusted-servers",
            post(api_trusted_servers::add_trusted_server_handler)
                .get(api_trusted_servers::list_trusted_servers_handler),
        )
        .route(
            "/federation/trusted-servers/{id}",
            delete(api_trusted_servers::remove_trusted_server_handler),
        )
        .layer(axum::middleware::from_fn(middleware::admin_gate));

    let ocs_routes = Router::new()
        .merge(peer_routes)
        .merge(admin_routes)
        .layer(axum::middleware::from_fn(middleware::ocs_gate));

    // The whole OCS family is reachable bare and under the /ocs/v2.php
    // prefix; clients in the wild use both.
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .nest("/ocs/v2.php", ocs_routes.clone())
        .merge(ocs_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use concord_db::{apply_migrations, open_pool, PoolSettings};
    use concord_federation::NegotiatorConfig;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lib_test.db");
        let pool = open_pool(path.to_str().unwrap(), PoolSettings::default()).unwrap();
        apply_migrations(&pool.get().unwrap()).unwrap();
        // Leak the temp dir so the database outlives this helper.
        std::mem::forget(dir);

        let registry = Arc::new(TrustedServerRegistry::new(pool));
        let negotiator = Arc::new(SecretNegotiator::new(
            registry.clone(),
            reqwest::Client::new(),
            NegotiatorConfig {
                public_url: "http://local.test".to_string(),
                probe_timeout: Duration::from_millis(100),
                request_timeout: Duration::from_millis(100),
            },
        ));
        let (tx, _rx) = mpsc::channel(8);
        app(AppState {
            registry,
            negotiator,
            jobs: tx,
            admin_token: "adm1n".to_string(),
        })
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_installed() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["installed"], true);
    }

    #[tokio::test]
    async fn ocs_routes_require_the_header() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/ocs/v2.php/cloud/shared-secret?url=a&token=b")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
