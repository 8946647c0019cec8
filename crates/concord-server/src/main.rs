//! Concord server binary — federation trust / shared-secret exchange.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, the background negotiation scheduler, and graceful
//! shutdown on SIGTERM/SIGINT.

use concord_federation::{NegotiatorConfig, SecretNegotiator, TrustedServerRegistry};
use concord_server::background::{spawn_scheduler, RetryPolicy};
use concord_server::{app, config, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CONCORD_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if config.federation.admin_token.is_empty() {
        tracing::warn!(
            "federation.admin_token is not set — trusted-server administration is disabled"
        );
    }

    // Initialize database
    let pool = concord_db::open_pool(
        &config.database.path,
        concord_db::PoolSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            max_connections: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            concord_db::apply_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Federation core: registry, outbound HTTP client, negotiator.
    let registry = Arc::new(TrustedServerRegistry::new(pool));
    let client = reqwest::Client::builder()
        .user_agent(concat!("concord/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build HTTP client");
    let negotiator = Arc::new(SecretNegotiator::new(
        registry.clone(),
        client,
        NegotiatorConfig {
            public_url: config.federation.public_url.clone(),
            probe_timeout: Duration::from_millis(config.federation.probe_timeout_ms),
            request_timeout: Duration::from_millis(config.federation.request_timeout_ms),
        },
    ));

    // Background scheduler for negotiation retries.
    let (jobs_tx, jobs_rx) = tokio::sync::mpsc::channel(64);
    let policy = RetryPolicy {
        max_attempts: config.federation.max_attempts,
        base_delay: Duration::from_millis(config.federation.backoff_base_ms),
        max_delay: Duration::from_millis(config.federation.backoff_cap_ms),
    };
    let _scheduler = spawn_scheduler(negotiator.clone(), policy, jobs_rx);

    let state = AppState {
        registry,
        negotiator,
        jobs: jobs_tx,
        admin_token: config.federation.admin_token.clone(),
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, public_url = %config.federation.public_url, "starting concord server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("concord server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
