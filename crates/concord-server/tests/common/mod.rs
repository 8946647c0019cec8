//! Shared harness: spins up a full Concord instance on a real listener,
//! with its own temp-file database and a running negotiation scheduler.

#![allow(dead_code)]

use concord_db::{apply_migrations, open_pool, PoolSettings};
use concord_federation::{NegotiatorConfig, SecretNegotiator, TrustedServerRegistry};
use concord_server::background::{spawn_scheduler, RetryPolicy};
use concord_server::{app, AppState};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub struct TestServer {
    /// Public base URL of this instance (http://127.0.0.1:port).
    pub url: String,
    pub registry: Arc<TrustedServerRegistry>,
    pub admin_token: String,
    _dir: TempDir,
}

/// Fast retry policy so exhaustion tests finish in milliseconds.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
    }
}

pub async fn spawn_instance(admin_token: &str, policy: RetryPolicy) -> TestServer {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("concord.db");
    let pool = open_pool(db_path.to_str().unwrap(), PoolSettings::default()).expect("pool");
    apply_migrations(&pool.get().unwrap()).expect("migrations");

    // Bind first so the negotiator knows its own public URL.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{addr}");

    let registry = Arc::new(TrustedServerRegistry::new(pool));
    let negotiator = Arc::new(SecretNegotiator::new(
        registry.clone(),
        reqwest::Client::new(),
        NegotiatorConfig {
            public_url: url.clone(),
            probe_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(500),
        },
    ));

    let (jobs_tx, jobs_rx) = tokio::sync::mpsc::channel(16);
    let _scheduler = spawn_scheduler(negotiator.clone(), policy, jobs_rx);

    let router = app(AppState {
        registry: registry.clone(),
        negotiator,
        jobs: jobs_tx,
        admin_token: admin_token.to_string(),
    });
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    TestServer {
        url,
        registry,
        admin_token: admin_token.to_string(),
        _dir: dir,
    }
}

/// Admin-adds `candidate` to `server` over HTTP, returning the response.
pub async fn admin_add(server: &TestServer, candidate: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/ocs/v2.php/federation/trusted-servers", server.url))
        .header("OCS-APIRequest", "true")
        .bearer_auth(&server.admin_token)
        .json(&serde_json::json!({ "url": candidate }))
        .send()
        .await
        .expect("admin add request")
}

/// Polls until `predicate` holds for the server row, or panics after the
/// deadline. Negotiation is asynchronous; state is observed by polling.
pub async fn wait_for<F>(registry: &TrustedServerRegistry, id: i64, deadline: Duration, predicate: F)
where
    F: Fn(&concord_types::TrustedServer) -> bool,
{
    let start = std::time::Instant::now();
    loop {
        if let Ok(server) = registry.get(id) {
            if predicate(&server) {
                return;
            }
        }
        if start.elapsed() > deadline {
            panic!(
                "condition not reached within {deadline:?}; row: {:?}",
                registry.get(id)
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
