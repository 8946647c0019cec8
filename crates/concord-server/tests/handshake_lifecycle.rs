//! Full two-instance handshake: add -> pending -> trusted, with the
//! secret committed on both sides and never exposed through the API.

mod common;

use common::{admin_add, fast_policy, spawn_instance, wait_for};
use concord_server::background::RetryPolicy;
use concord_types::TrustStatus;
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn two_instances_negotiate_a_shared_secret() {
    // Generous retry budget: instance B learns about A first and keeps
    // knocking until A admits it (or A's own round completes first).
    let policy = RetryPolicy {
        max_attempts: 20,
        base_delay: Duration::from_millis(25),
        max_delay: Duration::from_millis(100),
    };
    let a = spawn_instance("admin-a", policy).await;
    let b = spawn_instance("admin-b", policy).await;

    // B's administrator trusts A first.
    let response = admin_add(&b, &a.url).await;
    assert_eq!(response.status(), 200);
    let json: Value = response.json().await.unwrap();
    let b_row_id = json["ocs"]["data"]["id"].as_i64().unwrap();

    // A fresh row starts in a non-trusted state with no secret.
    let fresh = b.registry.get(b_row_id).unwrap();
    assert_ne!(fresh.status, TrustStatus::Trusted);
    assert_eq!(fresh.shared_secret, None);

    // Now A's administrator trusts B; the handshake can complete.
    let response = admin_add(&a, &b.url).await;
    assert_eq!(response.status(), 200);
    let json: Value = response.json().await.unwrap();
    let a_row_id = json["ocs"]["data"]["id"].as_i64().unwrap();

    wait_for(&a.registry, a_row_id, Duration::from_secs(10), |s| {
        s.status == TrustStatus::Trusted
    })
    .await;
    wait_for(&b.registry, b_row_id, Duration::from_secs(10), |s| {
        s.status == TrustStatus::Trusted
    })
    .await;

    // Secret present iff trusted, on both sides.
    let a_row = a.registry.get(a_row_id).unwrap();
    let b_row = b.registry.get(b_row_id).unwrap();
    assert!(a_row.shared_secret.as_deref().is_some_and(|s| !s.is_empty()));
    assert!(b_row.shared_secret.as_deref().is_some_and(|s| !s.is_empty()));

    // The admin list reflects trusted status but never the secret.
    let response = reqwest::Client::new()
        .get(format!("{}/ocs/v2.php/federation/trusted-servers", a.url))
        .header("OCS-APIRequest", "true")
        .bearer_auth(&a.admin_token)
        .send()
        .await
        .unwrap();
    let body = response.text().await.unwrap();
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["ocs"]["data"][0]["status"], "trusted");
    let secret = a_row.shared_secret.unwrap();
    assert!(!body.contains(&secret), "secret leaked in list output");
}

#[tokio::test]
async fn repeating_a_round_against_a_trusted_server_is_a_noop() {
    let policy = RetryPolicy {
        max_attempts: 20,
        base_delay: Duration::from_millis(25),
        max_delay: Duration::from_millis(100),
    };
    let a = spawn_instance("admin-a", policy).await;
    let b = spawn_instance("admin-b", policy).await;

    admin_add(&b, &a.url).await;
    let response = admin_add(&a, &b.url).await;
    let json: Value = response.json().await.unwrap();
    let a_row_id = json["ocs"]["data"]["id"].as_i64().unwrap();

    wait_for(&a.registry, a_row_id, Duration::from_secs(10), |s| {
        s.status == TrustStatus::Trusted
    })
    .await;
    let established = a.registry.get(a_row_id).unwrap().shared_secret.unwrap();

    // A stray repeat announcement from B must not disturb the secret.
    let response = reqwest::Client::new()
        .post(format!("{}/ocs/v2.php/cloud/shared-secret", a.url))
        .header("OCS-APIRequest", "true")
        .json(&serde_json::json!({ "url": b.url, "token": "stale-round" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let row = a.registry.get(a_row_id).unwrap();
    assert_eq!(row.status, TrustStatus::Trusted);
    assert_eq!(row.shared_secret.as_deref(), Some(established.as_str()));
}
