//! The shared-secret negotiation handshake.

use crate::TrustedServerRegistry;
use concord_types::{normalize_url, FederationError, TrustStatus, TrustedServer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Body of `POST /cloud/shared-secret`: the initiator announces a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedSecretPush {
    /// Callback URL of the initiator.
    pub url: String,
    /// Opaque bearer credential for this round.
    pub token: String,
}

/// Data of `GET /cloud/shared-secret`: the initiator releases the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedSecretReply {
    #[serde(rename = "sharedSecret")]
    pub shared_secret: String,
    #[serde(rename = "syncToken", skip_serializing_if = "Option::is_none", default)]
    pub sync_token: Option<String>,
}

/// Minimal OCS envelope shape for deserializing peer responses.
#[derive(Debug, Deserialize)]
struct OcsReply<T> {
    ocs: OcsReplyBody<T>,
}

#[derive(Debug, Deserialize)]
struct OcsReplyBody<T> {
    data: T,
}

/// Timeouts and identity for the negotiator.
#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    /// Public base URL of this instance; peers call back to it.
    pub public_url: String,
    /// Timeout for the add-time liveness probe.
    pub probe_timeout: Duration,
    /// Timeout for each negotiation call.
    pub request_timeout: Duration,
}

/// Drives outbound negotiation rounds and processes inbound ones.
///
/// Explicitly constructed with its collaborators (registry, HTTP client,
/// config); nothing here is a process-wide singleton. All mutations for a
/// given server id are serialized through a per-id async lock, so at most
/// one negotiation round is active per server at a time.
pub struct SecretNegotiator {
    registry: Arc<TrustedServerRegistry>,
    client: reqwest::Client,
    config: NegotiatorConfig,
    // Map guarded by a std mutex (never held across await); the per-id
    // locks are tokio mutexes because a round holds one across awaits.
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl SecretNegotiator {
    pub fn new(
        registry: Arc<TrustedServerRegistry>,
        client: reqwest::Client,
        config: NegotiatorConfig,
    ) -> Self {
        Self {
            registry,
            client,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &TrustedServerRegistry {
        &self.registry
    }

    fn lock_for(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(id).or_default().clone()
    }

    /// Drops the per-id lock entry once the row is known gone, so
    /// add/remove cycles do not grow the map without bound. Tasks still
    /// holding a clone of the old lock are unaffected.
    fn evict_lock(&self, id: i64) {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        map.remove(&id);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Probes a candidate server before it is admitted to the registry.
    ///
    /// Expects `GET {url}/status` to answer 2xx within the probe timeout.
    /// Anything else maps to `NotFound`, which the admin endpoint reports
    /// as 404 "server unreachable".
    pub async fn probe_liveness(&self, url: &str) -> Result<(), FederationError> {
        let url = normalize_url(url)?;
        let status_url = format!("{url}/status");
        let response = self
            .client
            .get(&status_url)
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(url = %url, error = %e, "liveness probe failed");
                FederationError::NotFound(format!("server unreachable: {url}"))
            })?;
        if !response.status().is_success() {
            return Err(FederationError::NotFound(format!(
                "server unreachable: {url} answered {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Outbound half of the handshake: announce a round to the peer.
    ///
    /// Issues a token and a secret candidate, posts the token (with our
    /// callback URL) to the peer, and moves the row to `secret-requested`.
    /// The secret itself never travels in this call; the peer must call
    /// back `GET /cloud/shared-secret` with the token to obtain it, which
    /// is what proves it really controls the claimed URL.
    ///
    /// Re-running against an already-trusted server is a no-op.
    pub async fn request_shared_secret(
        &self,
        server_id: i64,
    ) -> Result<TrustStatus, FederationError> {
        let lock = self.lock_for(server_id);
        let _guard = lock.lock().await;

        // Re-read under the lock; the row may be gone (admin delete) or
        // already trusted (the peer initiated first).
        let server = match self.registry.get(server_id) {
            Ok(server) => server,
            Err(err) => {
                self.evict_lock(server_id);
                return Err(err);
            }
        };
        if server.status == TrustStatus::Trusted {
            return Ok(TrustStatus::Trusted);
        }
        if server.status == TrustStatus::Failure {
            return Err(FederationError::Exhausted(server_id));
        }

        let (token, _candidate) = self.registry.issue_token(server_id)?;
        let endpoint = format!("{}/ocs/v2.php/cloud/shared-secret", server.url);
        let push = SharedSecretPush {
            url: self.config.public_url.clone(),
            token,
        };

        tracing::info!(server_id, url = %server.url, "requesting shared secret");
        let response = self
            .client
            .post(&endpoint)
            .header("OCS-APIRequest", "true")
            .timeout(self.config.request_timeout)
            .json(&push)
            .send()
            .await
            .map_err(|e| FederationError::Transient(format!("push to {endpoint}: {e}")))?;

        if !response.status().is_success() {
            // The peer may simply not have added us yet; retried later.
            return Err(FederationError::Transient(format!(
                "peer {} rejected secret request: {}",
                server.url,
                response.status()
            )));
        }

        self.registry
            .set_status(server_id, TrustStatus::SecretRequested)?;
        Ok(TrustStatus::SecretRequested)
    }

    /// Inbound half, step one: validate an announced round.
    ///
    /// The claimed URL must be syntactically valid and must already be in
    /// our registry (an administrator added it); everything else is
    /// `Forbidden` with no registry mutation. Returns the matching row so
    /// the caller can schedule the callback fetch.
    pub fn accept_shared_secret_request(
        &self,
        url: &str,
        token: &str,
    ) -> Result<TrustedServer, FederationError> {
        if token.is_empty() {
            return Err(FederationError::Forbidden("empty token".to_string()));
        }
        let url = normalize_url(url)
            .map_err(|_| FederationError::Forbidden(format!("malformed url: {url}")))?;

        // Unknown callers get the same answer as malformed ones; the
        // registry contents are not an oracle.
        let server = self.registry.get_by_url(&url).map_err(|_| {
            FederationError::Forbidden(format!("{url} is not a trusted server candidate"))
        })?;

        if server.status == TrustStatus::Failure {
            return Err(FederationError::Forbidden(format!(
                "negotiation with {url} requires administrator retry"
            )));
        }
        Ok(server)
    }

    /// Inbound half, step two: call back to the announced URL and fetch
    /// the secret bound to `token`. Run by the background scheduler.
    ///
    /// Trusted rows short-circuit (identical repeated rounds are no-ops
    /// and an established secret is never overwritten). A 403 from the
    /// peer means the token was never issued — terminal, not retried.
    pub async fn fetch_shared_secret(
        &self,
        server_id: i64,
        token: &str,
    ) -> Result<TrustStatus, FederationError> {
        let lock = self.lock_for(server_id);
        let _guard = lock.lock().await;

        let server = match self.registry.get(server_id) {
            Ok(server) => server,
            Err(err) => {
                self.evict_lock(server_id);
                return Err(err);
            }
        };
        if server.status == TrustStatus::Trusted {
            return Ok(TrustStatus::Trusted);
        }

        let endpoint = format!(
            "{}/ocs/v2.php/cloud/shared-secret?url={}&token={}",
            server.url, self.config.public_url, token
        );
        let response = self
            .client
            .get(&endpoint)
            .header("OCS-APIRequest", "true")
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| FederationError::Transient(format!("fetch from {}: {e}", server.url)))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(FederationError::Forbidden(format!(
                "peer {} does not recognize this negotiation round",
                server.url
            )));
        }
        if !status.is_success() {
            return Err(FederationError::Transient(format!(
                "peer {} answered {status}",
                server.url
            )));
        }

        let reply: OcsReply<SharedSecretReply> = response
            .json()
            .await
            .map_err(|e| FederationError::Transient(format!("malformed secret reply: {e}")))?;
        let reply = reply.ocs.data;

        let committed = self.registry.set_secret(server_id, &reply.shared_secret)?;
        if let Some(sync_token) = &reply.sync_token {
            self.registry.set_sync_token(server_id, sync_token)?;
        }
        tracing::info!(server_id, url = %server.url, "shared secret established");
        Ok(committed.status)
    }

    /// Serves `GET /cloud/shared-secret` on the initiator side: redeem
    /// the token, commit our candidate, and hand it to the peer.
    ///
    /// Commit happens before the secret leaves this server, so both sides
    /// agree on it the moment the response is read. An already-trusted
    /// row only re-releases its own established secret.
    pub async fn release_shared_secret(
        &self,
        url: &str,
        token: &str,
    ) -> Result<SharedSecretReply, FederationError> {
        let (server_id, candidate) = self.registry.redeem_token(url, token)?;

        let lock = self.lock_for(server_id);
        let _guard = lock.lock().await;

        let server = match self.registry.get(server_id) {
            Ok(server) => server,
            Err(_) => {
                // Deleted between redeem and lock; do not resurrect anything.
                self.evict_lock(server_id);
                return Err(FederationError::Forbidden(format!(
                    "no negotiation round for {url}"
                )));
            }
        };

        let secret = match server.status {
            TrustStatus::Trusted => match server.shared_secret {
                Some(existing) if existing == candidate => existing,
                _ => {
                    return Err(FederationError::Forbidden(format!(
                        "negotiation with {url} already concluded"
                    )))
                }
            },
            TrustStatus::Failure => {
                return Err(FederationError::Forbidden(format!(
                    "negotiation with {url} requires administrator retry"
                )))
            }
            TrustStatus::Pending | TrustStatus::SecretRequested => {
                self.registry.set_secret(server_id, &candidate)?;
                self.registry.purge_tokens(server_id)?;
                candidate
            }
        };

        Ok(SharedSecretReply {
            shared_secret: secret,
            sync_token: None,
        })
    }
}
