//! Background negotiation scheduler.
//!
//! Handlers never wait for a peer round trip; they enqueue a
//! [`NegotiationJob`] and answer immediately. This worker drains the
//! queue, runs each job with bounded exponential backoff, and records
//! terminal outcomes on the server row. Progress is observable only by
//! polling the registry, which is the contract: poll-based, not
//! push-based.

use concord_federation::SecretNegotiator;
use concord_types::{FederationError, TrustStatus};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// A unit of negotiation work.
#[derive(Debug, Clone)]
pub enum NegotiationJob {
    /// Initiator side: announce a round to the peer.
    Outbound { server_id: i64 },
    /// Responder side: call back to the peer and fetch the secret bound
    /// to `token`.
    FetchSecret { server_id: i64, token: String },
}

impl NegotiationJob {
    fn server_id(&self) -> i64 {
        match self {
            NegotiationJob::Outbound { server_id }
            | NegotiationJob::FetchSecret { server_id, .. } => *server_id,
        }
    }
}

/// Retry limits shared by all jobs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff with jitter.
///
/// Delay for attempt `n` is `base * 2^n`, capped at `max_delay`, plus up
/// to 25% random jitter so two instances retrying against each other do
/// not stay in lockstep. `next_delay` returns `None` once the attempt
/// budget is spent.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.policy.max_attempts {
            return None;
        }
        let exp = self
            .policy
            .base_delay
            .saturating_mul(1u32 << self.attempt.min(16))
            .min(self.policy.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 4);
        self.attempt += 1;
        Some(exp + Duration::from_millis(jitter_ms))
    }
}

/// Spawns the scheduler loop. Each received job runs as its own task so a
/// slow peer cannot delay unrelated negotiations.
pub fn spawn_scheduler(
    negotiator: Arc<SecretNegotiator>,
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<NegotiationJob>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let negotiator = negotiator.clone();
            tokio::spawn(run_job(negotiator, policy, job));
        }
        tracing::debug!("negotiation scheduler shutting down");
    })
}

async fn run_job(negotiator: Arc<SecretNegotiator>, policy: RetryPolicy, job: NegotiationJob) {
    let server_id = job.server_id();
    let mut backoff = Backoff::new(policy);

    loop {
        let outcome = match &job {
            NegotiationJob::Outbound { server_id } => {
                negotiator.request_shared_secret(*server_id).await
            }
            NegotiationJob::FetchSecret { server_id, token } => {
                negotiator.fetch_shared_secret(*server_id, token).await
            }
        };

        match outcome {
            Ok(status) => {
                tracing::info!(server_id, status = %status, "negotiation step completed");
                return;
            }
            Err(FederationError::NotFound(_)) => {
                // The administrator removed the row mid-flight. Abort
                // without resurrecting it.
                tracing::info!(server_id, "negotiation cancelled, server removed");
                return;
            }
            Err(FederationError::Forbidden(reason)) => {
                // A refused round is not a failed server. Anyone can POST
                // an announcement; only exhausted retries may flip the row.
                tracing::warn!(server_id, reason = %reason, "peer refused negotiation round");
                return;
            }
            Err(err) if err.is_retryable() => match backoff.next_delay() {
                Some(delay) => {
                    tracing::debug!(
                        server_id,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient negotiation failure, will retry"
                    );
                    sleep(delay).await;
                }
                None => {
                    tracing::warn!(server_id, error = %err, "negotiation retries exhausted");
                    mark_failure(&negotiator, server_id);
                    return;
                }
            },
            Err(err) => {
                tracing::warn!(server_id, error = %err, "negotiation failed terminally");
                mark_failure(&negotiator, server_id);
                return;
            }
        }
    }
}

/// Marks a row failed after exhaustion. The row is kept — recovery is an
/// administrator decision, not something the scheduler does on its own.
fn mark_failure(negotiator: &SecretNegotiator, server_id: i64) {
    match negotiator.registry().set_status(server_id, TrustStatus::Failure) {
        Ok(()) => {}
        Err(FederationError::NotFound(_)) => {}
        Err(err) => {
            tracing::warn!(server_id, error = %err, "could not record negotiation failure");
        }
    }
    if let Err(err) = negotiator.registry().purge_tokens(server_id) {
        tracing::warn!(server_id, error = %err, "could not purge negotiation tokens");
    }
}
