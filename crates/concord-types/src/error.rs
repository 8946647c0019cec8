use crate::TrustStatus;
use thiserror::Error;

/// Error taxonomy for the federation subsystem.
///
/// The first three variants are surfaced synchronously to HTTP callers
/// (409 / 404 / 403). `Transient` is only ever handled by the retry
/// scheduler; `Exhausted` becomes the `failure` status on the server row
/// rather than an HTTP error.
#[derive(Debug, Error)]
pub enum FederationError {
    /// The URL is already present in the registry.
    #[error("server already exists: {0}")]
    Conflict(String),

    /// Unknown server id/url, or an unreachable candidate at add time.
    #[error("not found: {0}")]
    NotFound(String),

    /// A negotiation integrity check failed, or the caller is not
    /// permitted to negotiate.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The submitted URL is not a well-formed server address.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    /// A status write that the trust state machine does not permit.
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: TrustStatus, to: TrustStatus },

    /// Network failure or timeout; retried by the scheduler, never
    /// surfaced as a request failure for background negotiation.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retry attempts exhausted; the server row is marked `failure`.
    #[error("negotiation attempts exhausted for server {0}")]
    Exhausted(i64),

    /// Underlying storage error.
    #[error("database error: {0}")]
    Db(String),
}

impl FederationError {
    /// Whether the retry scheduler should attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FederationError::Transient(_))
    }
}
