use crate::TrustStatus;
use serde::{Deserialize, Serialize};

/// A known remote server and its negotiation state, as stored in the
/// registry.
///
/// This is the internal row model. It carries the shared secret and must
/// never be serialized into an HTTP response; external callers see
/// [`TrustedServerEntry`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedServer {
    /// Registry-assigned identifier.
    pub id: i64,
    /// Normalized base URL of the remote server.
    pub url: String,
    /// Current trust status.
    pub status: TrustStatus,
    /// Shared secret; present if and only if `status == Trusted`.
    pub shared_secret: Option<String>,
    /// Opaque token for subsequent directory-exchange calls. Stored but
    /// otherwise unused by this service.
    pub sync_token: Option<String>,
}

impl TrustedServer {
    /// The externally visible projection of this row.
    pub fn to_entry(&self) -> TrustedServerEntry {
        TrustedServerEntry {
            id: self.id,
            status: self.status,
            url: self.url.clone(),
        }
    }
}

/// External projection of a trusted server: id, status, and url only.
///
/// The secret is not a field of this type, so no serializer configuration
/// can accidentally leak it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedServerEntry {
    pub id: i64,
    pub status: TrustStatus,
    pub url: String,
}
