//! Federation trust core for Concord.
//!
//! Two server instances establish mutual trust by negotiating an opaque
//! shared secret. This crate owns the two halves of that process:
//!
//! - [`TrustedServerRegistry`] — the persistent registry of known remote
//!   servers, their trust status, and the ledger of issued negotiation
//!   tokens. All status writes are guarded by the trust state machine in
//!   `concord-types` and use status-predicated UPDATEs, so a lost race
//!   can never commit a second secret for the same row.
//! - [`SecretNegotiator`] — the handshake driver. Outbound, it issues a
//!   token plus secret candidate and posts them to the peer; inbound, it
//!   verifies the claimed URL by calling back to it, since only the real
//!   owner of a URL can answer its own previously issued token.
//!
//! The HTTP surface that peers and administrators actually hit lives in
//! `concord-server`; everything here is transport-shaped but
//! framework-free.

mod negotiator;
mod registry;

pub use negotiator::{
    NegotiatorConfig, SecretNegotiator, SharedSecretPush, SharedSecretReply,
};
pub use registry::TrustedServerRegistry;
