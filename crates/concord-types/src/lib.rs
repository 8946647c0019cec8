//! Shared types for the Concord federation service.
//!
//! This crate is the leaf dependency of the workspace: the trust status
//! state machine, the trusted-server data model, the error taxonomy, and
//! URL normalization. It deliberately has no I/O dependencies so that
//! every other crate can agree on these types without pulling in the
//! database or HTTP stacks.

mod error;
mod server;
mod status;
mod url;

pub use error::FederationError;
pub use server::{TrustedServer, TrustedServerEntry};
pub use status::TrustStatus;
pub use url::normalize_url;
