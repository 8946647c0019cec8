//! Storage layer for the Concord federation service.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode
//! initialization, and embedded SQL migrations. The trusted-server
//! registry and the negotiation-token ledger are the only tables; both
//! are created through versioned migrations owned by this crate.
//!
//! SQLite is a deliberate choice: the trusted-server registry is tiny,
//! write traffic is negligible, and a single-file database keeps the
//! service deployable without an external database process. WAL mode
//! lets `list()` readers proceed while a negotiation commits.

mod migrations;
mod pool;

pub use migrations::apply_migrations;
pub use pool::{open_pool, DbPool, PoolSettings};
