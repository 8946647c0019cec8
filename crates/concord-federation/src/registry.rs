//! Persistent registry of trusted servers and issued negotiation tokens.

use concord_db::DbPool;
use concord_types::{normalize_url, FederationError, TrustStatus, TrustedServer, TrustedServerEntry};
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};

/// Registry of known remote servers.
///
/// Owns the connection pool and is the only component that writes to the
/// `trusted_servers` and `negotiation_tokens` tables. Status writes go
/// through [`TrustStatus::can_transition`] and a status-predicated UPDATE
/// (a row-level compare-and-swap), which enforces the at-most-one-active
/// -negotiation invariant even if two handshake rounds race.
pub struct TrustedServerRegistry {
    pool: DbPool,
}

impl TrustedServerRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>, FederationError> {
        self.pool
            .get()
            .map_err(|e| FederationError::Db(format!("connection pool: {e}")))
    }

    /// Inserts a new server with status `pending`.
    ///
    /// The URL is normalized first so that spelling variants collapse to
    /// one registry key. Returns `Conflict` when the URL already exists.
    pub fn add(&self, url: &str) -> Result<TrustedServer, FederationError> {
        let url = normalize_url(url)?;
        let conn = self.conn()?;

        let result = conn.execute(
            "INSERT INTO trusted_servers (url, status) VALUES (?1, ?2)",
            params![url, TrustStatus::Pending.as_str()],
        );
        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                tracing::info!(id, url = %url, "trusted server added");
                self.get(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(FederationError::Conflict(url))
            }
            Err(e) => Err(FederationError::Db(e.to_string())),
        }
    }

    /// Hard-deletes a server row. `NotFound` when the id is unknown —
    /// deleting twice reports the second delete as an error, not success.
    pub fn remove(&self, id: i64) -> Result<(), FederationError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM trusted_servers WHERE id = ?1", params![id])
            .map_err(|e| FederationError::Db(e.to_string()))?;
        if deleted == 0 {
            return Err(FederationError::NotFound(format!("server id {id}")));
        }
        tracing::info!(id, "trusted server removed");
        Ok(())
    }

    /// All known servers, id-ascending, as the external projection.
    /// The shared secret is not part of the projection type.
    pub fn list(&self) -> Result<Vec<TrustedServerEntry>, FederationError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, url, status FROM trusted_servers ORDER BY id ASC")
            .map_err(|e| FederationError::Db(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(2)?;
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, status))
            })
            .map_err(|e| FederationError::Db(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, url, status) = row.map_err(|e| FederationError::Db(e.to_string()))?;
            let status = status
                .parse::<TrustStatus>()
                .map_err(FederationError::Db)?;
            entries.push(TrustedServerEntry { id, status, url });
        }
        Ok(entries)
    }

    pub fn get(&self, id: i64) -> Result<TrustedServer, FederationError> {
        let conn = self.conn()?;
        Self::row_by(&conn, "id = ?1", params![id])?
            .ok_or_else(|| FederationError::NotFound(format!("server id {id}")))
    }

    pub fn get_by_url(&self, url: &str) -> Result<TrustedServer, FederationError> {
        let url = normalize_url(url)?;
        let conn = self.conn()?;
        Self::row_by(&conn, "url = ?1", params![url])?
            .ok_or(FederationError::NotFound(url))
    }

    fn row_by(
        conn: &Connection,
        predicate: &str,
        args: impl rusqlite::Params,
    ) -> Result<Option<TrustedServer>, FederationError> {
        let sql = format!(
            "SELECT id, url, status, shared_secret, sync_token FROM trusted_servers WHERE {predicate}"
        );
        conn.query_row(&sql, args, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .optional()
        .map_err(|e| FederationError::Db(e.to_string()))?
        .map(|(id, url, status, shared_secret, sync_token)| {
            Ok(TrustedServer {
                id,
                url,
                status: status.parse::<TrustStatus>().map_err(FederationError::Db)?,
                shared_secret,
                sync_token,
            })
        })
        .transpose()
    }

    /// Commits a shared secret and advances the row to `trusted`.
    ///
    /// The UPDATE carries the eligibility predicate, so the commit and the
    /// status check are one atomic statement. A row that is already
    /// trusted (or failed) is left untouched and the call is rejected.
    pub fn set_secret(&self, id: i64, secret: &str) -> Result<TrustedServer, FederationError> {
        if secret.is_empty() {
            return Err(FederationError::Forbidden(
                "refusing to store an empty shared secret".to_string(),
            ));
        }
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE trusted_servers
                 SET shared_secret = ?1, status = ?2, updated_at = datetime('now')
                 WHERE id = ?3 AND status IN (?4, ?5)",
                params![
                    secret,
                    TrustStatus::Trusted.as_str(),
                    id,
                    TrustStatus::Pending.as_str(),
                    TrustStatus::SecretRequested.as_str(),
                ],
            )
            .map_err(|e| FederationError::Db(e.to_string()))?;

        if changed == 0 {
            // Either the row is gone or it is not negotiation-eligible.
            let current = self.get(id)?;
            return Err(FederationError::IllegalTransition {
                from: current.status,
                to: TrustStatus::Trusted,
            });
        }

        tracing::info!(id, "shared secret committed, server trusted");
        self.get(id)
    }

    /// Applies a guarded status transition.
    ///
    /// Reads the current status, consults the state machine, then writes
    /// with the old status as predicate. A concurrent writer that moved
    /// the row in between makes the CAS miss, reported as `Transient` so
    /// the caller can re-read and decide.
    pub fn set_status(&self, id: i64, next: TrustStatus) -> Result<(), FederationError> {
        let current = self.get(id)?;
        if current.status == next {
            return Ok(());
        }
        if !current.status.can_transition(next) {
            return Err(FederationError::IllegalTransition {
                from: current.status,
                to: next,
            });
        }
        if next == TrustStatus::Trusted {
            // Trusted is only reachable through set_secret; a bare status
            // write would break the secret <=> trusted invariant.
            return Err(FederationError::IllegalTransition {
                from: current.status,
                to: next,
            });
        }

        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE trusted_servers
                 SET status = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND status = ?3",
                params![next.as_str(), id, current.status.as_str()],
            )
            .map_err(|e| FederationError::Db(e.to_string()))?;
        if changed == 0 {
            return Err(FederationError::Transient(format!(
                "status of server {id} changed concurrently"
            )));
        }
        tracing::debug!(id, from = %current.status, to = %next, "status transition");
        Ok(())
    }

    /// Stores the directory-exchange sync token. Storage only.
    pub fn set_sync_token(&self, id: i64, sync_token: &str) -> Result<(), FederationError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE trusted_servers
                 SET sync_token = ?1, updated_at = datetime('now')
                 WHERE id = ?2",
                params![sync_token, id],
            )
            .map_err(|e| FederationError::Db(e.to_string()))?;
        if changed == 0 {
            return Err(FederationError::NotFound(format!("server id {id}")));
        }
        Ok(())
    }

    /// Generates and records a negotiation token plus secret candidate
    /// for an outbound round against `server_id`.
    pub fn issue_token(&self, server_id: i64) -> Result<(String, String), FederationError> {
        let token = random_opaque();
        let candidate = random_opaque();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO negotiation_tokens (server_id, token, secret_candidate)
             VALUES (?1, ?2, ?3)",
            params![server_id, token, candidate],
        )
        .map_err(|e| FederationError::Db(e.to_string()))?;
        Ok((token, candidate))
    }

    /// Looks up the secret candidate for a token, but only if the token
    /// was issued for the server registered under `url`. This is the
    /// integrity check behind `GET /cloud/shared-secret`: presenting a
    /// token for someone else's URL yields `Forbidden`, never data.
    pub fn redeem_token(&self, url: &str, token: &str) -> Result<(i64, String), FederationError> {
        let url = normalize_url(url)?;
        let conn = self.conn()?;
        conn.query_row(
            "SELECT s.id, t.secret_candidate
             FROM negotiation_tokens t
             JOIN trusted_servers s ON s.id = t.server_id
             WHERE s.url = ?1 AND t.token = ?2",
            params![url, token],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(|e| FederationError::Db(e.to_string()))?
        .ok_or_else(|| FederationError::Forbidden(format!("no negotiation round for {url}")))
    }

    /// Drops all issued tokens for a server, ending its round.
    pub fn purge_tokens(&self, server_id: i64) -> Result<(), FederationError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM negotiation_tokens WHERE server_id = ?1",
            params![server_id],
        )
        .map_err(|e| FederationError::Db(e.to_string()))?;
        Ok(())
    }
}

/// 256 bits of OS randomness, hex-encoded. Used for both negotiation
/// tokens and secret candidates.
fn random_opaque() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
