//! Embedded SQL migrations.
//!
//! Each migration is a SQL file compiled into the binary. Applied
//! migrations are recorded in `_concord_migrations`, so re-running on an
//! existing database is a no-op. A migration runs inside a transaction
//! together with its tracking insert.

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations, in order. Append only.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_trusted_servers",
        sql: include_str!("migrations/000_trusted_servers.sql"),
    },
    Migration {
        name: "001_negotiation_tokens",
        sql: include_str!("migrations/001_negotiation_tokens.sql"),
    },
];

/// Errors during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    Failed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to read migration state: {0}")]
    State(rusqlite::Error),
}

/// Applies all pending migrations, returning how many ran.
pub fn apply_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply_from_list(conn, MIGRATIONS)
}

fn apply_from_list(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _concord_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| MigrationError::Failed {
        name: "_concord_migrations_bootstrap".to_string(),
        source: e,
    })?;

    let mut applied = 0;

    for migration in migrations {
        let done: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _concord_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::State)?;
        if done {
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| MigrationError::Failed {
                name: migration.name.to_string(),
                source: e,
            })?;
        tx.execute_batch(migration.sql)
            .and_then(|()| {
                tx.execute(
                    "INSERT INTO _concord_migrations (name) VALUES (?1)",
                    [migration.name],
                )
                .map(|_| ())
            })
            .map_err(|e| MigrationError::Failed {
                name: migration.name.to_string(),
                source: e,
            })?;
        tx.commit().map_err(|e| MigrationError::Failed {
            name: migration.name.to_string(),
            source: e,
        })?;

        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_on_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied, MIGRATIONS.len());

        for table in ["trusted_servers", "negotiation_tokens"] {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "{table} should exist");
        }
    }

    #[test]
    fn second_run_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(apply_migrations(&conn).unwrap(), MIGRATIONS.len());
        assert_eq!(apply_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn failed_migration_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        let bad = [Migration {
            name: "900_broken",
            sql: "CREATE TABLE probe (id INTEGER PRIMARY KEY); THIS IS NOT SQL;",
        }];

        let err = apply_from_list(&conn, &bad).expect_err("broken SQL should fail");
        match err {
            MigrationError::Failed { name, .. } => assert_eq!(name, "900_broken"),
            other => panic!("unexpected error: {other:?}"),
        }

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'probe')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!exists, "partial migration must roll back");
    }

    #[test]
    fn url_uniqueness_is_enforced_by_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO trusted_servers (url, status) VALUES ('https://a.example', 'pending')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO trusted_servers (url, status) VALUES ('https://a.example', 'pending')",
            [],
        );
        assert!(dup.is_err(), "duplicate url should violate UNIQUE");
    }
}
