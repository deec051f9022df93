//! Versioned schema migrations, tracked in `_migrations`.

use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "users and api credentials",
        sql: r#"
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY,
                github_id   INTEGER UNIQUE NOT NULL,
                login       TEXT NOT NULL,
                name        TEXT,
                email       TEXT,
                avatar_url  TEXT,
                token       TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                last_login  INTEGER NOT NULL
            );

            CREATE TABLE api_credentials (
                api_key             TEXT PRIMARY KEY,
                github_user_id      INTEGER UNIQUE NOT NULL REFERENCES users(github_id),
                created_at          INTEGER NOT NULL,
                last_used           INTEGER,
                request_count       INTEGER NOT NULL DEFAULT 0,
                daily_request_count INTEGER NOT NULL DEFAULT 0,
                daily_reset_at      INTEGER NOT NULL,
                daily_limit         INTEGER NOT NULL
            );
            CREATE INDEX idx_api_credentials_user ON api_credentials(github_user_id);
        "#,
    },
];

pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version    INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        );",
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )?;
    debug!(current, "schema version");

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: e.to_string(),
            })?;
        conn.execute(
            "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, chrono::Utc::now().timestamp()],
        )?;
    }

    Ok(())
}
