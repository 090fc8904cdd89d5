//! Schema versions for the libSQL backend.
//!
//! Applied versions are recorded in `_migrations`. Each step runs in its own
//! transaction together with its version record.

use libsql::Connection;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "creation_jobs",
        sql: r#"
            CREATE TABLE IF NOT EXISTS creation_jobs (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                kind TEXT NOT NULL,
                details TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                parts TEXT NOT NULL,
                handles TEXT NOT NULL DEFAULT '[]',
                result_keys TEXT NOT NULL DEFAULT '[]',
                error TEXT,
                thumbnail_key TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                dispatched_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_creation_jobs_status ON creation_jobs(status);
            CREATE INDEX IF NOT EXISTS idx_creation_jobs_created ON creation_jobs(created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "assets",
        sql: r#"
            CREATE TABLE IF NOT EXISTS assets (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
    },
];

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Cannot create _migrations: {e}")))?;

    let applied = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for step in pending {
        apply(conn, step).await.map_err(|e| {
            StoreError::Migration(format!("V{} ({}): {e}", step.version, step.name))
        })?;
        tracing::info!(version = step.version, name = step.name, "Migration applied");
    }
    Ok(())
}

async fn apply(conn: &Connection, step: &Migration) -> Result<(), libsql::Error> {
    let tx = conn.transaction().await?;
    tx.execute_batch(step.sql).await?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![step.version, step.name],
    )
    .await?;
    tx.commit().await
}

/// Highest applied version, 0 for a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    let read = |e: libsql::Error| StoreError::Migration(format!("Cannot read schema version: {e}"));
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(read)?;
    match rows.next().await.map_err(read)? {
        Some(row) => row.get(0).map_err(read),
        None => Ok(0),
    }
}
