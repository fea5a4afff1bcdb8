//! Version-tracked database migrations for the ledger.
//!
//! `run_migrations()` applies every entry of `MIGRATIONS` newer than the
//! recorded version, in order. A pre-existing ledger (an `email_scores` table but
//! no `_migrations` table) is adopted as V1 without re-creating its tables.

use libsql::Connection;

use crate::error::DatabaseError;

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
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS email_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id TEXT UNIQUE,
                sender TEXT,
                subject TEXT,
                date_processed TIMESTAMP,
                importance_score REAL,
                spam_score REAL,
                category TEXT,
                reasoning TEXT,
                confidence REAL,
                model_version TEXT,
                labels_applied TEXT,
                user_feedback TEXT
            );

            CREATE TABLE IF NOT EXISTS processing_state (
                key TEXT PRIMARY KEY,
                value TEXT
            );
        "#,
    },
    Migration {
        version: 2,
        name: "date_processed_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_email_scores_date_processed
                ON email_scores(date_processed);
            CREATE INDEX IF NOT EXISTS idx_email_scores_category
                ON email_scores(category);
        "#,
    },
];

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let mut current_version = get_current_version(conn).await?;

    // Legacy ledger: the V1 tables already exist with the same shape
    if current_version == 0 && legacy_tables_exist(conn).await? {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS processing_state (key TEXT PRIMARY KEY, value TEXT)",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::Migration(format!("Failed to create processing_state on legacy DB: {e}"))
        })?;
        seed_version(conn, 1, "initial_schema").await?;
        current_version = 1;
        tracing::info!("Legacy ledger detected — seeded migration V1");
    }

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::debug!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );
    Ok(())
}

/// Highest applied migration version, or 0 on a fresh database.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    scalar(conn, "SELECT COALESCE(MAX(version), 0) FROM _migrations", "migration version").await
}

/// Whether a ledger table predating `_migrations` is present.
async fn legacy_tables_exist(conn: &Connection) -> Result<bool, DatabaseError> {
    let count = scalar(
        conn,
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='email_scores'",
        "legacy table check",
    )
    .await?;
    Ok(count > 0)
}

/// Single integer result of `sql`; 0 when no row comes back.
async fn scalar(conn: &Connection, sql: &str, what: &str) -> Result<i64, DatabaseError> {
    let row = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("{what}: {e}")))?
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("{what}: {e}")))?;

    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("{what}: {e}"))),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, table: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                libsql::params![table],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        count == 1
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in ["email_scores", "processing_state", "_migrations"] {
            assert!(table_exists(&conn, table).await, "Table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        // Running again should not fail
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[tokio::test]
    async fn legacy_ledger_is_adopted() {
        let conn = test_conn().await;
        conn.execute_batch(
            "CREATE TABLE email_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id TEXT UNIQUE,
                sender TEXT,
                subject TEXT,
                date_processed TIMESTAMP,
                importance_score REAL,
                spam_score REAL,
                category TEXT,
                reasoning TEXT,
                confidence REAL,
                model_version TEXT,
                labels_applied TEXT,
                user_feedback TEXT
            );
            INSERT INTO email_scores (email_id, sender, category, confidence)
                VALUES ('legacy-1', 'a@b.c', 'work', 0.8);",
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        assert!(table_exists(&conn, "processing_state").await);
        let mut rows = conn
            .query("SELECT COUNT(*) FROM email_scores", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
        assert_eq!(get_current_version(&conn).await.unwrap(), 2);
    }
}
