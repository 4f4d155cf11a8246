//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

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
        name: "campaign_lifecycle",
        sql: r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                prompt TEXT NOT NULL,
                company TEXT,
                campaign_purpose TEXT,
                target_audience TEXT,
                platform TEXT,
                product_link TEXT,
                approval_required INTEGER NOT NULL DEFAULT 1,
                pipeline_state TEXT NOT NULL DEFAULT 'created',
                pipeline_locked INTEGER NOT NULL DEFAULT 0,
                generated_content TEXT,
                approved_by TEXT,
                approved_at TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_campaigns_state ON campaigns(pipeline_state);
            CREATE INDEX IF NOT EXISTS idx_campaigns_created ON campaigns(created_at);

            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                state TEXT NOT NULL,
                classification TEXT,
                contacts TEXT,
                channel_map TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_pipeline_runs_campaign ON pipeline_runs(campaign_id);

            CREATE TABLE IF NOT EXISTS stage_logs (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES pipeline_runs(id),
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration_ms INTEGER,
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_stage_logs_campaign ON stage_logs(campaign_id);
            CREATE INDEX IF NOT EXISTS idx_stage_logs_run ON stage_logs(run_id);
        "#,
    },
    Migration {
        version: 2,
        name: "contact_store",
        sql: r#"
            CREATE TABLE IF NOT EXISTS contacts (
                email TEXT PRIMARY KEY,
                name TEXT,
                role TEXT,
                company TEXT,
                location TEXT,
                category TEXT,
                phone TEXT,
                preferred_time TEXT,
                email_click_rate REAL,
                linkedin_click_rate REAL,
                call_answer_rate REAL
            );

            CREATE TABLE IF NOT EXISTS icp_scores (
                contact_email TEXT PRIMARY KEY REFERENCES contacts(email),
                buying_probability REAL,
                scored_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
    },
    Migration {
        version: 3,
        name: "outbound_ledger",
        sql: r#"
            CREATE TABLE IF NOT EXISTS outbound_messages (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                contact_email TEXT NOT NULL,
                channel TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                send_status TEXT NOT NULL DEFAULT 'pending',
                provider_message_id TEXT,
                error_message TEXT,
                sent_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_outbound_active_tuple
                ON outbound_messages(campaign_id, contact_email, channel)
                WHERE send_status IN ('pending', 'sent');
            CREATE INDEX IF NOT EXISTS idx_outbound_campaign ON outbound_messages(campaign_id);
            CREATE INDEX IF NOT EXISTS idx_outbound_provider_id ON outbound_messages(provider_message_id);

            CREATE TABLE IF NOT EXISTS engagement_events (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL,
                contact_email TEXT NOT NULL,
                channel TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                occurred_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_engagement_campaign ON engagement_events(campaign_id);
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

    let current_version = get_current_version(conn).await?;

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

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
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

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "_migrations",
            "campaigns",
            "pipeline_runs",
            "stage_logs",
            "contacts",
            "icp_scores",
            "outbound_messages",
            "engagement_events",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn active_tuple_index_allows_retry_after_failure() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        conn.execute(
            "INSERT INTO campaigns (id, name, prompt, created_at, updated_at) VALUES ('c1', 'c', 'p', '2026-01-01', '2026-01-01')",
            (),
        )
        .await
        .unwrap();

        let insert = "INSERT OR IGNORE INTO outbound_messages (id, campaign_id, contact_email, channel, send_status, created_at) VALUES (?1, 'c1', 'a@x.com', 'email', ?2, '2026-01-01')";

        let first = conn.execute(insert, libsql::params!["m1", "failed"]).await.unwrap();
        let second = conn.execute(insert, libsql::params!["m2", "sent"]).await.unwrap();
        let third = conn.execute(insert, libsql::params!["m3", "pending"]).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 1);
        // A sent row holds the tuple.
        assert_eq!(third, 0);
    }
}
