//! Forward-only, versioned schema migrations (C2).
//!
//! Applied in order, recorded in `schema_migrations` (the "MigrationLedger").
//! `ALTER TABLE ... ADD COLUMN` statements are skipped — not failed — when
//! the column already exists, so migrations are safe to re-run against a
//! database that predates the ledger (mirrors `polly/migrations.py`).

use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::error::Result;

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        statements: &[
            r#"CREATE TABLE IF NOT EXISTS polls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(255) NOT NULL,
                question TEXT NOT NULL,
                options_json TEXT NOT NULL,
                emojis_json TEXT NOT NULL,
                image_path VARCHAR(500),
                image_message_text TEXT,
                image_message_id VARCHAR(50),
                server_id VARCHAR(50) NOT NULL,
                server_name VARCHAR(255),
                channel_id VARCHAR(50) NOT NULL,
                channel_name VARCHAR(255),
                creator_id VARCHAR(50) NOT NULL,
                message_id VARCHAR(50),
                open_time DATETIME NOT NULL,
                close_time DATETIME NOT NULL,
                timezone VARCHAR(50) NOT NULL DEFAULT 'UTC',
                anonymous BOOLEAN NOT NULL DEFAULT 0,
                multiple_choice BOOLEAN NOT NULL DEFAULT 0,
                max_choices INTEGER,
                open_immediately BOOLEAN NOT NULL DEFAULT 0,
                ping_role_enabled BOOLEAN NOT NULL DEFAULT 0,
                ping_role_id VARCHAR(50),
                ping_role_name VARCHAR(255),
                ping_on_open BOOLEAN NOT NULL DEFAULT 0,
                ping_on_close BOOLEAN NOT NULL DEFAULT 0,
                ping_on_update BOOLEAN NOT NULL DEFAULT 0,
                status VARCHAR(20) NOT NULL DEFAULT 'scheduled',
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#,
            r#"CREATE TABLE IF NOT EXISTS votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id INTEGER NOT NULL REFERENCES polls(id),
                user_id VARCHAR(50) NOT NULL,
                option_index INTEGER NOT NULL,
                voted_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                changed_at DATETIME
            )"#,
            r#"CREATE TABLE IF NOT EXISTS users (
                id VARCHAR(50) PRIMARY KEY,
                username VARCHAR(255) NOT NULL,
                avatar VARCHAR(500),
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#,
            r#"CREATE TABLE IF NOT EXISTS user_preferences (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id VARCHAR(50) NOT NULL,
                last_server_id VARCHAR(50),
                last_channel_id VARCHAR(50),
                default_timezone VARCHAR(50) NOT NULL DEFAULT 'UTC',
                timezone_explicitly_set BOOLEAN NOT NULL DEFAULT 0,
                last_role_id VARCHAR(50),
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#,
            r#"CREATE TABLE IF NOT EXISTS guilds (
                id VARCHAR(50) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                icon VARCHAR(500),
                owner_id VARCHAR(50) NOT NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#,
            r#"CREATE TABLE IF NOT EXISTS channels (
                id VARCHAR(50) PRIMARY KEY,
                guild_id VARCHAR(50) NOT NULL,
                name VARCHAR(255) NOT NULL,
                type VARCHAR(50) NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_votes_poll_id ON votes(poll_id)",
        ],
    },
    Migration {
        version: 2,
        name: "vote_change_tracking",
        statements: &[
            // ADD COLUMN on a table that already carries this column (from a
            // rebuilt v1 database) must not fail — see apply_one below.
            "ALTER TABLE votes ADD COLUMN changed_at DATETIME",
        ],
    },
];

fn is_duplicate_column_error(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.message().contains("duplicate column name"))
}

async fn ensure_ledger(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )"#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COALESCE(MAX(version), 0) as v FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(row.try_get::<i64, _>("v")?)
}

async fn apply_one(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;
    for statement in migration.statements {
        if let Err(err) = sqlx::query(statement).execute(&mut *tx).await {
            if statement.contains("ADD COLUMN") && is_duplicate_column_error(&err) {
                warn!(
                    "migration {} '{}': column already exists, skipping statement",
                    migration.version, migration.name
                );
                continue;
            }
            return Err(err.into());
        }
    }
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Apply all migrations newer than the ledger's recorded version, in
/// order. Idempotent: re-running against an up-to-date database is a
/// no-op.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    ensure_ledger(pool).await?;
    let current = current_version(pool).await?;
    for migration in MIGRATIONS {
        if migration.version > current {
            info!("applying migration {} '{}'", migration.version, migration.name);
            apply_one(pool, migration).await?;
        }
    }
    Ok(())
}
