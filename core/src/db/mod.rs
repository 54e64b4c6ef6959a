//! Persistence layer (C2): a transactional store for polls, votes, users,
//! preferences, and the guild/channel cache, fronted by a single connection
//! pool shared across the process (teacher pattern: one shared `AppState`
//! in `src/server/mod.rs`, generalized here to a pooled `SqlitePool`).

pub mod guilds;
pub mod migrations;
pub mod models;
pub mod polls;
pub mod users;
pub mod votes;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::Result;

/// Owns the connection pool and exposes typed repository accessors. Cheap
/// to clone (the pool is internally reference-counted).
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        migrations::run(&db.pool).await?;
        Ok(db)
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite pool");
        migrations::run(&pool).await.expect("run migrations");
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
