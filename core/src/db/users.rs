//! User identity cache and per-user preferences (C2).

use sqlx::{Row, SqlitePool};

use crate::db::models::{User, UserPreference};
use crate::error::Result;

pub async fn upsert(pool: &SqlitePool, id: &str, username: &str, avatar: Option<&str>) -> Result<User> {
    sqlx::query(
        r#"INSERT INTO users (id, username, avatar, updated_at) VALUES (?, ?, ?, CURRENT_TIMESTAMP)
           ON CONFLICT(id) DO UPDATE SET username = excluded.username, avatar = excluded.avatar,
           updated_at = CURRENT_TIMESTAMP"#,
    )
    .bind(id)
    .bind(username)
    .bind(avatar)
    .execute(pool)
    .await?;

    get(pool, id)
        .await?
        .ok_or_else(|| crate::error::PollyError::unexpected("user vanished immediately after upsert"))
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let row = sqlx::query("SELECT id, username, avatar, created_at, updated_at FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| {
        Ok(User {
            id: r.try_get("id")?,
            username: r.try_get("username")?,
            avatar: r.try_get("avatar")?,
            created_at: r.try_get("created_at")?,
            updated_at: r.try_get("updated_at")?,
        })
    })
    .transpose()
}

pub async fn get_preference(pool: &SqlitePool, user_id: &str) -> Result<Option<UserPreference>> {
    let row = sqlx::query(
        "SELECT id, user_id, last_server_id, last_channel_id, default_timezone, \
         timezone_explicitly_set, last_role_id, updated_at FROM user_preferences WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| {
        Ok(UserPreference {
            id: r.try_get("id")?,
            user_id: r.try_get("user_id")?,
            last_server_id: r.try_get("last_server_id")?,
            last_channel_id: r.try_get("last_channel_id")?,
            default_timezone: r.try_get("default_timezone")?,
            timezone_explicitly_set: r.try_get("timezone_explicitly_set")?,
            last_role_id: r.try_get("last_role_id")?,
            updated_at: r.try_get("updated_at")?,
        })
    })
    .transpose()
}

/// Record the server/channel a user most recently interacted in, and
/// optionally pin an explicit timezone choice. Upserts on `user_id`
/// since a fresh user has no preference row yet.
pub async fn remember_context(
    pool: &SqlitePool,
    user_id: &str,
    server_id: &str,
    channel_id: &str,
) -> Result<()> {
    let existing = get_preference(pool, user_id).await?;
    match existing {
        Some(_) => {
            sqlx::query(
                "UPDATE user_preferences SET last_server_id = ?, last_channel_id = ?, \
                 updated_at = CURRENT_TIMESTAMP WHERE user_id = ?",
            )
            .bind(server_id)
            .bind(channel_id)
            .bind(user_id)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO user_preferences (user_id, last_server_id, last_channel_id, default_timezone) \
                 VALUES (?, ?, ?, 'UTC')",
            )
            .bind(user_id)
            .bind(server_id)
            .bind(channel_id)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

pub async fn set_timezone(pool: &SqlitePool, user_id: &str, timezone: &str) -> Result<()> {
    let existing = get_preference(pool, user_id).await?;
    match existing {
        Some(_) => {
            sqlx::query(
                "UPDATE user_preferences SET default_timezone = ?, timezone_explicitly_set = 1, \
                 updated_at = CURRENT_TIMESTAMP WHERE user_id = ?",
            )
            .bind(timezone)
            .bind(user_id)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO user_preferences (user_id, default_timezone, timezone_explicitly_set) \
                 VALUES (?, ?, 1)",
            )
            .bind(user_id)
            .bind(timezone)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}
