//! Guild/channel cache (C2). Populated opportunistically whenever the
//! chat adapter observes a guild or channel, so slash-command autocomplete
//! and the web dashboard (C16) don't need a live gateway round trip.

use sqlx::{Row, SqlitePool};

use crate::db::models::{ChannelCache, GuildCache};
use crate::error::Result;

pub async fn upsert_guild(pool: &SqlitePool, id: &str, name: &str, icon: Option<&str>, owner_id: &str) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO guilds (id, name, icon, owner_id, updated_at) VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
           ON CONFLICT(id) DO UPDATE SET name = excluded.name, icon = excluded.icon,
           owner_id = excluded.owner_id, updated_at = CURRENT_TIMESTAMP"#,
    )
    .bind(id)
    .bind(name)
    .bind(icon)
    .bind(owner_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_channel(pool: &SqlitePool, id: &str, guild_id: &str, name: &str, kind: &str, position: i64) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO channels (id, guild_id, name, type, position, updated_at) VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
           ON CONFLICT(id) DO UPDATE SET name = excluded.name, type = excluded.type,
           position = excluded.position, updated_at = CURRENT_TIMESTAMP"#,
    )
    .bind(id)
    .bind(guild_id)
    .bind(name)
    .bind(kind)
    .bind(position)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_guild(pool: &SqlitePool, id: &str) -> Result<Option<GuildCache>> {
    let row = sqlx::query("SELECT id, name, icon, owner_id, updated_at FROM guilds WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| {
        Ok(GuildCache {
            id: r.try_get("id")?,
            name: r.try_get("name")?,
            icon: r.try_get("icon")?,
            owner_id: r.try_get("owner_id")?,
            updated_at: r.try_get("updated_at")?,
        })
    })
    .transpose()
}

pub async fn channels_for_guild(pool: &SqlitePool, guild_id: &str) -> Result<Vec<ChannelCache>> {
    let rows = sqlx::query(
        "SELECT id, guild_id, name, type, position, updated_at FROM channels \
         WHERE guild_id = ? ORDER BY position",
    )
    .bind(guild_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| {
            Ok(ChannelCache {
                id: r.try_get("id")?,
                guild_id: r.try_get("guild_id")?,
                name: r.try_get("name")?,
                kind: r.try_get("type")?,
                position: r.try_get("position")?,
                updated_at: r.try_get("updated_at")?,
            })
        })
        .collect()
}
