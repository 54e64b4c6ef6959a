//! Poll repository. The persistence layer exclusively owns `Poll` rows
//! (DESIGN.md's aggregate-root redesign of the source ORM's cyclic
//! back-references) — callers never mutate a `Poll` struct and expect it
//! to persist; every write goes through one of these methods.

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool};

use crate::db::models::{Poll, PollStatus, RolePing};
use crate::error::{PollyError, Result};

pub struct NewPoll {
    pub name: String,
    pub question: String,
    pub options: Vec<String>,
    pub emojis: Vec<String>,
    pub image_path: Option<String>,
    pub image_caption: Option<String>,
    pub server_id: String,
    pub server_name: Option<String>,
    pub channel_id: String,
    pub channel_name: Option<String>,
    pub creator_id: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub timezone: String,
    pub anonymous: bool,
    pub multiple_choice: bool,
    pub max_choices: Option<i64>,
    pub open_immediately: bool,
    pub role_ping: RolePing,
}

fn row_to_poll(row: &sqlx::sqlite::SqliteRow) -> Result<Poll> {
    let options_json: String = row.try_get("options_json")?;
    let emojis_json: String = row.try_get("emojis_json")?;
    let status: String = row.try_get("status")?;

    Ok(Poll {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        question: row.try_get("question")?,
        options: serde_json::from_str(&options_json)?,
        emojis: serde_json::from_str(&emojis_json)?,
        image_path: row.try_get("image_path")?,
        image_caption: row.try_get("image_message_text")?,
        image_message_id: row.try_get("image_message_id")?,
        server_id: row.try_get("server_id")?,
        server_name: row.try_get("server_name")?,
        channel_id: row.try_get("channel_id")?,
        channel_name: row.try_get("channel_name")?,
        creator_id: row.try_get("creator_id")?,
        message_id: row.try_get("message_id")?,
        open_time: row.try_get("open_time")?,
        close_time: row.try_get("close_time")?,
        timezone: row.try_get("timezone")?,
        anonymous: row.try_get("anonymous")?,
        multiple_choice: row.try_get("multiple_choice")?,
        max_choices: row.try_get("max_choices")?,
        open_immediately: row.try_get("open_immediately")?,
        role_ping: RolePing {
            enabled: row.try_get("ping_role_enabled")?,
            role_id: row.try_get("ping_role_id")?,
            role_name: row.try_get("ping_role_name")?,
            on_open: row.try_get("ping_on_open")?,
            on_close: row.try_get("ping_on_close")?,
            on_update: row.try_get("ping_on_update")?,
        },
        status: PollStatus::parse(&status),
        created_at: row.try_get("created_at")?,
    })
}

const SELECT_POLL: &str = "SELECT id, name, question, options_json, emojis_json, image_path, \
    image_message_text, image_message_id, server_id, server_name, channel_id, channel_name, \
    creator_id, message_id, open_time, close_time, timezone, anonymous, multiple_choice, \
    max_choices, open_immediately, ping_role_enabled, ping_role_id, ping_role_name, \
    ping_on_open, ping_on_close, ping_on_update, status, created_at FROM polls";

pub async fn create(pool: &SqlitePool, new: NewPoll) -> Result<Poll> {
    let options_json = serde_json::to_string(&new.options)?;
    let emojis_json = serde_json::to_string(&new.emojis)?;

    let id: i64 = sqlx::query(
        r#"INSERT INTO polls (
            name, question, options_json, emojis_json, image_path, image_message_text,
            server_id, server_name, channel_id, channel_name, creator_id, open_time,
            close_time, timezone, anonymous, multiple_choice, max_choices, open_immediately,
            ping_role_enabled, ping_role_id, ping_role_name, ping_on_open, ping_on_close,
            ping_on_update, status
        ) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,'scheduled')
        RETURNING id"#,
    )
    .bind(&new.name)
    .bind(&new.question)
    .bind(&options_json)
    .bind(&emojis_json)
    .bind(&new.image_path)
    .bind(&new.image_caption)
    .bind(&new.server_id)
    .bind(&new.server_name)
    .bind(&new.channel_id)
    .bind(&new.channel_name)
    .bind(&new.creator_id)
    .bind(new.open_time)
    .bind(new.close_time)
    .bind(&new.timezone)
    .bind(new.anonymous)
    .bind(new.multiple_choice)
    .bind(new.max_choices)
    .bind(new.open_immediately)
    .bind(new.role_ping.enabled)
    .bind(&new.role_ping.role_id)
    .bind(&new.role_ping.role_name)
    .bind(new.role_ping.on_open)
    .bind(new.role_ping.on_close)
    .bind(new.role_ping.on_update)
    .fetch_one(pool)
    .await?
    .try_get("id")?;

    get(pool, id).await?.ok_or(PollyError::PollNotFound(id))
}

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Poll>> {
    let row = sqlx::query(&format!("{SELECT_POLL} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_poll).transpose()
}

pub async fn get_locking<'e, E>(executor: E, id: i64) -> Result<Option<Poll>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("{SELECT_POLL} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(row_to_poll).transpose()
}

/// Looks a poll up by its posted chat message id, used by the gateway
/// event handler which only receives `(channel_id, message_id)` from a
/// reaction event, never the poll id directly.
pub async fn get_by_message_id(pool: &SqlitePool, message_id: &str) -> Result<Option<Poll>> {
    let row = sqlx::query(&format!("{SELECT_POLL} WHERE message_id = ?"))
        .bind(message_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_poll).transpose()
}

pub async fn list_by_status(pool: &SqlitePool, status: PollStatus) -> Result<Vec<Poll>> {
    let rows = sqlx::query(&format!("{SELECT_POLL} WHERE status = ? ORDER BY id DESC"))
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_poll).collect()
}

pub async fn list_newest_first(pool: &SqlitePool, status: PollStatus, limit: i64) -> Result<Vec<Poll>> {
    let rows = sqlx::query(&format!("{SELECT_POLL} WHERE status = ? ORDER BY id DESC LIMIT ?"))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_poll).collect()
}

/// Transition `scheduled -> active`, recording the posted message id.
/// Caller must already hold the transaction that validated the guard.
pub async fn mark_active<'e, E>(executor: E, id: i64, message_id: &str, image_message_id: Option<&str>) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE polls SET status = 'active', message_id = ?, image_message_id = ? WHERE id = ?",
    )
    .bind(message_id)
    .bind(image_message_id)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Transition `active -> closed`.
pub async fn mark_closed<'e, E>(executor: E, id: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE polls SET status = 'closed' WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Transition `closed -> active` (reopen), optionally extending
/// `close_time`. Never touches `message_id` — reopening edits the
/// existing message rather than posting a new one.
pub async fn reopen<'e, E>(executor: E, id: i64, new_close_time: DateTime<Utc>) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE polls SET status = 'active', close_time = ? WHERE id = ?")
        .bind(new_close_time)
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete_cascade(pool: &SqlitePool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM votes WHERE poll_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use chrono::Duration;

    fn sample_new_poll() -> NewPoll {
        let now = Utc::now();
        NewPoll {
            name: "T1".into(),
            question: "Q?".into(),
            options: vec!["A".into(), "B".into()],
            emojis: vec!["🇦".into(), "🇧".into()],
            image_path: None,
            image_caption: None,
            server_id: "g1".into(),
            server_name: None,
            channel_id: "c1".into(),
            channel_name: None,
            creator_id: "u1".into(),
            open_time: now + Duration::minutes(1),
            close_time: now + Duration::minutes(3),
            timezone: "UTC".into(),
            anonymous: false,
            multiple_choice: false,
            max_choices: Some(1),
            open_immediately: false,
            role_ping: RolePing::default(),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let db = Db::connect_in_memory().await;
        let poll = create(db.pool(), sample_new_poll()).await.unwrap();
        assert_eq!(poll.status, PollStatus::Scheduled);
        assert_eq!(poll.options, vec!["A", "B"]);

        let fetched = get(db.pool(), poll.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, poll.id);
        assert_eq!(fetched.emojis, vec!["🇦", "🇧"]);
    }

    #[tokio::test]
    async fn status_transitions_persist() {
        let db = Db::connect_in_memory().await;
        let poll = create(db.pool(), sample_new_poll()).await.unwrap();

        mark_active(db.pool(), poll.id, "msg-1", None).await.unwrap();
        let active = get(db.pool(), poll.id).await.unwrap().unwrap();
        assert_eq!(active.status, PollStatus::Active);
        assert_eq!(active.message_id.as_deref(), Some("msg-1"));

        mark_closed(db.pool(), poll.id).await.unwrap();
        let closed = get(db.pool(), poll.id).await.unwrap().unwrap();
        assert_eq!(closed.status, PollStatus::Closed);
    }

    #[tokio::test]
    async fn lookup_by_message_id_finds_active_poll() {
        let db = Db::connect_in_memory().await;
        let poll = create(db.pool(), sample_new_poll()).await.unwrap();
        mark_active(db.pool(), poll.id, "msg-42", None).await.unwrap();

        let found = get_by_message_id(db.pool(), "msg-42").await.unwrap().unwrap();
        assert_eq!(found.id, poll.id);
        assert!(get_by_message_id(db.pool(), "no-such-message").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_votes() {
        let db = Db::connect_in_memory().await;
        let poll = create(db.pool(), sample_new_poll()).await.unwrap();
        crate::db::votes::insert(db.pool(), poll.id, "voter", 0).await.unwrap();

        delete_cascade(db.pool(), poll.id).await.unwrap();
        assert!(get(db.pool(), poll.id).await.unwrap().is_none());
        assert!(crate::db::votes::for_poll(db.pool(), poll.id).await.unwrap().is_empty());
    }
}
