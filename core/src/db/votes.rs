//! Vote repository (C2/C9). Every write here is called from inside the
//! vote engine's transaction — functions are generic over `Executor` so
//! they can run standalone (tests, recovery) or as part of a larger
//! transaction (the atomic read-decide-write in `vote_engine.rs`).

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool};

use crate::db::models::Vote;
use crate::error::Result;

fn row_to_vote(row: &sqlx::sqlite::SqliteRow) -> Result<Vote> {
    Ok(Vote {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        user_id: row.try_get("user_id")?,
        option_index: row.try_get("option_index")?,
        voted_at: row.try_get("voted_at")?,
        changed_at: row.try_get("changed_at")?,
    })
}

const SELECT_VOTE: &str =
    "SELECT id, poll_id, user_id, option_index, voted_at, changed_at FROM votes";

pub async fn for_poll(pool: &SqlitePool, poll_id: i64) -> Result<Vec<Vote>> {
    let rows = sqlx::query(&format!("{SELECT_VOTE} WHERE poll_id = ? ORDER BY id"))
        .bind(poll_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_vote).collect()
}

pub async fn for_poll_and_user<'e, E>(executor: E, poll_id: i64, user_id: &str) -> Result<Vec<Vote>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(&format!("{SELECT_VOTE} WHERE poll_id = ? AND user_id = ? ORDER BY id"))
        .bind(poll_id)
        .bind(user_id)
        .fetch_all(executor)
        .await?;
    rows.iter().map(row_to_vote).collect()
}

pub async fn insert(pool: &SqlitePool, poll_id: i64, user_id: &str, option_index: i64) -> Result<Vote> {
    insert_tx(pool, poll_id, user_id, option_index).await
}

pub async fn insert_tx<'e, E>(executor: E, poll_id: i64, user_id: &str, option_index: i64) -> Result<Vote>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "INSERT INTO votes (poll_id, user_id, option_index) VALUES (?, ?, ?) \
         RETURNING id, poll_id, user_id, option_index, voted_at, changed_at",
    )
    .bind(poll_id)
    .bind(user_id)
    .bind(option_index)
    .fetch_one(executor)
    .await?;
    row_to_vote(&row)
}

/// Used by single-choice "change vote" — moves the existing ballot to a
/// new option and stamps `changed_at`.
pub async fn update_option<'e, E>(
    executor: E,
    vote_id: i64,
    option_index: i64,
    changed_at: DateTime<Utc>,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE votes SET option_index = ?, changed_at = ? WHERE id = ?")
        .bind(option_index)
        .bind(changed_at)
        .bind(vote_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn delete<'e, E>(executor: E, vote_id: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM votes WHERE id = ?")
        .bind(vote_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn count_by_option(pool: &SqlitePool, poll_id: i64) -> Result<Vec<(i64, i64)>> {
    let rows = sqlx::query(
        "SELECT option_index, COUNT(*) as n FROM votes WHERE poll_id = ? GROUP BY option_index",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| Ok((r.try_get("option_index")?, r.try_get("n")?)))
        .collect()
}
