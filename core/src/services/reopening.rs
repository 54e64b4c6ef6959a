//! Reopening service (C8): moves a closed poll back to `active` with
//! an extended `close_time`, editing its existing message rather than
//! posting a new one — a reopened poll keeps its history, it doesn't
//! start over. Requires the poll to still carry a `message_id`; a
//! poll deleted from chat before reopening fails with `DataIntegrity`
//! and must be recreated instead.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::cache::{keys, SharedCache};
use crate::chat::ChatAdapter;
use crate::db::polls;
use crate::db::votes;
use crate::error::{PollyError, Result};
use crate::poll::state_machine::guard_reopen;
use crate::render::render_poll_embed;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub struct ReopenOutcome {
    pub new_close_time: chrono::DateTime<chrono::Utc>,
}

pub struct ReopeningContext<'a> {
    pub pool: &'a SqlitePool,
    pub chat: &'a dyn ChatAdapter,
    pub scheduler: &'a Scheduler,
    pub cache: &'a SharedCache,
}

pub async fn reopen(
    ctx: &ReopeningContext<'_>,
    poll_id: i64,
    new_close_time: chrono::DateTime<chrono::Utc>,
) -> Result<ReopenOutcome> {
    let poll = polls::get(ctx.pool, poll_id).await?.ok_or(PollyError::PollNotFound(poll_id))?;
    guard_reopen(poll.status, poll.message_id.as_deref())?;

    if new_close_time <= chrono::Utc::now() {
        return Err(PollyError::validation("reopen close_time must be in the future"));
    }

    polls::reopen(ctx.pool, poll_id, new_close_time).await?;
    info!(poll_id, %new_close_time, "poll reopened");

    let mut reopened = poll.clone();
    reopened.status = crate::db::models::PollStatus::Active;
    reopened.close_time = new_close_time;

    let all_votes = votes::for_poll(ctx.pool, poll_id).await?;
    let counts = counts_by_option(&all_votes);
    let embed = render_poll_embed(&reopened, &counts, chrono::Utc::now());

    let message_id = poll.message_id.as_ref().expect("guard_reopen checked message_id is present");
    if let Err(e) = ctx.chat.edit_message(&poll.channel_id, message_id, &embed).await {
        warn!(poll_id, error = %e, "failed to edit message after reopen, recovery will repair it");
    }

    ctx.scheduler.schedule_close(poll_id, new_close_time).await;
    ctx.cache.delete(&keys::poll_render_inputs(poll_id)).await;

    Ok(ReopenOutcome { new_close_time })
}

fn counts_by_option(all_votes: &[crate::db::models::Vote]) -> Vec<(i64, i64)> {
    let mut by_option = std::collections::HashMap::new();
    for v in all_votes {
        *by_option.entry(v.option_index).or_insert(0i64) += 1;
    }
    by_option.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::chat::fake::FakeAdapter;
    use crate::chat::ChatEmbed;
    use crate::db::models::RolePing;
    use crate::db::polls::{create, NewPoll};
    use crate::db::Db;
    use crate::scheduler::{close_job_id, JobRunner};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    struct NoopRunner;
    #[async_trait]
    impl JobRunner for NoopRunner {
        async fn run_open(&self, _poll_id: i64) {}
        async fn run_close(&self, _poll_id: i64) {}
    }

    async fn closed_poll_fixture(db: &Db, chat: &FakeAdapter) -> i64 {
        let now = Utc::now();
        let poll = create(
            db.pool(),
            NewPoll {
                name: "T1".into(),
                question: "Q?".into(),
                options: vec!["A".into(), "B".into()],
                emojis: vec!["\u{1F1E6}".into(), "\u{1F1E7}".into()],
                image_path: None,
                image_caption: None,
                server_id: "g".into(),
                server_name: None,
                channel_id: "c1".into(),
                channel_name: None,
                creator_id: "creator".into(),
                open_time: now - Duration::hours(1),
                close_time: now - Duration::minutes(1),
                timezone: "UTC".into(),
                anonymous: false,
                multiple_choice: false,
                max_choices: Some(1),
                open_immediately: false,
                role_ping: RolePing::default(),
            },
        )
        .await
        .unwrap();
        let message_id = chat.post_message("c1", &ChatEmbed::default(), None).await.unwrap();
        polls::mark_active(db.pool(), poll.id, &message_id, None).await.unwrap();
        polls::mark_closed(db.pool(), poll.id).await.unwrap();
        poll.id
    }

    #[tokio::test]
    async fn reopen_extends_close_time_and_reschedules() {
        let db = Db::connect_in_memory().await;
        let chat = FakeAdapter::new();
        let poll_id = closed_poll_fixture(&db, &chat).await;

        let scheduler = Scheduler::new(Arc::new(NoopRunner));
        let cache: SharedCache = Arc::new(InMemoryCache::new());
        let ctx = ReopeningContext { pool: db.pool(), chat: &chat, scheduler: &scheduler, cache: &cache };

        let new_close = Utc::now() + Duration::hours(1);
        let outcome = reopen(&ctx, poll_id, new_close).await.unwrap();
        assert_eq!(outcome.new_close_time, new_close);

        let poll = polls::get(db.pool(), poll_id).await.unwrap().unwrap();
        assert_eq!(poll.status, crate::db::models::PollStatus::Active);
        assert!(scheduler.is_scheduled(&close_job_id(poll_id)).await);
    }

    #[tokio::test]
    async fn reopen_rejects_close_time_in_the_past() {
        let db = Db::connect_in_memory().await;
        let chat = FakeAdapter::new();
        let poll_id = closed_poll_fixture(&db, &chat).await;

        let scheduler = Scheduler::new(Arc::new(NoopRunner));
        let cache: SharedCache = Arc::new(InMemoryCache::new());
        let ctx = ReopeningContext { pool: db.pool(), chat: &chat, scheduler: &scheduler, cache: &cache };

        let result = reopen(&ctx, poll_id, Utc::now() - Duration::minutes(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reopen_rejects_an_active_poll() {
        let db = Db::connect_in_memory().await;
        let now = Utc::now();
        let poll = create(
            db.pool(),
            NewPoll {
                name: "T".into(),
                question: "Q?".into(),
                options: vec!["A".into(), "B".into()],
                emojis: vec!["e0".into(), "e1".into()],
                image_path: None,
                image_caption: None,
                server_id: "g".into(),
                server_name: None,
                channel_id: "c".into(),
                channel_name: None,
                creator_id: "u".into(),
                open_time: now - Duration::minutes(1),
                close_time: now + Duration::hours(1),
                timezone: "UTC".into(),
                anonymous: false,
                multiple_choice: false,
                max_choices: Some(1),
                open_immediately: false,
                role_ping: RolePing::default(),
            },
        )
        .await
        .unwrap();
        polls::mark_active(db.pool(), poll.id, "m1", None).await.unwrap();

        let chat = FakeAdapter::new();
        let scheduler = Scheduler::new(Arc::new(NoopRunner));
        let cache: SharedCache = Arc::new(InMemoryCache::new());
        let ctx = ReopeningContext { pool: db.pool(), chat: &chat, scheduler: &scheduler, cache: &cache };

        let result = reopen(&ctx, poll.id, now + Duration::hours(2)).await;
        assert!(result.is_err());
    }
}
