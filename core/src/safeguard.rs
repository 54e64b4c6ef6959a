//! Reaction safeguard (C10): closes the gap when reaction-add events
//! are missed during disconnections, rate limits, or process downtime.
//! The chat message's reaction state is authoritative input; the
//! database is authoritative output; this loop reconciles the two for
//! every `active` poll on a fixed cadence.
//!
//! `FailureTracker` lives entirely inside this loop's single task, so
//! it needs no lock — it's mutated only from the safeguard's own task.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chat::{ChatAdapter, ChatEmbed};
use crate::db::models::PollStatus;
use crate::db::{polls, votes};
use crate::error::Result;
use crate::notifier::ErrorNotifier;
use crate::render::render_poll_embed;
use crate::vote_engine::{self, IgnoredReason, VoteAction};

const MAX_FETCH_RETRIES: u32 = 5;
const RETRY_WINDOW_MINUTES: i64 = 30;
const HISTORY_SCAN_ATTEMPT: u32 = 2;
const SLEEP_RETRY_ATTEMPT: u32 = 3;

struct FailureRecord {
    consecutive_failures: u32,
    first_observed: DateTime<Utc>,
}

pub struct Safeguard {
    pool: SqlitePool,
    chat: Arc<dyn ChatAdapter>,
    notifier: Arc<ErrorNotifier>,
    tick: tokio::time::Duration,
    trackers: HashMap<i64, FailureRecord>,
}

impl Safeguard {
    pub fn new(pool: SqlitePool, chat: Arc<dyn ChatAdapter>, notifier: Arc<ErrorNotifier>, tick_secs: u64) -> Self {
        Self { pool, chat, notifier, tick: tokio::time::Duration::from_secs(tick_secs), trackers: HashMap::new() }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("safeguard loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("safeguard loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    async fn sweep(&mut self) {
        let active = match polls::list_by_status(&self.pool, PollStatus::Active).await {
            Ok(polls) => polls,
            Err(e) => {
                warn!(error = %e, "safeguard failed to list active polls");
                self.notifier.notify("safeguard", &e).await;
                return;
            }
        };

        for poll in active {
            self.reconcile_one(&poll).await;
        }
    }

    async fn reconcile_one(&mut self, poll: &crate::db::models::Poll) {
        let Some(message_id) = &poll.message_id else { return };

        if !self.confirm_message_exists(poll.id, &poll.channel_id, message_id).await {
            return;
        }

        for (index, emoji) in poll.emojis.iter().enumerate() {
            let reactors = match self.chat.iter_reaction_users(&poll.channel_id, message_id, emoji).await {
                Ok(users) => users,
                Err(e) => {
                    warn!(poll_id = poll.id, emoji, error = %e, "failed to list reaction users");
                    continue;
                }
            };

            for user in reactors.into_iter().filter(|u| !u.is_bot) {
                self.reconcile_reaction(poll, message_id, index as i64, emoji, &user.id).await;
            }
        }
    }

    /// Returns `true` if the message exists (or was just confirmed via
    /// history scan) and reconciliation should continue this tick.
    async fn confirm_message_exists(&mut self, poll_id: i64, channel_id: &str, message_id: &str) -> bool {
        match self.chat.fetch_message(channel_id, message_id).await {
            Ok(Some(_)) => {
                self.trackers.remove(&poll_id);
                true
            }
            Ok(None) | Err(_) => self.handle_missing_message(poll_id, channel_id, message_id).await,
        }
    }

    async fn handle_missing_message(&mut self, poll_id: i64, channel_id: &str, message_id: &str) -> bool {
        let now = Utc::now();
        let record = self.trackers.entry(poll_id).or_insert_with(|| FailureRecord {
            consecutive_failures: 0,
            first_observed: now,
        });

        if now - record.first_observed > chrono::Duration::minutes(RETRY_WINDOW_MINUTES) {
            record.consecutive_failures = 0;
            record.first_observed = now;
        }
        record.consecutive_failures += 1;
        let attempt = record.consecutive_failures;

        if attempt == HISTORY_SCAN_ATTEMPT {
            // Best-effort: a single re-fetch stands in for a full history
            // scan, since the adapter trait doesn't expose channel history.
            if let Ok(Some(_)) = self.chat.fetch_message(channel_id, message_id).await {
                self.trackers.remove(&poll_id);
                return true;
            }
        }

        if attempt == SLEEP_RETRY_ATTEMPT {
            tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            if let Ok(Some(_)) = self.chat.fetch_message(channel_id, message_id).await {
                self.trackers.remove(&poll_id);
                return true;
            }
        }

        if attempt >= MAX_FETCH_RETRIES {
            warn!(poll_id, "message unrecoverable after {attempt} failures, deleting poll");
            if let Err(e) = polls::delete_cascade(&self.pool, poll_id).await {
                warn!(poll_id, error = %e, "failed to delete unrecoverable poll");
            }
            self.trackers.remove(&poll_id);
        }

        false
    }

    async fn reconcile_reaction(
        &self,
        poll: &crate::db::models::Poll,
        message_id: &str,
        option_index: i64,
        emoji: &str,
        user_id: &str,
    ) {
        let had_prior_vote = votes::for_poll_and_user(&self.pool, poll.id, user_id)
            .await
            .map(|v| !v.is_empty())
            .unwrap_or(false);

        let outcome = match vote_engine::collect_vote(&self.pool, poll.id, user_id, option_index).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(poll_id = poll.id, user_id, error = %e, "safeguard vote collection failed");
                return;
            }
        };

        if outcome.action == VoteAction::Ignored {
            if outcome.ignored_reason == Some(IgnoredReason::PollInactive) {
                let _ = self.chat.remove_reaction(&poll.channel_id, message_id, emoji, user_id).await;
            }
            return;
        }

        if vote_engine::should_remove_reaction(&outcome, poll.anonymous, poll.multiple_choice) {
            let _ = self.chat.remove_reaction(&poll.channel_id, message_id, emoji, user_id).await;
        }

        if had_prior_vote {
            let embed = ChatEmbed {
                title: "Vote recorded".into(),
                description: format!("Your reaction on **{}** was reconciled by the safeguard.", poll.name),
                ..Default::default()
            };
            let _ = self.chat.send_dm(user_id, &embed).await;
        }

        if let Ok(counts) = votes::count_by_option(&self.pool, poll.id).await {
            let embed = render_poll_embed(poll, &counts, Utc::now());
            let _ = self.chat.edit_message(&poll.channel_id, message_id, &embed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::fake::FakeAdapter;
    use crate::db::models::RolePing;
    use crate::db::polls::{create, NewPoll};
    use crate::db::Db;
    use chrono::Duration;

    async fn active_poll_with_message(db: &Db, chat: &FakeAdapter) -> (i64, String) {
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
                open_time: now - Duration::minutes(5),
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
        let message_id = chat.post_message("c1", &ChatEmbed::default(), None).await.unwrap();
        polls::mark_active(db.pool(), poll.id, &message_id, None).await.unwrap();
        (poll.id, message_id)
    }

    #[tokio::test]
    async fn missed_reaction_is_collected_and_removed() {
        let db = Db::connect_in_memory().await;
        let chat = Arc::new(FakeAdapter::new());
        let (poll_id, message_id) = active_poll_with_message(&db, &chat).await;
        chat.seed_reaction(&message_id, "\u{1F1E6}", "voter-1");

        let notifier = Arc::new(ErrorNotifier::new(chat.clone(), "owner".into()));
        let mut safeguard = Safeguard::new(db.pool().clone(), chat.clone(), notifier, 5);
        safeguard.sweep().await;

        let recorded = votes::for_poll(db.pool(), poll_id).await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(chat.reaction_count(&message_id), 0);
    }

    #[tokio::test]
    async fn missing_message_is_deleted_after_max_retries() {
        let db = Db::connect_in_memory().await;
        let chat = Arc::new(FakeAdapter::new());
        let (poll_id, message_id) = active_poll_with_message(&db, &chat).await;
        chat.delete_message(&message_id);

        let notifier = Arc::new(ErrorNotifier::new(chat.clone(), "owner".into()));
        let mut safeguard = Safeguard::new(db.pool().clone(), chat.clone(), notifier, 5);

        for _ in 0..MAX_FETCH_RETRIES {
            safeguard.sweep().await;
        }

        assert!(polls::get(db.pool(), poll_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn existing_message_clears_tracker() {
        let db = Db::connect_in_memory().await;
        let chat = Arc::new(FakeAdapter::new());
        let (poll_id, _message_id) = active_poll_with_message(&db, &chat).await;

        let notifier = Arc::new(ErrorNotifier::new(chat.clone(), "owner".into()));
        let mut safeguard = Safeguard::new(db.pool().clone(), chat.clone(), notifier, 5);
        safeguard.sweep().await;

        assert!(!safeguard.trackers.contains_key(&poll_id));
    }
}
