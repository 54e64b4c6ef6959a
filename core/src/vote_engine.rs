//! Vote engine (C9): bulletproof (idempotent, transactional,
//! concurrency-safe) vote collection. This is the *sole* writer to
//! `votes` rows — reaction events, the safeguard sweep, and admin
//! tools all funnel through `collect_vote`, so the table is always a
//! faithful record of what `collect_vote` decided.

use sqlx::SqlitePool;
use tracing::warn;

use crate::db::models::PollStatus;
use crate::db::{polls, votes};
use crate::error::{PollyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteAction {
    Added,
    Changed,
    Removed,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoredReason {
    PollInactive,
}

#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub action: VoteAction,
    pub ignored_reason: Option<IgnoredReason>,
}

impl VoteOutcome {
    fn ok(action: VoteAction) -> Self {
        Self { action, ignored_reason: None }
    }

    fn ignored(reason: IgnoredReason) -> Self {
        Self { action: VoteAction::Ignored, ignored_reason: Some(reason) }
    }
}

const MAX_RETRIES: u32 = 2;

/// Record a single (poll, user, option_index) selection: toggles an
/// existing identical vote off, replaces a different single-choice
/// vote, or adds another selection when multiple choice is allowed.
/// Retries once on a serialization conflict before surfacing
/// `ConcurrentWrite`.
pub async fn collect_vote(pool: &SqlitePool, poll_id: i64, user_id: &str, option_index: i64) -> Result<VoteOutcome> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_collect_vote(pool, poll_id, user_id, option_index).await {
            Ok(outcome) => return Ok(outcome),
            Err(PollyError::ConcurrentWrite) if attempt <= MAX_RETRIES => {
                warn!(poll_id, user_id, "vote write conflict, retrying");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn try_collect_vote(pool: &SqlitePool, poll_id: i64, user_id: &str, option_index: i64) -> Result<VoteOutcome> {
    let mut tx = pool.begin().await?;

    let poll = polls::get_locking(&mut *tx, poll_id).await?.ok_or(PollyError::PollNotFound(poll_id))?;

    if poll.status != PollStatus::Active {
        tx.rollback().await?;
        return Ok(VoteOutcome::ignored(IgnoredReason::PollInactive));
    }

    if option_index < 0 || option_index as usize >= poll.options.len() {
        tx.rollback().await?;
        return Err(PollyError::validation(format!(
            "option_index {option_index} out of range for {} options",
            poll.options.len()
        )));
    }

    let existing = votes::for_poll_and_user(&mut *tx, poll_id, user_id).await?;

    let outcome = if poll.multiple_choice {
        decide_multiple_choice(&mut tx, poll_id, user_id, option_index, &existing, poll.effective_max_choices()).await?
    } else {
        decide_single_choice(&mut tx, poll_id, user_id, option_index, &existing).await?
    };

    match &outcome {
        Err(_) => {
            tx.rollback().await?;
        }
        Ok(_) => {
            tx.commit().await?;
        }
    }

    outcome
}

async fn decide_single_choice(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    poll_id: i64,
    user_id: &str,
    option_index: i64,
    existing: &[crate::db::models::Vote],
) -> Result<VoteOutcome> {
    match existing.first() {
        None => {
            votes::insert_tx(&mut **tx, poll_id, user_id, option_index).await?;
            Ok(VoteOutcome::ok(VoteAction::Added))
        }
        Some(vote) if vote.option_index == option_index => {
            votes::delete(&mut **tx, vote.id).await?;
            Ok(VoteOutcome::ok(VoteAction::Removed))
        }
        Some(vote) => {
            votes::update_option(&mut **tx, vote.id, option_index, chrono::Utc::now()).await?;
            Ok(VoteOutcome::ok(VoteAction::Changed))
        }
    }
}

async fn decide_multiple_choice(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    poll_id: i64,
    user_id: &str,
    option_index: i64,
    existing: &[crate::db::models::Vote],
    max_choices: i64,
) -> Result<VoteOutcome> {
    if let Some(vote) = existing.iter().find(|v| v.option_index == option_index) {
        votes::delete(&mut **tx, vote.id).await?;
        return Ok(VoteOutcome::ok(VoteAction::Removed));
    }

    if existing.len() as i64 >= max_choices {
        return Err(PollyError::MaxChoicesReached);
    }

    votes::insert_tx(&mut **tx, poll_id, user_id, option_index).await?;
    Ok(VoteOutcome::ok(VoteAction::Added))
}

/// Whether the reaction that produced `outcome` should be removed from
/// the chat message: always for an ignored or removed vote, and for an
/// added/changed vote whenever the poll is anonymous or single-choice
/// (so the chat message itself never reveals or accumulates a ballot).
pub fn should_remove_reaction(outcome: &VoteOutcome, anonymous: bool, multiple_choice: bool) -> bool {
    match outcome.action {
        VoteAction::Ignored => true,
        VoteAction::Removed => true,
        VoteAction::Added | VoteAction::Changed => anonymous || !multiple_choice,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RolePing;
    use crate::db::polls::{create, NewPoll};
    use crate::db::Db;
    use chrono::{Duration, Utc};

    async fn active_poll(db: &Db, multiple_choice: bool, max_choices: Option<i64>, n_options: usize) -> i64 {
        let now = Utc::now();
        let options: Vec<String> = (0..n_options).map(|i| format!("opt{i}")).collect();
        let emojis: Vec<String> = (0..n_options).map(|i| format!("e{i}")).collect();
        let poll = create(
            db.pool(),
            NewPoll {
                name: "T".into(),
                question: "Q?".into(),
                options,
                emojis,
                image_path: None,
                image_caption: None,
                server_id: "g".into(),
                server_name: None,
                channel_id: "c".into(),
                channel_name: None,
                creator_id: "creator".into(),
                open_time: now - Duration::minutes(1),
                close_time: now + Duration::hours(1),
                timezone: "UTC".into(),
                anonymous: false,
                multiple_choice,
                max_choices,
                open_immediately: false,
                role_ping: RolePing::default(),
            },
        )
        .await
        .unwrap();
        polls::mark_active(db.pool(), poll.id, "msg-1", None).await.unwrap();
        poll.id
    }

    #[tokio::test]
    async fn single_choice_toggle_round_trip_leaves_zero_votes() {
        let db = Db::connect_in_memory().await;
        let poll_id = active_poll(&db, false, Some(1), 2).await;

        let first = collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap();
        assert_eq!(first.action, VoteAction::Added);

        let second = collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap();
        assert_eq!(second.action, VoteAction::Removed);

        assert!(votes::for_poll(db.pool(), poll_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_choice_change_leaves_one_vote_on_new_option() {
        let db = Db::connect_in_memory().await;
        let poll_id = active_poll(&db, false, Some(1), 2).await;

        collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap();
        let changed = collect_vote(db.pool(), poll_id, "u1", 1).await.unwrap();
        assert_eq!(changed.action, VoteAction::Changed);

        let remaining = votes::for_poll(db.pool(), poll_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].option_index, 1);
    }

    #[tokio::test]
    async fn multiple_choice_enforces_max_choices() {
        let db = Db::connect_in_memory().await;
        let poll_id = active_poll(&db, true, Some(2), 3).await;

        assert_eq!(collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap().action, VoteAction::Added);
        assert_eq!(collect_vote(db.pool(), poll_id, "u1", 1).await.unwrap().action, VoteAction::Added);

        let third = collect_vote(db.pool(), poll_id, "u1", 2).await;
        assert!(matches!(third, Err(PollyError::MaxChoicesReached)));
    }

    #[tokio::test]
    async fn multiple_choice_toggles_off_existing_selection() {
        let db = Db::connect_in_memory().await;
        let poll_id = active_poll(&db, true, Some(2), 3).await;

        collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap();
        let toggled_off = collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap();
        assert_eq!(toggled_off.action, VoteAction::Removed);
    }

    #[tokio::test]
    async fn vote_on_inactive_poll_is_ignored() {
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
                creator_id: "creator".into(),
                open_time: now + Duration::minutes(1),
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

        let outcome = collect_vote(db.pool(), poll.id, "u1", 0).await.unwrap();
        assert_eq!(outcome.action, VoteAction::Ignored);
        assert_eq!(outcome.ignored_reason, Some(IgnoredReason::PollInactive));
    }

    #[tokio::test]
    async fn out_of_range_option_is_rejected() {
        let db = Db::connect_in_memory().await;
        let poll_id = active_poll(&db, false, Some(1), 2).await;
        let result = collect_vote(db.pool(), poll_id, "u1", 5).await;
        assert!(result.is_err());
    }

    #[test]
    fn reaction_removal_decision_covers_all_outcomes() {
        let added = VoteOutcome::ok(VoteAction::Added);
        assert!(should_remove_reaction(&added, true, true));
        assert!(should_remove_reaction(&added, false, false));
        assert!(!should_remove_reaction(&added, false, true));

        let removed = VoteOutcome::ok(VoteAction::Removed);
        assert!(should_remove_reaction(&removed, false, true));
    }
}
