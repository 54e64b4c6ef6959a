//! End-to-end lifecycle scenarios exercised against an in-memory
//! SQLite database and a fake chat adapter — no gateway connection,
//! no real HTTP server. Each test drives the same services `app.rs`
//! wires together, just without the `Service` wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use polly_core::archive::ArchiveGenerator;
use polly_core::cache::{InMemoryCache, SharedCache};
use polly_core::chat::fake::FakeAdapter;
use polly_core::db::models::{PollStatus, RolePing};
use polly_core::db::polls::{create, get, NewPoll};
use polly_core::db::{votes, Db};
use polly_core::error::PollyError;
use polly_core::notifier::ErrorNotifier;
use polly_core::poll::state_machine::OpenReason;
use polly_core::recovery::{RecoveryDelays, RecoveryOrchestrator};
use polly_core::safeguard::Safeguard;
use polly_core::scheduler::{close_job_id, open_job_id, JobRunner, Scheduler};
use polly_core::services::closing::{self, CloseReason, ClosingContext};
use polly_core::services::opening::{self, OpeningContext};
use polly_core::services::reopening::{self, ReopeningContext};
use polly_core::vote_engine::{self, VoteAction};

struct NoopRunner;
#[async_trait]
impl JobRunner for NoopRunner {
    async fn run_open(&self, _poll_id: i64) {}
    async fn run_close(&self, _poll_id: i64) {}
}

fn scheduler() -> Arc<Scheduler> {
    Arc::new(Scheduler::new(Arc::new(NoopRunner)))
}

fn cache() -> SharedCache {
    Arc::new(InMemoryCache::new())
}

fn notifier(chat: Arc<dyn polly_core::chat::ChatAdapter>) -> Arc<ErrorNotifier> {
    Arc::new(ErrorNotifier::new(chat, "owner".into()))
}

fn archive(dir: &std::path::Path) -> Arc<ArchiveGenerator> {
    Arc::new(ArchiveGenerator::new(dir.to_path_buf()).unwrap())
}

async fn new_poll(db: &Db, open_time: chrono::DateTime<Utc>, close_time: chrono::DateTime<Utc>) -> i64 {
    new_poll_with(db, open_time, close_time, false, None).await
}

async fn new_poll_with(
    db: &Db,
    open_time: chrono::DateTime<Utc>,
    close_time: chrono::DateTime<Utc>,
    multiple_choice: bool,
    max_choices: Option<i64>,
) -> i64 {
    let poll = create(
        db.pool(),
        NewPoll {
            name: "T1".into(),
            question: "Q?".into(),
            options: vec!["A".into(), "B".into(), "C".into()],
            emojis: vec!["\u{1F1E6}".into(), "\u{1F1E7}".into(), "\u{1F1E8}".into()],
            image_path: None,
            image_caption: None,
            server_id: "g1".into(),
            server_name: None,
            channel_id: "c1".into(),
            channel_name: None,
            creator_id: "creator".into(),
            open_time,
            close_time,
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
    poll.id
}

/// Scenario 1: create, open, vote, close.
#[tokio::test]
async fn create_open_vote_close() {
    let now = Utc::now();
    let db = Db::connect_in_memory().await;
    let poll_id = new_poll(&db, now - Duration::seconds(1), now + Duration::minutes(3)).await;

    let chat = Arc::new(FakeAdapter::new());
    let sched = scheduler();
    let c = cache();
    let notif = notifier(chat.clone());
    let tmp = tempfile::tempdir().unwrap();
    let arc = archive(tmp.path());

    let open_outcome = opening::open(
        &OpeningContext { pool: db.pool(), chat: chat.as_ref(), scheduler: &sched, cache: &c, notifier: &notif },
        poll_id,
        OpenReason::Scheduled,
    )
    .await
    .unwrap();
    let message_id = open_outcome.message_id.clone().unwrap();
    assert_eq!(chat.reaction_count(&message_id), 0);
    assert!(sched.is_scheduled(&close_job_id(poll_id)).await);

    let outcome = vote_engine::collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap();
    assert_eq!(outcome.action, VoteAction::Added);
    let votes_for_u1 = votes::for_poll_and_user(db.pool(), poll_id, "u1").await.unwrap();
    assert_eq!(votes_for_u1.len(), 1);
    assert_eq!(votes_for_u1[0].option_index, 0);

    let close_outcome = closing::close(
        &ClosingContext { pool: db.pool(), chat: chat.as_ref(), cache: &c, notifier: &notif, archive: &arc },
        poll_id,
        CloseReason::Scheduled,
    )
    .await
    .unwrap();
    assert!(!close_outcome.already_closed);

    let poll = get(db.pool(), poll_id).await.unwrap().unwrap();
    assert_eq!(poll.status, PollStatus::Closed);
    assert_eq!(chat.reaction_count(&message_id), 0);

    let archive_path = close_outcome.archive_path.unwrap();
    let archive_html = tokio::fs::read_to_string(archive_path).await.unwrap();
    assert!(archive_html.contains("A"));
    assert!(archive_html.contains("100"));
}

/// Scenario 2: reopen with extension.
#[tokio::test]
async fn reopen_with_extension() {
    let now = Utc::now();
    let db = Db::connect_in_memory().await;
    let poll_id = new_poll(&db, now - Duration::minutes(5), now - Duration::seconds(1)).await;

    let chat = Arc::new(FakeAdapter::new());
    let sched = scheduler();
    let c = cache();
    let notif = notifier(chat.clone());
    let tmp = tempfile::tempdir().unwrap();
    let arc = archive(tmp.path());

    opening::open(
        &OpeningContext { pool: db.pool(), chat: chat.as_ref(), scheduler: &sched, cache: &c, notifier: &notif },
        poll_id,
        OpenReason::Scheduled,
    )
    .await
    .unwrap();
    let before = get(db.pool(), poll_id).await.unwrap().unwrap();
    let message_id = before.message_id.clone().unwrap();

    closing::close(
        &ClosingContext { pool: db.pool(), chat: chat.as_ref(), cache: &c, notifier: &notif, archive: &arc },
        poll_id,
        CloseReason::Scheduled,
    )
    .await
    .unwrap();

    let new_close_time = now + Duration::minutes(10);
    let outcome = reopening::reopen(
        &ReopeningContext { pool: db.pool(), chat: chat.as_ref(), scheduler: &sched, cache: &c },
        poll_id,
        new_close_time,
    )
    .await
    .unwrap();
    assert_eq!(outcome.new_close_time, new_close_time);

    let reopened = get(db.pool(), poll_id).await.unwrap().unwrap();
    assert_eq!(reopened.status, PollStatus::Active);
    assert_eq!(reopened.message_id.as_deref(), Some(message_id.as_str()));
    assert!(sched.is_scheduled(&close_job_id(poll_id)).await);
}

/// Scenario 3: vote toggle on single-choice leaves zero votes.
#[tokio::test]
async fn vote_toggle_round_trips_to_zero() {
    let now = Utc::now();
    let db = Db::connect_in_memory().await;
    let poll_id = new_poll(&db, now - Duration::seconds(1), now + Duration::minutes(3)).await;

    let first = vote_engine::collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap();
    assert_eq!(first.action, VoteAction::Added);

    let second = vote_engine::collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap();
    assert_eq!(second.action, VoteAction::Removed);

    let remaining = votes::for_poll_and_user(db.pool(), poll_id, "u1").await.unwrap();
    assert!(remaining.is_empty());
}

/// Scenario 4: max-choices enforcement on a multi-choice poll.
#[tokio::test]
async fn max_choices_enforcement() {
    let now = Utc::now();
    let db = Db::connect_in_memory().await;
    let poll_id = new_poll_with(&db, now - Duration::seconds(1), now + Duration::minutes(3), true, Some(2)).await;

    let first = vote_engine::collect_vote(db.pool(), poll_id, "u1", 0).await.unwrap();
    assert_eq!(first.action, VoteAction::Added);
    let second = vote_engine::collect_vote(db.pool(), poll_id, "u1", 1).await.unwrap();
    assert_eq!(second.action, VoteAction::Added);

    let third = vote_engine::collect_vote(db.pool(), poll_id, "u1", 2).await;
    assert!(matches!(third, Err(PollyError::MaxChoicesReached)));

    let votes_for_u1 = votes::for_poll_and_user(db.pool(), poll_id, "u1").await.unwrap();
    assert_eq!(votes_for_u1.len(), 2);
}

/// Scenario 5: the safeguard reconciles a reaction that bypassed the
/// event handler entirely.
#[tokio::test]
async fn safeguard_closes_the_gap() {
    let now = Utc::now();
    let db = Db::connect_in_memory().await;
    let poll_id = new_poll(&db, now - Duration::seconds(1), now + Duration::minutes(3)).await;

    let chat = Arc::new(FakeAdapter::new());
    let sched = scheduler();
    let c = cache();
    let notif = notifier(chat.clone());

    let open_outcome = opening::open(
        &OpeningContext { pool: db.pool(), chat: chat.as_ref(), scheduler: &sched, cache: &c, notifier: &notif },
        poll_id,
        OpenReason::Scheduled,
    )
    .await
    .unwrap();
    let message_id = open_outcome.message_id.unwrap();

    chat.seed_reaction(&message_id, "\u{1F1E6}", "u2");

    let safeguard = Safeguard::new(db.pool().clone(), chat.clone(), notif.clone(), 1);
    let shutdown = tokio_util::sync::CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    let handle = tokio::spawn(async move { safeguard.run(shutdown_clone).await });

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    shutdown.cancel();
    handle.await.unwrap();

    let recorded = votes::for_poll_and_user(db.pool(), poll_id, "u2").await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].option_index, 0);
    assert_eq!(chat.reaction_count(&message_id), 0);
}

/// Scenario 6: startup recovery after downtime reconciles three polls
/// left in different states.
#[tokio::test]
async fn recovery_after_downtime() {
    let now = Utc::now();
    let db = Db::connect_in_memory().await;

    let overdue_scheduled = new_poll(&db, now - Duration::hours(2), now - Duration::hours(1)).await;
    let overdue_active_id = new_poll(&db, now - Duration::hours(3), now - Duration::hours(1)).await;
    let still_active_id = new_poll(&db, now - Duration::hours(3), now + Duration::hours(1)).await;

    let chat = Arc::new(FakeAdapter::new());
    let sched = scheduler();
    let c = cache();
    let notif = notifier(chat.clone());
    let tmp = tempfile::tempdir().unwrap();
    let arc = archive(tmp.path());

    for id in [overdue_active_id, still_active_id] {
        opening::open(
            &OpeningContext { pool: db.pool(), chat: chat.as_ref(), scheduler: &sched, cache: &c, notifier: &notif },
            id,
            OpenReason::Scheduled,
        )
        .await
        .unwrap();
    }

    let orchestrator = RecoveryOrchestrator::new(
        db.pool().clone(),
        chat.clone(),
        sched.clone(),
        c.clone(),
        notif.clone(),
        arc.clone(),
        RecoveryDelays::zero(),
    );
    let report = orchestrator.run().await;

    assert_eq!(report.scheduled_opened, 1);
    // Both the pre-existing overdue active poll and the one recovery
    // just opened (also overdue on close_time) get closed in the same
    // pass, since sweep_active re-reads the database after sweep_scheduled.
    assert_eq!(report.active_closed, 2);
    assert_eq!(report.active_rescheduled, 1);

    let scheduled_poll = get(db.pool(), overdue_scheduled).await.unwrap().unwrap();
    assert_eq!(scheduled_poll.status, PollStatus::Closed);

    let active_poll = get(db.pool(), overdue_active_id).await.unwrap().unwrap();
    assert_eq!(active_poll.status, PollStatus::Closed);

    let still_active = get(db.pool(), still_active_id).await.unwrap().unwrap();
    assert_eq!(still_active.status, PollStatus::Active);
    assert!(sched.is_scheduled(&close_job_id(still_active_id)).await);
    assert!(!sched.is_scheduled(&open_job_id(overdue_scheduled)).await);

    let second_pass = RecoveryOrchestrator::new(
        db.pool().clone(),
        chat.clone(),
        sched.clone(),
        c.clone(),
        notif.clone(),
        arc,
        RecoveryDelays::zero(),
    );
    let convergence = second_pass.run().await;
    assert_eq!(convergence.scheduled_opened, 0);
    assert_eq!(convergence.active_closed, 0);
}
