//! Recovery orchestrator (C11): run once at startup, after the chat
//! adapter reports ready, to reconcile whatever the database and chat
//! platform disagree about after downtime. Delays between API calls
//! are fields (not bare constants) so tests can run the same sweeps
//! near-instantly while production uses a slower, rate-limit-friendly
//! cadence.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::archive::ArchiveGenerator;
use crate::cache::SharedCache;
use crate::chat::ChatAdapter;
use crate::db::models::PollStatus;
use crate::db::{polls, votes};
use crate::notifier::ErrorNotifier;
use crate::render::render_poll_embed;
use crate::scheduler::Scheduler;
use crate::services::closing::{self, CloseReason, ClosingContext};
use crate::services::opening::{self, OpeningContext};
use crate::poll::state_machine::OpenReason;

const REPAIR_BATCH_SIZE: usize = 3;
const REPAIR_SAMPLE_CAP: usize = 15;
const EXISTENCE_AUDIT_CAP: i64 = 15;
const ARCHIVE_BACKFILL_CAP: i64 = 10;

#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub scheduled_opened: usize,
    pub scheduled_rescheduled: usize,
    pub active_closed: usize,
    pub active_rescheduled: usize,
    pub messages_repaired: usize,
    pub existence_audit_deleted: usize,
    pub archives_backfilled: usize,
    pub duration: Duration,
    pub confidence: f64,
}

pub struct RecoveryDelays {
    pub between_batches: Duration,
    pub between_polls: Duration,
    pub between_api_calls: Duration,
    pub rate_limit_backoff: Duration,
}

impl Default for RecoveryDelays {
    fn default() -> Self {
        Self {
            between_batches: Duration::from_secs(5),
            between_polls: Duration::from_millis(1500),
            between_api_calls: Duration::from_millis(800),
            rate_limit_backoff: Duration::from_secs(10),
        }
    }
}

impl RecoveryDelays {
    pub fn zero() -> Self {
        Self {
            between_batches: Duration::ZERO,
            between_polls: Duration::ZERO,
            between_api_calls: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
        }
    }
}

pub struct RecoveryOrchestrator {
    pool: sqlx::SqlitePool,
    chat: Arc<dyn ChatAdapter>,
    scheduler: Arc<Scheduler>,
    cache: SharedCache,
    notifier: Arc<ErrorNotifier>,
    archive: Arc<ArchiveGenerator>,
    delays: RecoveryDelays,
}

impl RecoveryOrchestrator {
    pub fn new(
        pool: sqlx::SqlitePool,
        chat: Arc<dyn ChatAdapter>,
        scheduler: Arc<Scheduler>,
        cache: SharedCache,
        notifier: Arc<ErrorNotifier>,
        archive: Arc<ArchiveGenerator>,
        delays: RecoveryDelays,
    ) -> Self {
        Self { pool, chat, scheduler, cache, notifier, archive, delays }
    }

    pub async fn run(&self) -> RecoveryReport {
        let started = std::time::Instant::now();
        let mut report = RecoveryReport::default();

        self.sweep_scheduled(&mut report).await;
        self.sweep_active(&mut report).await;
        self.sweep_closed_repair(&mut report).await;
        self.audit_message_existence(&mut report).await;
        self.backfill_archives(&mut report).await;

        report.duration = started.elapsed();
        report.confidence = self.confidence_estimate().await;
        info!(
            scheduled_opened = report.scheduled_opened,
            active_closed = report.active_closed,
            repaired = report.messages_repaired,
            deleted = report.existence_audit_deleted,
            backfilled = report.archives_backfilled,
            confidence = report.confidence,
            "recovery pass complete"
        );
        report
    }

    async fn sweep_scheduled(&self, report: &mut RecoveryReport) {
        let scheduled = match polls::list_by_status(&self.pool, PollStatus::Scheduled).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "recovery failed to list scheduled polls");
                return;
            }
        };

        let now = chrono::Utc::now();
        for poll in scheduled {
            if poll.open_time <= now {
                let ctx = OpeningContext {
                    pool: &self.pool,
                    chat: self.chat.as_ref(),
                    scheduler: &self.scheduler,
                    cache: &self.cache,
                    notifier: &self.notifier,
                };
                match opening::open(&ctx, poll.id, OpenReason::Recovery).await {
                    Ok(_) => report.scheduled_opened += 1,
                    Err(e) => warn!(poll_id = poll.id, error = %e, "recovery failed to open overdue poll"),
                }
            } else {
                self.scheduler.schedule_open(poll.id, poll.open_time).await;
                self.scheduler.schedule_close(poll.id, poll.close_time).await;
                report.scheduled_rescheduled += 1;
            }
        }
    }

    async fn sweep_active(&self, report: &mut RecoveryReport) {
        let active = match polls::list_by_status(&self.pool, PollStatus::Active).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "recovery failed to list active polls");
                return;
            }
        };

        let now = chrono::Utc::now();
        for poll in active {
            if poll.close_time <= now {
                let ctx = ClosingContext {
                    pool: &self.pool,
                    chat: self.chat.as_ref(),
                    cache: &self.cache,
                    notifier: &self.notifier,
                    archive: &self.archive,
                };
                match closing::close(&ctx, poll.id, CloseReason::Recovery).await {
                    Ok(_) => report.active_closed += 1,
                    Err(e) => warn!(poll_id = poll.id, error = %e, "recovery failed to close overdue poll"),
                }
            } else {
                self.scheduler.schedule_close(poll.id, poll.close_time).await;
                report.active_rescheduled += 1;
            }
        }
    }

    async fn sweep_closed_repair(&self, report: &mut RecoveryReport) {
        let sample = match polls::list_newest_first(&self.pool, PollStatus::Closed, REPAIR_SAMPLE_CAP as i64).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "recovery failed to list closed polls for repair");
                return;
            }
        };

        for batch in sample.chunks(REPAIR_BATCH_SIZE) {
            for poll in batch {
                let Some(message_id) = &poll.message_id else { continue };

                let all_votes = votes::for_poll(&self.pool, poll.id).await.unwrap_or_default();
                let counts = counts_by_option(&all_votes);
                let embed = render_poll_embed(poll, &counts, chrono::Utc::now());

                match self.chat.edit_message(&poll.channel_id, message_id, &embed).await {
                    Ok(()) => report.messages_repaired += 1,
                    Err(crate::error::PollyError::RateLimit { .. }) => {
                        tokio::time::sleep(self.delays.rate_limit_backoff).await;
                    }
                    Err(e) => warn!(poll_id = poll.id, error = %e, "repair edit failed"),
                }
                tokio::time::sleep(self.delays.between_api_calls).await;

                if let Err(e) = self.chat.clear_reactions(&poll.channel_id, message_id).await {
                    warn!(poll_id = poll.id, error = %e, "repair clear_reactions failed");
                }
                tokio::time::sleep(self.delays.between_polls).await;
            }
            tokio::time::sleep(self.delays.between_batches).await;
        }
    }

    async fn audit_message_existence(&self, report: &mut RecoveryReport) {
        let mut candidates = polls::list_newest_first(&self.pool, PollStatus::Active, EXISTENCE_AUDIT_CAP)
            .await
            .unwrap_or_default();
        candidates.extend(
            polls::list_newest_first(&self.pool, PollStatus::Scheduled, EXISTENCE_AUDIT_CAP)
                .await
                .unwrap_or_default(),
        );
        candidates.truncate(EXISTENCE_AUDIT_CAP as usize);

        for poll in candidates {
            let Some(message_id) = &poll.message_id else { continue };
            match self.chat.fetch_message(&poll.channel_id, message_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(poll_id = poll.id, "message existence audit: message gone, deleting poll");
                    if polls::delete_cascade(&self.pool, poll.id).await.is_ok() {
                        report.existence_audit_deleted += 1;
                    }
                }
                Err(e) => warn!(poll_id = poll.id, error = %e, "existence audit fetch failed"),
            }
            tokio::time::sleep(self.delays.between_api_calls).await;
        }
    }

    async fn backfill_archives(&self, report: &mut RecoveryReport) {
        let closed = polls::list_newest_first(&self.pool, PollStatus::Closed, ARCHIVE_BACKFILL_CAP)
            .await
            .unwrap_or_default();

        for poll in closed {
            if self.archive.exists(poll.id) {
                continue;
            }
            let all_votes = votes::for_poll(&self.pool, poll.id).await.unwrap_or_default();
            match self.archive.generate(&poll, &all_votes).await {
                Ok(_) => report.archives_backfilled += 1,
                Err(e) => warn!(poll_id = poll.id, error = %e, "archive backfill failed"),
            }
        }
    }

    /// Fraction of audited active/scheduled polls whose chat message
    /// was confirmed present this pass — a "DB state matches chat
    /// state" confidence metric for the recovery report.
    async fn confidence_estimate(&self) -> f64 {
        let mut checked = 0u32;
        let mut matched = 0u32;

        for status in [PollStatus::Active, PollStatus::Scheduled] {
            let polls = polls::list_by_status(&self.pool, status).await.unwrap_or_default();
            for poll in polls {
                let Some(message_id) = &poll.message_id else { continue };
                checked += 1;
                if matches!(self.chat.fetch_message(&poll.channel_id, message_id).await, Ok(Some(_))) {
                    matched += 1;
                }
            }
        }

        if checked == 0 {
            1.0
        } else {
            matched as f64 / checked as f64
        }
    }
}

fn counts_by_option(all_votes: &[crate::db::models::Vote]) -> Vec<(i64, i64)> {
    let mut by_option = std::collections::HashMap::new();
    for v in all_votes {
        *by_option.entry(v.option_index).or_insert(0i64) += 1;
    }
    by_option.into_iter().collect()
}
