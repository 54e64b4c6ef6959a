//! Wires every component into one long-lived `Service` (DESIGN.md's
//! "global mutable state" redesign: rather than free-floating statics,
//! every background task closes over an explicit `Arc`-shared struct).
//! `Service` implements `scheduler::JobRunner` so a fired job calls
//! straight into the opening/closing services without the scheduler
//! knowing anything about chat, persistence, or caching.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::archive::ArchiveGenerator;
use crate::cache::SharedCache;
use crate::chat::ChatAdapter;
use crate::config::Config;
use crate::db::Db;
use crate::notifier::ErrorNotifier;
use crate::poll::state_machine::OpenReason;
use crate::recovery::{RecoveryDelays, RecoveryOrchestrator, RecoveryReport};
use crate::safeguard::Safeguard;
use crate::scheduler::{JobRunner, Scheduler};
use crate::services::closing::{self, CloseReason, ClosingContext};
use crate::services::opening::{self, OpeningContext};
use crate::services::reopening::{self, ReopenOutcome};
use crate::tokens::TokenService;

pub struct Service {
    pub pool: SqlitePool,
    pub chat: Arc<dyn ChatAdapter>,
    pub scheduler: Arc<Scheduler>,
    pub cache: SharedCache,
    pub notifier: Arc<ErrorNotifier>,
    pub archive: Arc<ArchiveGenerator>,
    pub tokens: TokenService,
}

impl Service {
    pub async fn new(config: &Config, chat: Arc<dyn ChatAdapter>) -> crate::error::Result<Arc<Self>> {
        let db = Db::connect(&config.database_url).await?;
        let cache: SharedCache = match &config.cache_url {
            Some(url) => match crate::cache::RedisCache::connect(url).await {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    error!(%e, "failed to connect to redis, falling back to in-memory cache");
                    Arc::new(crate::cache::InMemoryCache::new())
                }
            },
            None => Arc::new(crate::cache::InMemoryCache::new()),
        };
        let notifier = Arc::new(ErrorNotifier::new(chat.clone(), config.system_owner_id.clone()));
        let archive = Arc::new(ArchiveGenerator::new(config.archive_dir.clone())?);
        let tokens = TokenService::new(cache.clone());

        Arc::new_cyclic(|weak: &std::sync::Weak<Service>| {
            let runner: Arc<dyn JobRunner> = Arc::new(WeakJobRunner(weak.clone()));
            let scheduler = Arc::new(Scheduler::new(runner));
            Self { pool: db.pool().clone(), chat, scheduler, cache, notifier, archive, tokens }
        })
        .pipe_ok()
    }

    pub fn opening_ctx(&self) -> OpeningContext<'_> {
        OpeningContext {
            pool: &self.pool,
            chat: self.chat.as_ref(),
            scheduler: &self.scheduler,
            cache: &self.cache,
            notifier: &self.notifier,
        }
    }

    pub fn closing_ctx(&self) -> ClosingContext<'_> {
        ClosingContext {
            pool: &self.pool,
            chat: self.chat.as_ref(),
            cache: &self.cache,
            notifier: &self.notifier,
            archive: &self.archive,
        }
    }

    pub fn reopening_ctx(&self) -> crate::services::reopening::ReopeningContext<'_> {
        crate::services::reopening::ReopeningContext {
            pool: &self.pool,
            chat: self.chat.as_ref(),
            scheduler: &self.scheduler,
            cache: &self.cache,
        }
    }

    pub async fn reopen_poll(
        &self,
        poll_id: i64,
        new_close_time: chrono::DateTime<chrono::Utc>,
    ) -> crate::error::Result<ReopenOutcome> {
        reopening::reopen(&self.reopening_ctx(), poll_id, new_close_time).await
    }

    pub async fn run_recovery(&self, delays: RecoveryDelays) -> RecoveryReport {
        let orchestrator = RecoveryOrchestrator::new(
            self.pool.clone(),
            self.chat.clone(),
            self.scheduler.clone(),
            self.cache.clone(),
            self.notifier.clone(),
            self.archive.clone(),
            delays,
        );
        orchestrator.run().await
    }

    pub fn safeguard(&self, tick_secs: u64) -> Safeguard {
        Safeguard::new(self.pool.clone(), self.chat.clone(), self.notifier.clone(), tick_secs)
    }

    /// Runs the scheduler loop until `shutdown` fires. Callers spawn
    /// this alongside `safeguard(...).run(shutdown)` as sibling tasks.
    pub async fn run_scheduler(&self, shutdown: CancellationToken) {
        self.scheduler.run(shutdown).await
    }

    /// Gateway-driven counterpart to the reaction-add webhook: looks
    /// the poll up by `message_id` (a reaction event carries no poll
    /// id) and collects the vote if the emoji maps to an option.
    pub async fn handle_reaction_add(&self, message_id: &str, emoji: &str, user_id: &str) -> crate::error::Result<()> {
        let Some(poll) = crate::db::polls::get_by_message_id(&self.pool, message_id).await? else {
            return Ok(());
        };
        let Some(option_index) = poll.emojis.iter().position(|e| e == emoji) else {
            return Ok(());
        };

        let outcome = crate::vote_engine::collect_vote(&self.pool, poll.id, user_id, option_index as i64).await?;
        if crate::vote_engine::should_remove_reaction(&outcome, poll.anonymous, poll.multiple_choice) {
            self.chat.remove_reaction(&poll.channel_id, message_id, emoji, user_id).await?;
        }

        if let Ok(counts) = crate::db::votes::count_by_option(&self.pool, poll.id).await {
            let embed = crate::render::render_poll_embed(&poll, &counts, chrono::Utc::now());
            let _ = self.chat.edit_message(&poll.channel_id, message_id, &embed).await;
        }
        Ok(())
    }

    /// Gateway-driven counterpart to the reaction-remove webhook: a
    /// user manually un-reacting (not the bot stripping it after a
    /// toggle) retracts their ballot on an active poll.
    pub async fn handle_reaction_remove(&self, message_id: &str, emoji: &str, user_id: &str) -> crate::error::Result<()> {
        let Some(poll) = crate::db::polls::get_by_message_id(&self.pool, message_id).await? else {
            return Ok(());
        };
        if poll.status != crate::db::models::PollStatus::Active {
            return Ok(());
        }
        let Some(option_index) = poll.emojis.iter().position(|e| e == emoji) else {
            return Ok(());
        };

        let existing = crate::db::votes::for_poll_and_user(&self.pool, poll.id, user_id).await?;
        if let Some(vote) = existing.into_iter().find(|v| v.option_index == option_index as i64) {
            crate::db::votes::delete(&self.pool, vote.id).await?;
        }
        Ok(())
    }
}

/// Registers reaction gateway events against the vote engine. Wired
/// into the `serenity::Client` builder alongside the REST-only
/// `SerenityAdapter` (which never touches the gateway itself).
pub struct GatewayHandler {
    service: Arc<Service>,
}

impl GatewayHandler {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl serenity::client::EventHandler for GatewayHandler {
    async fn reaction_add(&self, ctx: serenity::client::Context, reaction: serenity::model::channel::Reaction) {
        let Ok(user) = reaction.user(&ctx.http).await else { return };
        if user.bot {
            return;
        }
        let message_id = reaction.message_id.to_string();
        let emoji = reaction.emoji.to_string();
        if let Err(e) = self.service.handle_reaction_add(&message_id, &emoji, &user.id.to_string()).await {
            error!(error = %e, "gateway reaction_add handling failed");
            self.service.notifier.notify("gateway_reaction_add", &e).await;
        }
    }

    async fn reaction_remove(&self, ctx: serenity::client::Context, reaction: serenity::model::channel::Reaction) {
        let Ok(user) = reaction.user(&ctx.http).await else { return };
        if user.bot {
            return;
        }
        let message_id = reaction.message_id.to_string();
        let emoji = reaction.emoji.to_string();
        if let Err(e) = self.service.handle_reaction_remove(&message_id, &emoji, &user.id.to_string()).await {
            error!(error = %e, "gateway reaction_remove handling failed");
            self.service.notifier.notify("gateway_reaction_remove", &e).await;
        }
    }

    async fn ready(&self, _ctx: serenity::client::Context, ready: serenity::model::gateway::Ready) {
        info!(user = %ready.user.name, "gateway connected");
    }
}

/// Bridges the scheduler's fire-and-forget callback to a `Service`
/// without creating an `Arc` reference cycle (`Scheduler` is owned by
/// `Service`, so it can't hold a strong `Arc<Service>` back to itself).
struct WeakJobRunner(std::sync::Weak<Service>);

#[async_trait]
impl JobRunner for WeakJobRunner {
    async fn run_open(&self, poll_id: i64) {
        let Some(service) = self.0.upgrade() else { return };
        info!(poll_id, "scheduler firing open job");
        if let Err(e) = opening::open(&service.opening_ctx(), poll_id, OpenReason::Scheduled).await {
            error!(poll_id, error = %e, "scheduled open failed");
            service.notifier.notify("scheduler", &e).await;
        }
    }

    async fn run_close(&self, poll_id: i64) {
        let Some(service) = self.0.upgrade() else { return };
        info!(poll_id, "scheduler firing close job");
        if let Err(e) = closing::close(&service.closing_ctx(), poll_id, CloseReason::Scheduled).await {
            error!(poll_id, error = %e, "scheduled close failed");
            service.notifier.notify("scheduler", &e).await;
        }
    }
}

/// Tiny local helper so `Arc::new_cyclic`'s non-fallible closure can
/// still participate in a `Result`-returning constructor without a
/// second allocation.
trait PipeOk: Sized {
    fn pipe_ok<E>(self) -> Result<Self, E> {
        Ok(self)
    }
}
impl<T> PipeOk for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::fake::FakeAdapter;

    #[tokio::test]
    async fn service_wires_scheduler_back_to_itself() {
        let config = Config {
            bot_token: "t".into(),
            database_url: "sqlite::memory:".into(),
            cache_url: None,
            system_owner_id: "owner".into(),
            archive_dir: std::env::temp_dir().join("polly-app-test"),
            log_dir: std::env::temp_dir(),
            bind_addr: "127.0.0.1:0".into(),
            oauth_client_id: None,
            oauth_client_secret: None,
            safeguard_interval_secs: 5,
        };
        let chat: Arc<dyn ChatAdapter> = Arc::new(FakeAdapter::new());
        let service = Service::new(&config, chat).await.unwrap();
        assert_eq!(service.scheduler.job_count().await, 0);
    }
}
