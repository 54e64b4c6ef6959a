//! Opening service (C6) — the hardest path. Posts the poll (and an
//! optional image) to chat, adds reactions in option order, commits
//! `status=active`, pings the configured role, and ensures the close
//! job is scheduled. Every step after message posting is best-effort:
//! a poll that fails to post stays `scheduled` so the scheduler or
//! recovery can retry it; a poll that posts but can't add every
//! reaction still opens (the safeguard fills in the rest).

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::cache::{keys, SharedCache};
use crate::chat::{ChatAdapter, ChatEmbed};
use crate::db::models::PollStatus;
use crate::db::{models::Poll, polls};
use crate::error::{PollyError, Result};
use crate::notifier::ErrorNotifier;
use crate::poll::state_machine::{guard_open, OpenGuard, OpenReason};
use crate::render::render_poll_embed;
use crate::scheduler::Scheduler;

const REACTION_DELAY: Duration = Duration::from_millis(350);

#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub already_active: bool,
    pub message_id: Option<String>,
}

pub struct OpeningContext<'a> {
    pub pool: &'a SqlitePool,
    pub chat: &'a dyn ChatAdapter,
    pub scheduler: &'a Scheduler,
    pub cache: &'a SharedCache,
    pub notifier: &'a ErrorNotifier,
}

pub async fn open(ctx: &OpeningContext<'_>, poll_id: i64, reason: OpenReason) -> Result<OpenOutcome> {
    let poll = polls::get(ctx.pool, poll_id).await?.ok_or(PollyError::PollNotFound(poll_id))?;

    match guard_open(poll.status, reason) {
        Ok(OpenGuard::AlreadyActive) => {
            return Ok(OpenOutcome { already_active: true, message_id: poll.message_id.clone() });
        }
        Ok(OpenGuard::Proceed) => {}
        Err(e) => return Err(e),
    }

    if let Err(msg) = poll.check_invariants() {
        let err = PollyError::DataIntegrity { message: msg };
        ctx.notifier.notify("poll_opening", &err).await;
        return Err(err);
    }

    let image_message_id = post_image_if_present(ctx, &poll).await;

    let embed = render_poll_embed(&poll, &[], chrono::Utc::now());
    let message_id = match ctx.chat.post_message(&poll.channel_id, &embed, None).await {
        Ok(id) => id,
        Err(e) => {
            warn!(poll_id, error = %e, "failed to post poll message, leaving poll scheduled");
            ctx.notifier.notify("poll_opening", &e).await;
            return Err(e);
        }
    };

    add_reactions_best_effort(ctx, &poll, &message_id).await;

    polls::mark_active(ctx.pool, poll_id, &message_id, image_message_id.as_deref()).await?;
    info!(poll_id, message_id, "poll opened");

    if poll.role_ping.enabled && poll.role_ping.on_open {
        send_role_ping(ctx, &poll, "opened").await;
    }

    ctx.scheduler.schedule_close(poll_id, poll.close_time).await;
    ctx.cache.delete(&keys::poll_render_inputs(poll_id)).await;

    Ok(OpenOutcome { already_active: false, message_id: Some(message_id) })
}

async fn post_image_if_present(ctx: &OpeningContext<'_>, poll: &Poll) -> Option<String> {
    let image_path = poll.image_path.as_ref()?;
    let embed = ChatEmbed {
        title: String::new(),
        description: poll.image_caption.clone().unwrap_or_default(),
        color: None,
        fields: Vec::new(),
        footer: None,
    };
    match ctx.chat.post_message(&poll.channel_id, &embed, Some(image_path)).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(poll_id = poll.id, error = %e, "image post failed, continuing without it");
            None
        }
    }
}

async fn add_reactions_best_effort(ctx: &OpeningContext<'_>, poll: &Poll, message_id: &str) {
    for emoji in &poll.emojis {
        if let Err(e) = ctx.chat.add_reaction(&poll.channel_id, message_id, emoji).await {
            warn!(poll_id = poll.id, emoji, error = %e, "failed to add reaction, safeguard will retry");
        }
        sleep(REACTION_DELAY).await;
    }
}

async fn send_role_ping(ctx: &OpeningContext<'_>, poll: &Poll, occasion: &str) {
    let Some(role_id) = &poll.role_ping.role_id else { return };
    let content = format!("<@&{role_id}> poll {occasion}: **{}**", poll.name);
    let embed = ChatEmbed { title: poll.name.clone(), ..Default::default() };

    match ctx.chat.post_message(&poll.channel_id, &embed, Some(&content)).await {
        Ok(_) => {}
        Err(PollyError::Permission { .. }) => {
            warn!(poll_id = poll.id, "role mention denied, retrying without mention");
            let _ = ctx.chat.post_message(&poll.channel_id, &embed, None).await;
        }
        Err(e) => warn!(poll_id = poll.id, error = %e, "role ping failed"),
    }
}
