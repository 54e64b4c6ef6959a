//! Closing service (C7): the single path that turns an active poll
//! into a closed one. Edits the live message to its final tally,
//! clears reactions (voting is over), writes the static archive, and
//! sends the close-occasion role ping. `status=closed` commits before
//! any of the best-effort chat edits so a crash mid-close never leaves
//! the poll open forever — the safeguard and recovery sweeps repair a
//! closed poll whose message was never updated.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::archive::ArchiveGenerator;
use crate::cache::{keys, SharedCache};
use crate::chat::{ChatAdapter, ChatEmbed};
use crate::db::models::PollStatus;
use crate::db::{polls, votes};
use crate::error::{PollyError, Result};
use crate::notifier::ErrorNotifier;
use crate::poll::state_machine::{guard_close, CloseGuard};
use crate::render::render_poll_embed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Scheduled,
    Manual,
    Recovery,
}

#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub already_closed: bool,
    pub archive_path: Option<String>,
}

pub struct ClosingContext<'a> {
    pub pool: &'a SqlitePool,
    pub chat: &'a dyn ChatAdapter,
    pub cache: &'a SharedCache,
    pub notifier: &'a ErrorNotifier,
    pub archive: &'a ArchiveGenerator,
}

pub async fn close(ctx: &ClosingContext<'_>, poll_id: i64, _reason: CloseReason) -> Result<CloseOutcome> {
    let poll = polls::get(ctx.pool, poll_id).await?.ok_or(PollyError::PollNotFound(poll_id))?;

    match guard_close(poll.status) {
        Ok(CloseGuard::AlreadyClosed) => return Ok(CloseOutcome { already_closed: true, archive_path: None }),
        Ok(CloseGuard::Proceed) => {}
        Err(e) => return Err(e),
    }

    polls::mark_closed(ctx.pool, poll_id).await?;
    info!(poll_id, "poll closed");

    let mut closed_poll = poll.clone();
    closed_poll.status = PollStatus::Closed;

    let all_votes = votes::for_poll(ctx.pool, poll_id).await?;
    let counts = counts_by_option(&all_votes);
    let embed = render_poll_embed(&closed_poll, &counts, chrono::Utc::now());

    if let Some(message_id) = &poll.message_id {
        if let Err(e) = ctx.chat.edit_message(&poll.channel_id, message_id, &embed).await {
            warn!(poll_id, error = %e, "failed to edit message to final results, recovery will repair it");
            ctx.notifier.notify("poll_closing", &e).await;
        }
        if let Err(e) = ctx.chat.clear_reactions(&poll.channel_id, message_id).await {
            warn!(poll_id, error = %e, "failed to clear reactions after close");
        }
    }

    if poll.role_ping.enabled && poll.role_ping.on_close {
        send_close_ping(ctx, &poll).await;
    }

    let archive_path = match ctx.archive.generate(&closed_poll, &all_votes).await {
        Ok(path) => Some(path.to_string_lossy().into_owned()),
        Err(e) => {
            warn!(poll_id, error = %e, "archive generation failed, backfill will retry");
            None
        }
    };

    ctx.cache.delete(&keys::poll_render_inputs(poll_id)).await;

    Ok(CloseOutcome { already_closed: false, archive_path })
}

fn counts_by_option(all_votes: &[crate::db::models::Vote]) -> Vec<(i64, i64)> {
    let mut by_option = std::collections::HashMap::new();
    for v in all_votes {
        *by_option.entry(v.option_index).or_insert(0i64) += 1;
    }
    by_option.into_iter().collect()
}

async fn send_close_ping(ctx: &ClosingContext<'_>, poll: &crate::db::models::Poll) {
    let Some(role_id) = &poll.role_ping.role_id else { return };
    let content = format!("<@&{role_id}> poll closed: **{}**", poll.name);
    let embed = ChatEmbed { title: poll.name.clone(), ..Default::default() };

    match ctx.chat.post_message(&poll.channel_id, &embed, Some(&content)).await {
        Ok(_) => {}
        Err(PollyError::Permission { .. }) => {
            let _ = ctx.chat.post_message(&poll.channel_id, &embed, None).await;
        }
        Err(e) => warn!(poll_id = poll.id, error = %e, "close role ping failed"),
    }
}
