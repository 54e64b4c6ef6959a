//! Chat-platform adapter (C3): a narrow capability trait over the SDK,
//! so the poll lifecycle engine never calls `serenity` directly. One
//! production implementation (`serenity_adapter::SerenityAdapter`) and
//! one in-memory fake (`fake::FakeAdapter`) used by every other
//! component's tests.

pub mod fake;
pub mod serenity_adapter;

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PollyError, Result};

/// A rendered embed, platform-agnostic. `fields` preserves insertion
/// order (poll options render in option order).
#[derive(Debug, Clone, Default)]
pub struct ChatEmbed {
    pub title: String,
    pub description: String,
    pub color: Option<u32>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl ChatEmbed {
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField { name: name.into(), value: value.into(), inline });
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone)]
pub struct ReactionUser {
    pub id: String,
    pub username: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone)]
pub struct GuildRole {
    pub id: String,
    pub name: String,
    pub pingable: bool,
}

/// The chat-platform capability surface the poll engine needs. Every
/// fallible method returns `PollyError` so callers can branch on
/// `is_retryable()` uniformly regardless of which implementation is
/// wired up.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    async fn post_message(&self, channel_id: &str, embed: &ChatEmbed, content: Option<&str>) -> Result<String>;

    /// Fails quietly (`Ok(())`) when the message was already deleted
    /// externally — the caller re-derives that from `fetch_message`
    /// returning `None` rather than from this method's error type.
    async fn edit_message(&self, channel_id: &str, message_id: &str, embed: &ChatEmbed) -> Result<()>;

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    /// Idempotent: clearing an already-bare message succeeds.
    async fn clear_reactions(&self, channel_id: &str, message_id: &str) -> Result<()>;

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Option<ChatMessage>>;

    /// Pagination is handled internally; returns every non-bot (unless
    /// `include_bots`) user who reacted with `emoji`.
    async fn iter_reaction_users(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<Vec<ReactionUser>>;

    /// Idempotent: removing a reaction that's already gone succeeds.
    async fn remove_reaction(&self, channel_id: &str, message_id: &str, emoji: &str, user_id: &str) -> Result<()>;

    async fn send_dm(&self, user_id: &str, embed: &ChatEmbed) -> Result<()>;

    async fn get_guild_roles(&self, guild_id: &str) -> Result<Vec<GuildRole>>;
}

/// Retries a fallible chat-adapter call: rate-limit errors wait the
/// server-advised delay, all other retryable errors back off
/// exponentially, capped at 3 attempts total.
pub async fn with_retry<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < MAX_ATTEMPTS && e.is_retryable() => {
                let delay = e.retry_delay().unwrap_or_else(|| backoff_delay(attempt));
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(250u64 * 2u64.pow(attempt.saturating_sub(1)))
}

pub fn permission_error(action: impl Into<String>) -> PollyError {
    PollyError::permission(action)
}
