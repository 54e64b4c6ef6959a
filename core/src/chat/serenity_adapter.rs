//! Production `ChatAdapter` backed by `serenity`'s REST client. Only
//! the `ChatAdapter` capability surface is exposed here; gateway event
//! handling (reaction-add/remove) lives in `app.rs`, which feeds those
//! events into the vote engine through this same trait's types.

use async_trait::async_trait;
use serenity::builder::{CreateEmbed, CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use serenity::model::permissions::Permissions;
use std::sync::Arc;

use crate::chat::{ChatAdapter, ChatEmbed, ChatMessage, GuildRole, ReactionUser};
use crate::error::{PollyError, Result};

pub struct SerenityAdapter {
    http: Arc<Http>,
}

impl SerenityAdapter {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn to_create_embed(embed: &ChatEmbed) -> CreateEmbed {
        let mut built = CreateEmbed::new().title(&embed.title).description(&embed.description);
        if let Some(color) = embed.color {
            built = built.colour(color);
        }
        if let Some(footer) = &embed.footer {
            built = built.footer(serenity::builder::CreateEmbedFooter::new(footer.clone()));
        }
        for field in &embed.fields {
            built = built.field(field.name.clone(), field.value.clone(), field.inline);
        }
        built
    }

    fn map_serenity_error(err: serenity::Error) -> PollyError {
        match &err {
            serenity::Error::Http(http_err) => match http_err {
                serenity::http::HttpError::UnsuccessfulRequest(resp) if resp.status_code.as_u16() == 403 => {
                    PollyError::permission("discord_request")
                }
                serenity::http::HttpError::UnsuccessfulRequest(resp) if resp.status_code.as_u16() == 404 => {
                    PollyError::MessageNotFound
                }
                serenity::http::HttpError::UnsuccessfulRequest(resp) if resp.status_code.as_u16() == 429 => {
                    PollyError::RateLimit { retry_after: std::time::Duration::from_secs(1) }
                }
                _ => PollyError::Transport { message: http_err.to_string() },
            },
            _ => PollyError::Transport { message: err.to_string() },
        }
    }
}

#[async_trait]
impl ChatAdapter for SerenityAdapter {
    async fn post_message(&self, channel_id: &str, embed: &ChatEmbed, content: Option<&str>) -> Result<String> {
        let channel: ChannelId = channel_id.parse().map_err(|_| PollyError::validation("bad channel id"))?;
        let mut builder = CreateMessage::new().embed(Self::to_create_embed(embed));
        if let Some(content) = content {
            builder = builder.content(content);
        }
        let message = channel
            .send_message(&self.http, builder)
            .await
            .map_err(Self::map_serenity_error)?;
        Ok(message.id.to_string())
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, embed: &ChatEmbed) -> Result<()> {
        let channel: ChannelId = channel_id.parse().map_err(|_| PollyError::validation("bad channel id"))?;
        let message: MessageId = message_id.parse().map_err(|_| PollyError::validation("bad message id"))?;
        let builder = EditMessage::new().embed(Self::to_create_embed(embed));
        match channel.edit_message(&self.http, message, builder).await {
            Ok(_) => Ok(()),
            Err(serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp)))
                if resp.status_code.as_u16() == 404 =>
            {
                Ok(())
            }
            Err(e) => Err(Self::map_serenity_error(e)),
        }
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let channel: ChannelId = channel_id.parse().map_err(|_| PollyError::validation("bad channel id"))?;
        let message: MessageId = message_id.parse().map_err(|_| PollyError::validation("bad message id"))?;
        self.http
            .create_reaction(channel, message, &serenity::model::channel::ReactionType::Unicode(emoji.to_string()))
            .await
            .map_err(Self::map_serenity_error)
    }

    async fn clear_reactions(&self, channel_id: &str, message_id: &str) -> Result<()> {
        let channel: ChannelId = channel_id.parse().map_err(|_| PollyError::validation("bad channel id"))?;
        let message: MessageId = message_id.parse().map_err(|_| PollyError::validation("bad message id"))?;
        match self.http.delete_message_reactions(channel, message).await {
            Ok(()) => Ok(()),
            Err(serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp)))
                if resp.status_code.as_u16() == 404 =>
            {
                Ok(())
            }
            Err(e) => Err(Self::map_serenity_error(e)),
        }
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Option<ChatMessage>> {
        let channel: ChannelId = channel_id.parse().map_err(|_| PollyError::validation("bad channel id"))?;
        let message: MessageId = message_id.parse().map_err(|_| PollyError::validation("bad message id"))?;
        match self.http.get_message(channel, message).await {
            Ok(m) => Ok(Some(ChatMessage { id: m.id.to_string(), channel_id: m.channel_id.to_string() })),
            Err(serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp)))
                if resp.status_code.as_u16() == 404 =>
            {
                Ok(None)
            }
            Err(e) => Err(Self::map_serenity_error(e)),
        }
    }

    async fn iter_reaction_users(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<Vec<ReactionUser>> {
        let channel: ChannelId = channel_id.parse().map_err(|_| PollyError::validation("bad channel id"))?;
        let message: MessageId = message_id.parse().map_err(|_| PollyError::validation("bad message id"))?;
        let reaction = serenity::model::channel::ReactionType::Unicode(emoji.to_string());

        let mut out = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let page = self
                .http
                .get_reaction_users(channel, message, &reaction, 100, after)
                .await
                .map_err(Self::map_serenity_error)?;
            let page_len = page.len();
            if page_len == 0 {
                break;
            }
            after = page.last().map(|u| u.id);
            out.extend(page.into_iter().filter(|u| !u.bot).map(|u| ReactionUser {
                id: u.id.to_string(),
                username: u.name.clone(),
                is_bot: u.bot,
            }));
            if page_len < 100 {
                break;
            }
        }
        Ok(out)
    }

    async fn remove_reaction(&self, channel_id: &str, message_id: &str, emoji: &str, user_id: &str) -> Result<()> {
        let channel: ChannelId = channel_id.parse().map_err(|_| PollyError::validation("bad channel id"))?;
        let message: MessageId = message_id.parse().map_err(|_| PollyError::validation("bad message id"))?;
        let user: UserId = user_id.parse().map_err(|_| PollyError::validation("bad user id"))?;
        let reaction = serenity::model::channel::ReactionType::Unicode(emoji.to_string());
        match self.http.delete_reaction(channel, message, Some(user), &reaction).await {
            Ok(()) => Ok(()),
            Err(serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp)))
                if resp.status_code.as_u16() == 404 =>
            {
                Ok(())
            }
            Err(e) => Err(Self::map_serenity_error(e)),
        }
    }

    async fn send_dm(&self, user_id: &str, embed: &ChatEmbed) -> Result<()> {
        let user: UserId = user_id.parse().map_err(|_| PollyError::validation("bad user id"))?;
        let channel = user.create_dm_channel(&self.http).await.map_err(Self::map_serenity_error)?;
        let builder = CreateMessage::new().embed(Self::to_create_embed(embed));
        channel.id.send_message(&self.http, builder).await.map_err(|e| match e {
            serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp))
                if resp.status_code.as_u16() == 403 =>
            {
                PollyError::permission("send_dm")
            }
            other => Self::map_serenity_error(other),
        })?;
        Ok(())
    }

    async fn get_guild_roles(&self, guild_id: &str) -> Result<Vec<GuildRole>> {
        let guild: GuildId = guild_id.parse().map_err(|_| PollyError::validation("bad guild id"))?;
        let roles = self.http.get_guild_roles(guild).await.map_err(Self::map_serenity_error)?;
        Ok(roles
            .into_iter()
            .filter(|r| !r.permissions.is_empty() || r.mentionable)
            .map(|r| GuildRole { id: r.id.to_string(), name: r.name.clone(), pingable: r.mentionable })
            .collect())
    }
}

/// Always renderable: returns a lettered-emoji fallback (🇦, 🇧, ...)
/// for the option at `index` when the configured emoji can't be used.
/// Final rung of the fallback chain: alias lookup, then single char,
/// then this lettered default.
pub fn lettered_emoji_fallback(index: usize) -> String {
    const REGIONAL_INDICATORS: [&str; 10] =
        ["🇦", "🇧", "🇨", "🇩", "🇪", "🇫", "🇬", "🇭", "🇮", "🇯"];
    REGIONAL_INDICATORS.get(index).copied().unwrap_or("🔘").to_string()
}

#[allow(dead_code)]
fn require_permissions() -> Permissions {
    Permissions::SEND_MESSAGES | Permissions::EMBED_LINKS | Permissions::ADD_REACTIONS | Permissions::ATTACH_FILES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lettered_fallback_cycles_through_regional_indicators() {
        assert_eq!(lettered_emoji_fallback(0), "🇦");
        assert_eq!(lettered_emoji_fallback(9), "🇯");
        assert_eq!(lettered_emoji_fallback(20), "🔘");
    }
}
