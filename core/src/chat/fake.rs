//! In-memory `ChatAdapter` used by every other component's tests — the
//! poll lifecycle engine never stands up a real gateway connection to
//! verify its own logic.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::chat::{ChatAdapter, ChatEmbed, ChatMessage, GuildRole, ReactionUser};
use crate::error::{PollyError, Result};

#[derive(Debug, Clone)]
struct FakeMessage {
    channel_id: String,
    embed: ChatEmbed,
    content: Option<String>,
    // emoji -> user ids who reacted, in arrival order
    reactions: Vec<(String, Vec<String>)>,
    deleted: bool,
}

/// A deterministic, inspectable stand-in for the chat platform. Call
/// `seed_reaction` to simulate a user reacting out of band (e.g. the
/// safeguard's test scenarios), or `delete_message` to simulate the
/// message vanishing externally.
pub struct FakeAdapter {
    state: Mutex<Inner>,
}

struct Inner {
    next_id: u64,
    messages: HashMap<String, FakeMessage>,
    dms: Vec<(String, ChatEmbed)>,
    permission_denied_channels: HashSet<String>,
    roles: HashMap<String, Vec<GuildRole>>,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self {
            state: Mutex::new(Inner {
                next_id: 1,
                messages: HashMap::new(),
                dms: Vec::new(),
                permission_denied_channels: HashSet::new(),
                roles: HashMap::new(),
            }),
        }
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_permission_in(&self, channel_id: &str) {
        self.state.lock().unwrap().permission_denied_channels.insert(channel_id.to_string());
    }

    pub fn seed_reaction(&self, message_id: &str, emoji: &str, user_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.messages.get_mut(message_id) {
            match msg.reactions.iter_mut().find(|(e, _)| e == emoji) {
                Some((_, users)) => {
                    if !users.iter().any(|u| u == user_id) {
                        users.push(user_id.to_string());
                    }
                }
                None => msg.reactions.push((emoji.to_string(), vec![user_id.to_string()])),
            }
        }
    }

    pub fn delete_message(&self, message_id: &str) {
        if let Some(msg) = self.state.lock().unwrap().messages.get_mut(message_id) {
            msg.deleted = true;
        }
    }

    pub fn dms_sent(&self) -> Vec<(String, ChatEmbed)> {
        self.state.lock().unwrap().dms.clone()
    }

    pub fn set_guild_roles(&self, guild_id: &str, roles: Vec<GuildRole>) {
        self.state.lock().unwrap().roles.insert(guild_id.to_string(), roles);
    }

    pub fn message_embed(&self, message_id: &str) -> Option<ChatEmbed> {
        self.state.lock().unwrap().messages.get(message_id).map(|m| m.embed.clone())
    }

    pub fn reaction_count(&self, message_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(message_id)
            .map(|m| m.reactions.iter().map(|(_, u)| u.len()).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChatAdapter for FakeAdapter {
    async fn post_message(&self, channel_id: &str, embed: &ChatEmbed, content: Option<&str>) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.permission_denied_channels.contains(channel_id) {
            return Err(PollyError::permission("post_message"));
        }
        let id = state.next_id.to_string();
        state.next_id += 1;
        state.messages.insert(
            id.clone(),
            FakeMessage {
                channel_id: channel_id.to_string(),
                embed: embed.clone(),
                content: content.map(|s| s.to_string()),
                reactions: Vec::new(),
                deleted: false,
            },
        );
        Ok(id)
    }

    async fn edit_message(&self, _channel_id: &str, message_id: &str, embed: &ChatEmbed) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.messages.get_mut(message_id) {
            if !msg.deleted {
                msg.embed = embed.clone();
            }
        }
        Ok(())
    }

    async fn add_reaction(&self, _channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.messages.get_mut(message_id) {
            if !msg.reactions.iter().any(|(e, _)| e == emoji) {
                msg.reactions.push((emoji.to_string(), Vec::new()));
            }
        }
        Ok(())
    }

    async fn clear_reactions(&self, _channel_id: &str, message_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.messages.get_mut(message_id) {
            msg.reactions.clear();
        }
        Ok(())
    }

    async fn fetch_message(&self, _channel_id: &str, message_id: &str) -> Result<Option<ChatMessage>> {
        let state = self.state.lock().unwrap();
        Ok(state.messages.get(message_id).filter(|m| !m.deleted).map(|m| ChatMessage {
            id: message_id.to_string(),
            channel_id: m.channel_id.clone(),
        }))
    }

    async fn iter_reaction_users(&self, _channel_id: &str, message_id: &str, emoji: &str) -> Result<Vec<ReactionUser>> {
        let state = self.state.lock().unwrap();
        let Some(msg) = state.messages.get(message_id) else { return Ok(Vec::new()) };
        Ok(msg
            .reactions
            .iter()
            .find(|(e, _)| e == emoji)
            .map(|(_, users)| {
                users
                    .iter()
                    .map(|id| ReactionUser { id: id.clone(), username: format!("user-{id}"), is_bot: false })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_reaction(&self, _channel_id: &str, message_id: &str, emoji: &str, user_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.messages.get_mut(message_id) {
            if let Some((_, users)) = msg.reactions.iter_mut().find(|(e, _)| e == emoji) {
                users.retain(|u| u != user_id);
            }
        }
        Ok(())
    }

    async fn send_dm(&self, user_id: &str, embed: &ChatEmbed) -> Result<()> {
        self.state.lock().unwrap().dms.push((user_id.to_string(), embed.clone()));
        Ok(())
    }

    async fn get_guild_roles(&self, guild_id: &str) -> Result<Vec<GuildRole>> {
        Ok(self.state.lock().unwrap().roles.get(guild_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_then_fetch_round_trips() {
        let adapter = FakeAdapter::new();
        let embed = ChatEmbed { title: "Q?".into(), ..Default::default() };
        let id = adapter.post_message("c1", &embed, None).await.unwrap();
        let fetched = adapter.fetch_message("c1", &id).await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn deleted_message_is_not_found() {
        let adapter = FakeAdapter::new();
        let id = adapter.post_message("c1", &ChatEmbed::default(), None).await.unwrap();
        adapter.delete_message(&id);
        assert!(adapter.fetch_message("c1", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn permission_denied_channel_rejects_posting() {
        let adapter = FakeAdapter::new();
        adapter.deny_permission_in("locked");
        let result = adapter.post_message("locked", &ChatEmbed::default(), None).await;
        assert!(matches!(result, Err(PollyError::Permission { .. })));
    }

    #[tokio::test]
    async fn seeded_reaction_is_iterable_and_removable() {
        let adapter = FakeAdapter::new();
        let id = adapter.post_message("c1", &ChatEmbed::default(), None).await.unwrap();
        adapter.seed_reaction(&id, "🇦", "u1");
        let users = adapter.iter_reaction_users("c1", &id, "🇦").await.unwrap();
        assert_eq!(users.len(), 1);

        adapter.remove_reaction("c1", &id, "🇦", "u1").await.unwrap();
        let users = adapter.iter_reaction_users("c1", &id, "🇦").await.unwrap();
        assert!(users.is_empty());
    }
}
