//! Domain row types for the persistence layer (C2). Every read path
//! returns one of these — no in-band null surprise, explicit defaults
//! on missing columns instead of reflection-based column access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Scheduled,
    Active,
    Closed,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Scheduled => "scheduled",
            PollStatus::Active => "active",
            PollStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => PollStatus::Active,
            "closed" => PollStatus::Closed,
            _ => PollStatus::Scheduled,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolePing {
    pub enabled: bool,
    pub role_id: Option<String>,
    pub role_name: Option<String>,
    pub on_open: bool,
    pub on_close: bool,
    pub on_update: bool,
}

/// The lifecycle unit: one scheduled/active/closed poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub name: String,
    pub question: String,
    pub options: Vec<String>,
    pub emojis: Vec<String>,
    pub image_path: Option<String>,
    pub image_caption: Option<String>,
    pub image_message_id: Option<String>,
    pub server_id: String,
    pub server_name: Option<String>,
    pub channel_id: String,
    pub channel_name: Option<String>,
    pub creator_id: String,
    pub message_id: Option<String>,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub timezone: String,
    pub anonymous: bool,
    pub multiple_choice: bool,
    pub max_choices: Option<i64>,
    pub open_immediately: bool,
    pub role_ping: RolePing,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    /// `close_time > open_time`, `|options| == |emojis|`, option count in
    /// `[2, 10]`; if `multiple_choice` is false then `max_choices` is 1.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.close_time <= self.open_time {
            return Err("close_time must be after open_time".to_string());
        }
        if self.options.len() != self.emojis.len() {
            return Err("options and emojis must have the same length".to_string());
        }
        if !(2..=10).contains(&self.options.len()) {
            return Err("options must number between 2 and 10".to_string());
        }
        if !self.multiple_choice && self.max_choices.unwrap_or(1) != 1 {
            return Err("single-choice polls must have max_choices = 1".to_string());
        }
        Ok(())
    }

    pub fn effective_max_choices(&self) -> i64 {
        if self.multiple_choice {
            self.max_choices.unwrap_or(self.options.len() as i64)
        } else {
            1
        }
    }
}

/// One recorded selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: i64,
    pub poll_id: i64,
    pub user_id: String,
    pub option_index: i64,
    pub voted_at: DateTime<Utc>,
    pub changed_at: Option<DateTime<Utc>>,
}

/// Minimal cache of chat-platform identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
    pub id: i64,
    pub user_id: String,
    pub last_server_id: Option<String>,
    pub last_channel_id: Option<String>,
    pub default_timezone: String,
    pub timezone_explicitly_set: bool,
    pub last_role_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildCache {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCache {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    pub kind: String,
    pub position: i64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_poll() -> Poll {
        let now = Utc::now();
        Poll {
            id: 1,
            name: "T1".into(),
            question: "Q?".into(),
            options: vec!["A".into(), "B".into()],
            emojis: vec!["🇦".into(), "🇧".into()],
            image_path: None,
            image_caption: None,
            image_message_id: None,
            server_id: "g".into(),
            server_name: None,
            channel_id: "c".into(),
            channel_name: None,
            creator_id: "u".into(),
            message_id: None,
            open_time: now + Duration::minutes(1),
            close_time: now + Duration::minutes(5),
            timezone: "UTC".into(),
            anonymous: false,
            multiple_choice: false,
            max_choices: Some(1),
            open_immediately: false,
            role_ping: RolePing::default(),
            status: PollStatus::Scheduled,
            created_at: now,
        }
    }

    #[test]
    fn invariants_hold_for_valid_poll() {
        assert!(sample_poll().check_invariants().is_ok());
    }

    #[test]
    fn mismatched_options_and_emojis_rejected() {
        let mut p = sample_poll();
        p.emojis.pop();
        assert!(p.check_invariants().is_err());
    }

    #[test]
    fn single_choice_must_cap_at_one() {
        let mut p = sample_poll();
        p.max_choices = Some(3);
        assert!(p.check_invariants().is_err());
    }

    #[test]
    fn too_few_options_rejected() {
        let mut p = sample_poll();
        p.options = vec!["only one".into()];
        p.emojis = vec!["🇦".into()];
        assert!(p.check_invariants().is_err());
    }
}
