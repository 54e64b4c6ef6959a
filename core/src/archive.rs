//! Static archive generator (C15): snapshots a closed poll's final
//! state to disk as HTML under `/poll/<id>/static`, cache-safe for 24
//! hours, so serving it later is a plain file read instead of a
//! database query. Rendered with `tera`.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use tokio::fs;

use crate::db::models::{Poll, PollStatus};
use crate::db::models::Vote;
use crate::error::{PollyError, Result};
use crate::render::{tally, winning_indices};
use crate::time::format_for_user;

const TEMPLATE_NAME: &str = "poll_archive.html";
const TEMPLATE_SOURCE: &str = include_str!("../templates/poll_archive.html.tera");

#[derive(Serialize)]
struct OptionRow {
    label: String,
    emoji: String,
    votes: i64,
    percent: f64,
    is_winner: bool,
}

#[derive(Serialize)]
struct VoterRow {
    user_id: String,
    option_label: String,
}

pub struct ArchiveGenerator {
    tera: Tera,
    archive_dir: PathBuf,
}

impl ArchiveGenerator {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, TEMPLATE_SOURCE)?;
        Ok(Self { tera, archive_dir: archive_dir.into() })
    }

    pub fn path_for(&self, poll_id: i64) -> PathBuf {
        self.archive_dir.join(format!("poll_{poll_id}_details.html"))
    }

    pub fn exists(&self, poll_id: i64) -> bool {
        self.path_for(poll_id).exists()
    }

    /// Renders and writes the archive file. Non-fatal at the call
    /// site: closing/backfill callers log a failure here rather than
    /// aborting the larger operation.
    pub async fn generate(&self, poll: &Poll, votes: &[Vote]) -> Result<PathBuf> {
        if poll.status != PollStatus::Closed {
            return Err(PollyError::validation("can only archive a closed poll"));
        }

        let counts: Vec<(i64, i64)> = {
            let mut by_option = std::collections::HashMap::new();
            for v in votes {
                *by_option.entry(v.option_index).or_insert(0i64) += 1;
            }
            by_option.into_iter().collect()
        };
        let tallies = tally(poll.options.len(), &counts);
        let total: i64 = tallies.iter().sum();
        let winners = winning_indices(&tallies);

        let options: Vec<OptionRow> = poll
            .options
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let votes = tallies[i];
                let percent = if total > 0 { votes as f64 / total as f64 * 100.0 } else { 0.0 };
                OptionRow {
                    label: label.clone(),
                    emoji: poll.emojis.get(i).cloned().unwrap_or_default(),
                    votes,
                    percent,
                    is_winner: winners.contains(&i),
                }
            })
            .collect();

        let voters: Vec<VoterRow> = if poll.anonymous {
            Vec::new()
        } else {
            votes
                .iter()
                .map(|v| VoterRow {
                    user_id: v.user_id.clone(),
                    option_label: poll.options.get(v.option_index as usize).cloned().unwrap_or_default(),
                })
                .collect()
        };

        let unique_voters: std::collections::HashSet<&str> = votes.iter().map(|v| v.user_id.as_str()).collect();

        let mut ctx = Context::new();
        ctx.insert("poll_name", &poll.name);
        ctx.insert("question", &poll.question);
        ctx.insert("options", &options);
        ctx.insert("total_votes", &total);
        ctx.insert("unique_voters", &unique_voters.len());
        ctx.insert("anonymous", &poll.anonymous);
        ctx.insert("voters", &voters);
        ctx.insert("closed_at", &format_for_user(poll.close_time, &poll.timezone, Utc::now()));

        let html = self.tera.render(TEMPLATE_NAME, &ctx)?;

        fs::create_dir_all(&self.archive_dir).await?;
        let path = self.path_for(poll.id);
        fs::write(&path, html).await?;
        Ok(path)
    }

    pub async fn read_if_present(&self, poll_id: i64) -> Result<Option<String>> {
        let path = self.path_for(poll_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path).await?))
    }
}

pub fn static_url(poll_id: i64) -> String {
    format!("/poll/{poll_id}/static")
}

pub fn is_stale_path(path: &Path) -> bool {
    !path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RolePing;
    use chrono::Duration;
    use tempfile::tempdir;

    fn closed_poll() -> Poll {
        let now = Utc::now();
        Poll {
            id: 7,
            name: "T1".into(),
            question: "Q?".into(),
            options: vec!["A".into(), "B".into()],
            emojis: vec!["\u{1F1E6}".into(), "\u{1F1E7}".into()],
            image_path: None,
            image_caption: None,
            image_message_id: None,
            server_id: "g".into(),
            server_name: None,
            channel_id: "c".into(),
            channel_name: None,
            creator_id: "u".into(),
            message_id: Some("m1".into()),
            open_time: now - Duration::minutes(10),
            close_time: now,
            timezone: "UTC".into(),
            anonymous: false,
            multiple_choice: false,
            max_choices: Some(1),
            open_immediately: false,
            role_ping: RolePing::default(),
            status: PollStatus::Closed,
            created_at: now - Duration::minutes(10),
        }
    }

    fn vote(id: i64, user_id: &str, option_index: i64) -> Vote {
        Vote { id, poll_id: 7, user_id: user_id.into(), option_index, voted_at: Utc::now(), changed_at: None }
    }

    #[tokio::test]
    async fn generate_writes_file_with_expected_content() {
        let dir = tempdir().unwrap();
        let generator = ArchiveGenerator::new(dir.path()).unwrap();
        let poll = closed_poll();
        let votes = vec![vote(1, "u1", 0)];

        let path = generator.generate(&poll, &votes).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("A"));
        assert!(content.contains("100.0"));
    }

    #[tokio::test]
    async fn anonymous_poll_omits_voter_list() {
        let dir = tempdir().unwrap();
        let generator = ArchiveGenerator::new(dir.path()).unwrap();
        let mut poll = closed_poll();
        poll.anonymous = true;
        let votes = vec![vote(1, "u1", 0)];

        let path = generator.generate(&poll, &votes).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!content.contains("u1"));
    }

    #[tokio::test]
    async fn cannot_archive_a_non_closed_poll() {
        let dir = tempdir().unwrap();
        let generator = ArchiveGenerator::new(dir.path()).unwrap();
        let mut poll = closed_poll();
        poll.status = PollStatus::Active;
        assert!(generator.generate(&poll, &[]).await.is_err());
    }

    #[tokio::test]
    async fn read_if_present_returns_none_before_generation() {
        let dir = tempdir().unwrap();
        let generator = ArchiveGenerator::new(dir.path()).unwrap();
        assert!(generator.read_if_present(999).await.unwrap().is_none());
    }
}
