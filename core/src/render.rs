//! Embed and archive rendering shared by the opening, closing, and
//! archive-backfill paths: title with a status emoji, question,
//! per-option progress bars, timing, winner reveal on close.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::chat::ChatEmbed;
use crate::db::models::{Poll, PollStatus};
use crate::time::format_for_user;

const BAR_WIDTH: usize = 15;

fn status_emoji(status: PollStatus) -> &'static str {
    match status {
        PollStatus::Scheduled => "\u{1F5F3}\u{FE0F}", // 🗳️
        PollStatus::Active => "\u{1F4CA}",            // 📊
        PollStatus::Closed => "\u{1F3C1}",            // 🏁
    }
}

fn progress_bar(fraction: f64) -> String {
    let filled = ((fraction * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    format!("{}{}", "\u{2588}".repeat(filled), "\u{2591}".repeat(BAR_WIDTH - filled))
}

/// Counts keyed by option index; any option with no votes is treated
/// as zero, never omitted from the embed.
pub fn tally(options_len: usize, counts: &[(i64, i64)]) -> Vec<i64> {
    let by_index: HashMap<i64, i64> = counts.iter().cloned().collect();
    (0..options_len as i64).map(|i| *by_index.get(&i).unwrap_or(&0)).collect()
}

/// Indices of the option(s) with the highest vote count; empty if no
/// votes were cast. Multiple indices are returned on a tie.
pub fn winning_indices(tallies: &[i64]) -> Vec<usize> {
    let Some(&max) = tallies.iter().max() else { return Vec::new() };
    if max == 0 {
        return Vec::new();
    }
    tallies.iter().enumerate().filter(|(_, &c)| c == max).map(|(i, _)| i).collect()
}

pub fn render_poll_embed(poll: &Poll, vote_counts: &[(i64, i64)], now: DateTime<Utc>) -> ChatEmbed {
    let tallies = tally(poll.options.len(), vote_counts);
    let total: i64 = tallies.iter().sum();
    let winners = if poll.status == PollStatus::Closed { winning_indices(&tallies) } else { Vec::new() };

    let mut embed = ChatEmbed {
        title: format!("{} {}", status_emoji(poll.status), poll.name),
        description: poll.question.clone(),
        color: Some(status_color(poll.status)),
        fields: Vec::new(),
        footer: Some(footer_text(poll, total)),
    };

    for (i, option) in poll.options.iter().enumerate() {
        let count = tallies[i];
        let fraction = if total > 0 { count as f64 / total as f64 } else { 0.0 };
        let pct = fraction * 100.0;
        let emoji = poll.emojis.get(i).map(String::as_str).unwrap_or("\u{1F518}");
        let marker = if winners.contains(&i) { " \u{1F451}" } else { "" };
        let name = format!("{emoji} {option}{marker}");
        let value = format!("{} {count} vote{} ({pct:.1}%)", progress_bar(fraction), plural(count));
        embed = embed.field(name, value, false);
    }

    match poll.status {
        PollStatus::Scheduled => {
            embed = embed.field("Opens", format_for_user(poll.open_time, &poll.timezone, now), true);
            embed = embed.field("Closes", format_for_user(poll.close_time, &poll.timezone, now), true);
        }
        PollStatus::Active => {
            embed = embed.field("Closes", format_for_user(poll.close_time, &poll.timezone, now), true);
        }
        PollStatus::Closed => {
            embed = embed.field("Closed", format_for_user(poll.close_time, &poll.timezone, now), true);
        }
    }

    let mut badges = Vec::new();
    if poll.anonymous {
        badges.push("anonymous");
    }
    if poll.multiple_choice {
        badges.push("multi-select");
    }
    if !badges.is_empty() {
        embed = embed.field("Type", badges.join(", "), true);
    }

    embed
}

fn status_color(status: PollStatus) -> u32 {
    match status {
        PollStatus::Scheduled => 0x5865F2,
        PollStatus::Active => 0x57F287,
        PollStatus::Closed => 0x99AAB5,
    }
}

fn footer_text(poll: &Poll, total: i64) -> String {
    format!("Poll #{} \u{2022} {total} total vote{}", poll.id, plural(total))
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
