//! HTTP entry points (C16). This is the only layer allowed to speak
//! JSON/HTML; every handler delegates to the core crate's services
//! after light request parsing. The poll engine itself is reachable
//! from the chat gateway without ever touching this module — these
//! routes exist so the dashboard and the reaction webhooks have a
//! boundary to call into.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tera::Context;

use polly_core::db::models::PollStatus;
use polly_core::db::{polls, votes};
use polly_core::poll::state_machine::OpenReason;
use polly_core::render::{tally, winning_indices};
use polly_core::services::opening;
use polly_core::time::{format_for_user, parse_wallclock, validate_scheduled};
use polly_core::{PollyError, Result};

use super::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/polls", post(create_poll))
        .route("/polls/:id", get(get_poll))
        .route("/polls/:id/reopen", post(reopen_poll))
        .route("/poll/:id/static", get(static_archive))
        .route("/discord/reaction-add", post(reaction_add))
        .route("/discord/reaction-remove", post(reaction_remove))
        .route("/admin/recovery-report", get(recovery_report))
        .with_state(state)
}

struct ApiError(PollyError);

impl From<PollyError> for ApiError {
    fn from(e: PollyError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PollyError::Validation { .. } | PollyError::TimeOrder | PollyError::PastOpen => StatusCode::BAD_REQUEST,
            PollyError::PollNotFound(_) | PollyError::MessageNotFound => StatusCode::NOT_FOUND,
            PollyError::Permission { .. } => StatusCode::FORBIDDEN,
            PollyError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            PollyError::MaxChoicesReached => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.user_message() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct CreatePollRequest {
    name: String,
    question: String,
    options: Vec<String>,
    emojis: Vec<String>,
    image_path: Option<String>,
    image_caption: Option<String>,
    server_id: String,
    server_name: Option<String>,
    channel_id: String,
    channel_name: Option<String>,
    creator_id: String,
    open_time_local: String,
    close_time_local: String,
    timezone: String,
    anonymous: bool,
    multiple_choice: bool,
    max_choices: Option<i64>,
    open_immediately: bool,
}

#[derive(Serialize)]
struct CreatePollResponse {
    id: i64,
    status: String,
}

async fn create_poll(
    State(state): State<AppState>,
    Json(req): Json<CreatePollRequest>,
) -> std::result::Result<Json<CreatePollResponse>, ApiError> {
    let open_time = parse_wallclock(&req.open_time_local, &req.timezone)?;
    let close_time = parse_wallclock(&req.close_time_local, &req.timezone)?;
    validate_scheduled(open_time, close_time, chrono::Utc::now(), req.open_immediately)?;

    let new_poll = polls::NewPoll {
        name: req.name,
        question: req.question,
        options: req.options,
        emojis: req.emojis,
        image_path: req.image_path,
        image_caption: req.image_caption,
        server_id: req.server_id,
        server_name: req.server_name,
        channel_id: req.channel_id,
        channel_name: req.channel_name,
        creator_id: req.creator_id,
        open_time,
        close_time,
        timezone: req.timezone,
        anonymous: req.anonymous,
        multiple_choice: req.multiple_choice,
        max_choices: req.max_choices,
        open_immediately: req.open_immediately,
        role_ping: Default::default(),
    };

    let poll = polls::create(&state.service.pool, new_poll).await?;
    if let Err(message) = poll.check_invariants() {
        polls::delete_cascade(&state.service.pool, poll.id).await?;
        return Err(ApiError(PollyError::validation(message)));
    }

    if poll.open_immediately {
        opening::open(&state.service.opening_ctx(), poll.id, OpenReason::Immediate).await?;
    } else {
        state.service.scheduler.schedule_open(poll.id, poll.open_time).await;
    }

    let stored = polls::get(&state.service.pool, poll.id).await?.ok_or(PollyError::PollNotFound(poll.id))?;
    Ok(Json(CreatePollResponse { id: stored.id, status: stored.status.as_str().to_string() }))
}

async fn get_poll(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> std::result::Result<Html<String>, ApiError> {
    let poll = polls::get(&state.service.pool, id).await?.ok_or(PollyError::PollNotFound(id))?;
    let counts = votes::count_by_option(&state.service.pool, id).await?;
    Ok(Html(render_dashboard(&state, &poll, &counts)?))
}

fn render_dashboard(
    state: &AppState,
    poll: &polly_core::db::models::Poll,
    counts: &[(i64, i64)],
) -> Result<String> {
    let tallies = tally(poll.options.len(), counts);
    let total: i64 = tallies.iter().sum();
    let winners = if poll.status == PollStatus::Closed { winning_indices(&tallies) } else { Vec::new() };

    #[derive(Serialize)]
    struct OptionRow {
        label: String,
        emoji: String,
        votes: i64,
        percent: f64,
        is_winner: bool,
    }

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

    let (status_color, timing_label, timing_value) = match poll.status {
        PollStatus::Scheduled => ("#5865F2", "opens", format_for_user(poll.open_time, &poll.timezone, chrono::Utc::now())),
        PollStatus::Active => ("#57F287", "closes", format_for_user(poll.close_time, &poll.timezone, chrono::Utc::now())),
        PollStatus::Closed => ("#99AAB5", "closed", format_for_user(poll.close_time, &poll.timezone, chrono::Utc::now())),
    };

    let mut ctx = Context::new();
    ctx.insert("poll_name", &poll.name);
    ctx.insert("question", &poll.question);
    ctx.insert("status", poll.status.as_str());
    ctx.insert("status_color", status_color);
    ctx.insert("options", &options);
    ctx.insert("total_votes", &total);
    ctx.insert("timing_label", timing_label);
    ctx.insert("timing_value", &timing_value);

    Ok(state.templates.render("poll_dashboard.html", &ctx)?)
}

#[derive(Deserialize)]
struct ReopenRequest {
    new_close_time_local: String,
}

#[derive(Serialize)]
struct ReopenResponse {
    new_close_time: chrono::DateTime<chrono::Utc>,
}

async fn reopen_poll(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ReopenRequest>,
) -> std::result::Result<Json<ReopenResponse>, ApiError> {
    let poll = polls::get(&state.service.pool, id).await?.ok_or(PollyError::PollNotFound(id))?;
    let new_close_time = parse_wallclock(&req.new_close_time_local, &poll.timezone)?;
    let outcome = state.service.reopen_poll(id, new_close_time).await?;
    Ok(Json(ReopenResponse { new_close_time: outcome.new_close_time }))
}

async fn static_archive(State(state): State<AppState>, Path(id): Path<i64>) -> std::result::Result<Html<String>, ApiError> {
    if let Some(html) = state.service.archive.read_if_present(id).await? {
        return Ok(Html(html));
    }
    let poll = polls::get(&state.service.pool, id).await?.ok_or(PollyError::PollNotFound(id))?;
    let counts = votes::count_by_option(&state.service.pool, id).await?;
    Ok(Html(render_dashboard(&state, &poll, &counts)?))
}

#[derive(Deserialize)]
struct ReactionEvent {
    poll_id: i64,
    user_id: String,
    emoji: String,
}

async fn reaction_add(
    State(state): State<AppState>,
    Json(event): Json<ReactionEvent>,
) -> std::result::Result<StatusCode, ApiError> {
    let poll = polls::get(&state.service.pool, event.poll_id).await?.ok_or(PollyError::PollNotFound(event.poll_id))?;
    let Some(option_index) = poll.emojis.iter().position(|e| e == &event.emoji) else {
        return Ok(StatusCode::NO_CONTENT);
    };

    let outcome = polly_core::vote_engine::collect_vote(&state.service.pool, poll.id, &event.user_id, option_index as i64).await?;

    if let (Some(message_id), true) = (
        &poll.message_id,
        polly_core::vote_engine::should_remove_reaction(&outcome, poll.anonymous, poll.multiple_choice),
    ) {
        let _ = state.service.chat.remove_reaction(&poll.channel_id, message_id, &event.emoji, &event.user_id).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Only acts when the user's reaction removal should retract an
/// existing ballot rather than one the bot itself already stripped
/// (see `vote_engine::should_remove_reaction`) — a redundant event
/// here is a no-op, not an error.
async fn reaction_remove(
    State(state): State<AppState>,
    Json(event): Json<ReactionEvent>,
) -> std::result::Result<StatusCode, ApiError> {
    let poll = polls::get(&state.service.pool, event.poll_id).await?.ok_or(PollyError::PollNotFound(event.poll_id))?;
    if poll.status != PollStatus::Active {
        return Ok(StatusCode::NO_CONTENT);
    }
    let Some(option_index) = poll.emojis.iter().position(|e| e == &event.emoji) else {
        return Ok(StatusCode::NO_CONTENT);
    };

    let existing = votes::for_poll_and_user(&state.service.pool, poll.id, &event.user_id).await?;
    if let Some(vote) = existing.into_iter().find(|v| v.option_index == option_index as i64) {
        votes::delete(&state.service.pool, vote.id).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct RecoveryReportResponse {
    scheduled_opened: usize,
    scheduled_rescheduled: usize,
    active_closed: usize,
    active_rescheduled: usize,
    messages_repaired: usize,
    existence_audit_deleted: usize,
    archives_backfilled: usize,
    duration_ms: u128,
    confidence: f64,
}

async fn recovery_report(State(state): State<AppState>) -> Json<RecoveryReportResponse> {
    let report = state.service.run_recovery(polly_core::recovery::RecoveryDelays::default()).await;
    Json(RecoveryReportResponse {
        scheduled_opened: report.scheduled_opened,
        scheduled_rescheduled: report.scheduled_rescheduled,
        active_closed: report.active_closed,
        active_rescheduled: report.active_rescheduled,
        messages_repaired: report.messages_repaired,
        existence_audit_deleted: report.existence_audit_deleted,
        archives_backfilled: report.archives_backfilled,
        duration_ms: report.duration.as_millis(),
        confidence: report.confidence,
    })
}
