//! Timezone & time utilities (C1).
//!
//! The single most error-prone area per DESIGN.md: the database stores
//! UTC-naive timestamps; every boundary (web form, chat render, scheduler
//! trigger) explicitly localizes via the poll's zone. Nothing here ever
//! panics on bad input — unknown zones normalize to UTC.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{PollyError, Result};

/// Map common non-IANA aliases (US DST abbreviations, etc.) onto canonical
/// IANA zone names, grounded in `polly/utils.py`'s alias table.
fn alias_to_canonical(name: &str) -> Option<&'static str> {
    match name.trim().to_uppercase().as_str() {
        "EDT" | "EST" | "US/EASTERN" | "AMERICA/NEW_YORK" => Some("America/New_York"),
        "CDT" | "CST" | "US/CENTRAL" | "AMERICA/CHICAGO" => Some("America/Chicago"),
        "MDT" | "MST" | "US/MOUNTAIN" | "AMERICA/DENVER" => Some("America/Denver"),
        "PDT" | "PST" | "US/PACIFIC" | "AMERICA/LOS_ANGELES" => Some("America/Los_Angeles"),
        "GMT" | "UTC" => Some("UTC"),
        _ => None,
    }
}

/// Normalize a user-provided zone name to a canonical IANA name. Never
/// fails: unrecognized input becomes `"UTC"`.
pub fn normalize_zone(name: &str) -> String {
    if let Some(canonical) = alias_to_canonical(name) {
        return canonical.to_string();
    }
    match name.parse::<Tz>() {
        Ok(tz) => tz.name().to_string(),
        Err(_) => "UTC".to_string(),
    }
}

/// Resolve a canonical zone name to a `chrono_tz::Tz`, defaulting to UTC.
pub fn resolve_tz(name: &str) -> Tz {
    normalize_zone(name).parse::<Tz>().unwrap_or(chrono_tz::UTC)
}

/// Parse an HTML `datetime-local` string (`YYYY-MM-DDTHH:MM[:SS]`), naive,
/// interpreted as wall-clock in `zone`, and converted to UTC.
///
/// DST-ambiguous instants (fall-back) resolve to the earlier (standard
/// time) offset. DST-nonexistent instants (spring-forward) round forward
/// to the first valid instant after the gap.
pub fn parse_wallclock(input: &str, zone: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| PollyError::validation(format!("invalid datetime '{input}': {e}")))?;

    let tz = resolve_tz(zone);
    let localized = match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(earliest, _latest) => earliest,
        chrono::LocalResult::None => {
            // Spring-forward gap: step forward minute by minute (bounded) to
            // find the first valid local instant.
            let mut probe = naive;
            let mut found = None;
            for _ in 0..180 {
                probe += ChronoDuration::minutes(1);
                if let chrono::LocalResult::Single(dt) = tz.from_local_datetime(&probe) {
                    found = Some(dt);
                    break;
                }
            }
            found.ok_or_else(|| {
                PollyError::validation("could not resolve local time across DST gap".to_string())
            })?
        }
    };

    Ok(localized.with_timezone(&Utc))
}

/// Format a UTC instant for display in the viewer's zone, matching
/// `polly/utils.py`'s relative-day rendering.
pub fn format_for_user(instant: DateTime<Utc>, zone: &str, now: DateTime<Utc>) -> String {
    let tz = resolve_tz(zone);
    let local = instant.with_timezone(&tz);
    let local_now = now.with_timezone(&tz);

    let time_part = local.format("%-I:%M %p").to_string();

    if local.date_naive() == local_now.date_naive() {
        format!("Today at {time_part}")
    } else if local.date_naive() == local_now.date_naive() + ChronoDuration::days(1) {
        format!("Tomorrow at {time_part}")
    } else {
        format!("{} {time_part}", local.format("%b %-d,"))
    }
}

/// Human `"in 5 minutes"` / `"in 2 hours"` style countdown, used by
/// dashboard listings (`polly/utils.py::get_time_remaining`).
pub fn format_duration_until(instant: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = instant - now;
    if delta <= ChronoDuration::zero() {
        return "now".to_string();
    }
    let secs = delta.num_seconds();
    if secs < 60 {
        format!("in {secs}s")
    } else if secs < 3600 {
        format!("in {}m", secs / 60)
    } else if secs < 86_400 {
        format!("in {}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("in {}d", secs / 86_400)
    }
}

/// Validate a poll's scheduled window: close must be after open, and
/// open must not be in the past unless the poll opens immediately.
pub fn validate_scheduled(
    open: DateTime<Utc>,
    close: DateTime<Utc>,
    now: DateTime<Utc>,
    open_immediately: bool,
) -> Result<()> {
    if close <= open {
        return Err(PollyError::TimeOrder);
    }
    if !open_immediately && open < now + ChronoDuration::minutes(1) {
        return Err(PollyError::PastOpen);
    }
    Ok(())
}
