//! Free-text medication schedule parsing.
//!
//! Converts schedule text from an intake form (or OCR extraction) into
//! concrete future occurrence instants. Three forms are recognized:
//!
//! - explicit clock times: `"08:00"`, `"08:00,14:00,20:00"`
//! - fixed intervals: `"every 8 hours"`, `"every 45 minutes"`
//! - daily recurrence: `"once daily at 08:00"`
//!
//! Occurrences are resolved in the user's time zone and returned as UTC
//! instants. A clock time already past today rolls to tomorrow.

use crate::error::EngineError;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// How far ahead interval schedules are expanded.
pub const PLANNING_HORIZON: Duration = Duration::hours(24);

/// Hard cap on occurrences from a single parse, whatever the interval.
const MAX_OCCURRENCES: usize = 64;

/// A recognized schedule shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleForm {
    /// One or more explicit clock times per day
    ClockTimes(Vec<NaiveTime>),
    /// A fixed interval starting from upload time
    Interval(Duration),
    /// One clock time, recurring daily
    DailyAt(NaiveTime),
}

/// Parse schedule text into a schedule form.
pub fn parse_schedule_text(text: &str) -> Result<ScheduleForm, EngineError> {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(EngineError::ScheduleParse("empty schedule".to_string()));
    }

    if let Some(rest) = normalized
        .strip_prefix("once daily at ")
        .or_else(|| normalized.strip_prefix("daily at "))
        .or_else(|| normalized.strip_prefix("every day at "))
    {
        let time = parse_clock(rest.trim())
            .ok_or_else(|| EngineError::ScheduleParse(text.to_string()))?;
        return Ok(ScheduleForm::DailyAt(time));
    }

    if let Some(rest) = normalized.strip_prefix("every ") {
        return parse_interval(rest).ok_or_else(|| EngineError::ScheduleParse(text.to_string()));
    }

    // comma-separated clock times
    let mut times = Vec::new();
    for part in normalized.split(',') {
        match parse_clock(part.trim()) {
            Some(t) => times.push(t),
            None => return Err(EngineError::ScheduleParse(text.to_string())),
        }
    }
    times.sort();
    times.dedup();
    Ok(ScheduleForm::ClockTimes(times))
}

/// Parse `"N hours"` / `"N minutes"` (singular and common abbreviations).
fn parse_interval(rest: &str) -> Option<ScheduleForm> {
    let mut parts = rest.split_whitespace();
    let n: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() || n <= 0 {
        return None;
    }

    let interval = match unit {
        "hour" | "hours" | "hr" | "hrs" => Duration::hours(n),
        "minute" | "minutes" | "min" | "mins" => Duration::minutes(n),
        _ => return None,
    };
    if interval > PLANNING_HORIZON {
        return None;
    }
    Some(ScheduleForm::Interval(interval))
}

/// Parse an `HH:MM` clock time.
fn parse_clock(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Expand a schedule form into future occurrence instants.
///
/// Clock times resolve to their next occurrence in `tz`; interval forms
/// expand from `now` out to the planning horizon.
pub fn occurrences(form: &ScheduleForm, now: DateTime<Utc>, tz: Tz) -> Vec<DateTime<Utc>> {
    let mut result = match form {
        ScheduleForm::ClockTimes(times) => times
            .iter()
            .filter_map(|t| next_occurrence(*t, now, tz))
            .collect::<Vec<_>>(),
        ScheduleForm::DailyAt(time) => next_occurrence(*time, now, tz).into_iter().collect(),
        ScheduleForm::Interval(interval) => {
            let mut out = Vec::new();
            let mut at = now + *interval;
            while at <= now + PLANNING_HORIZON && out.len() < MAX_OCCURRENCES {
                out.push(at);
                at += *interval;
            }
            out
        }
    };
    result.sort();
    result
}

/// Parse and expand in one step.
pub fn parse_occurrences(
    text: &str,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<Vec<DateTime<Utc>>, EngineError> {
    let form = parse_schedule_text(text)?;
    Ok(occurrences(&form, now, tz))
}

/// Next instant at which the local clock reads `time`, strictly after `now`.
fn next_occurrence(time: NaiveTime, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();

    for _ in 0..3 {
        // earliest() handles DST-ambiguous times; a nonexistent time
        // (spring-forward gap) yields None and we try the next day
        if let Some(candidate) = tz
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
        {
            if candidate > now {
                return Some(candidate);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::UTC;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_clock_list() {
        let form = parse_schedule_text("08:00,14:00,20:00").unwrap();
        match form {
            ScheduleForm::ClockTimes(times) => {
                assert_eq!(times.len(), 3);
                assert_eq!(times[0], NaiveTime::from_hms_opt(8, 0, 0).unwrap());
            }
            other => panic!("unexpected form: {other:?}"),
        }
    }

    #[test]
    fn test_parse_daily() {
        let form = parse_schedule_text("once daily at 08:00").unwrap();
        assert_eq!(
            form,
            ScheduleForm::DailyAt(NaiveTime::from_hms_opt(8, 0, 0).unwrap())
        );
        assert_eq!(
            parse_schedule_text("Daily at 21:30").unwrap(),
            ScheduleForm::DailyAt(NaiveTime::from_hms_opt(21, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(
            parse_schedule_text("every 8 hours").unwrap(),
            ScheduleForm::Interval(Duration::hours(8))
        );
        assert_eq!(
            parse_schedule_text("every 45 minutes").unwrap(),
            ScheduleForm::Interval(Duration::minutes(45))
        );
    }

    #[test]
    fn test_parse_rejects_gibberish() {
        for text in [
            "whenever I feel like it",
            "every blue moon",
            "every 0 hours",
            "25:99",
            "",
        ] {
            let err = parse_schedule_text(text).unwrap_err();
            assert!(matches!(err, EngineError::ScheduleParse(_)), "{text}");
        }
    }

    #[test]
    fn test_clock_occurrences_roll_forward() {
        // 10:00 UTC: 08:00 already passed, 20:00 has not
        let now = at("2026-05-01T10:00:00Z");
        let occ = parse_occurrences("08:00,20:00", now, UTC).unwrap();
        assert_eq!(occ.len(), 2);
        assert_eq!(occ[0], at("2026-05-01T20:00:00Z"));
        assert_eq!(occ[1], at("2026-05-02T08:00:00Z"));
    }

    #[test]
    fn test_interval_occurrences_within_horizon() {
        let now = at("2026-05-01T10:00:00Z");
        let occ = parse_occurrences("every 8 hours", now, UTC).unwrap();
        assert_eq!(occ.len(), 3);
        assert_eq!(occ[0], at("2026-05-01T18:00:00Z"));
        assert_eq!(occ[2], at("2026-05-02T10:00:00Z"));
    }

    #[test]
    fn test_minute_interval_is_capped() {
        let now = at("2026-05-01T10:00:00Z");
        let occ = parse_occurrences("every 5 minutes", now, UTC).unwrap();
        assert_eq!(occ.len(), 64);
    }

    #[test]
    fn test_occurrences_respect_zone() {
        // 08:00 in Los Angeles is 15:00 UTC during PDT
        let now = at("2026-05-01T10:00:00Z");
        let occ = parse_occurrences("08:00", now, chrono_tz::America::Los_Angeles).unwrap();
        assert_eq!(occ, vec![at("2026-05-01T15:00:00Z")]);
    }

    #[test]
    fn test_duplicate_times_deduped() {
        let now = at("2026-05-01T00:00:00Z");
        let occ = parse_occurrences("08:00,08:00", now, UTC).unwrap();
        assert_eq!(occ.len(), 1);
    }
}
