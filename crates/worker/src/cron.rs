//! Simplified cron stepper
//!
//! Computes the next fire time for a 5-field expression
//! (minute hour day-of-month month day-of-week) in the job's timezone.
//!
//! Deliberately simplified: each field is either `*` or a single value. The
//! concrete minute/hour are applied to the current instant with seconds
//! zeroed; if the result is not strictly in the future, the time advances by
//! the coarsest constrained field (hourly when hour is `*`, else weekly when
//! day-of-week is constrained, else monthly when day-of-month is
//! constrained, else daily). Lists, ranges, steps, and combined
//! day-of-month/day-of-week constraints are not interpreted; `validate`
//! rejects them up front. A malformed expression falls back to one hour
//! from now.

use chrono::{DateTime, Duration, Months, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Next fire time for the expression, evaluated at `now`.
pub fn next_fire(expression: &str, timezone: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    match compute(expression, timezone, now) {
        Some(next) => next,
        None => {
            warn!(
                expression,
                "Malformed cron expression; defaulting to one hour from now"
            );
            now + Duration::hours(1)
        }
    }
}

fn compute(expression: &str, timezone: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return None;
    }
    let (minute, hour, day_of_month, _month, day_of_week) =
        (parts[0], parts[1], parts[2], parts[3], parts[4]);

    let tz: Tz = timezone.parse().unwrap_or_else(|_| {
        warn!(timezone, "Unknown timezone; falling back to UTC");
        chrono_tz::UTC
    });
    let local = now.with_timezone(&tz);
    let mut next = local;

    if minute != "*" {
        let value: u32 = minute.parse().ok().filter(|v| *v < 60)?;
        next = next.with_minute(value)?;
    }
    if hour != "*" {
        let value: u32 = hour.parse().ok().filter(|v| *v < 24)?;
        next = next.with_hour(value)?;
    }
    next = next.with_second(0)?.with_nanosecond(0)?;

    if next <= local {
        next = if hour == "*" {
            next + Duration::hours(1)
        } else if day_of_week != "*" {
            next + Duration::days(7)
        } else if day_of_month != "*" {
            next.checked_add_months(Months::new(1))?
        } else {
            next + Duration::days(1)
        };
    }

    Some(next.with_timezone(&Utc))
}

/// Validate an expression against the supported subset.
pub fn validate(expression: &str) -> Result<(), String> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(format!(
            "expected 5 fields (minute hour day-of-month month day-of-week), got {}",
            parts.len()
        ));
    }

    let fields: [(&str, u32, u32); 5] = [
        ("minute", 0, 59),
        ("hour", 0, 23),
        ("day-of-month", 1, 31),
        ("month", 1, 12),
        ("day-of-week", 0, 6),
    ];

    for ((name, min, max), value) in fields.iter().zip(parts.iter()) {
        if *value == "*" {
            continue;
        }
        let parsed: u32 = value.parse().map_err(|_| {
            format!(
                "{} field {:?} is not supported; use `*` or a single value",
                name, value
            )
        })?;
        if parsed < *min || parsed > *max {
            return Err(format!(
                "{} field {} is out of range {}..={}",
                name, parsed, min, max
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_before_the_slot_fires_same_day() {
        let now = utc(2026, 3, 10, 9, 0);
        let next = next_fire("30 9 * * *", "UTC", now);
        assert_eq!(next, utc(2026, 3, 10, 9, 30));
    }

    #[test]
    fn daily_after_the_slot_fires_next_day() {
        let now = utc(2026, 3, 10, 10, 0);
        let next = next_fire("30 9 * * *", "UTC", now);
        assert_eq!(next, utc(2026, 3, 11, 9, 30));
    }

    #[test]
    fn hourly_advances_by_one_hour() {
        let now = utc(2026, 3, 10, 10, 30);
        let next = next_fire("15 * * * *", "UTC", now);
        assert_eq!(next, utc(2026, 3, 10, 11, 15));
    }

    #[test]
    fn constrained_day_of_week_advances_weekly() {
        let now = utc(2026, 3, 10, 10, 0);
        let next = next_fire("0 9 * * 1", "UTC", now);
        assert_eq!(next, utc(2026, 3, 17, 9, 0));
    }

    #[test]
    fn constrained_day_of_month_advances_monthly() {
        let now = utc(2026, 3, 10, 10, 0);
        let next = next_fire("0 9 1 * *", "UTC", now);
        assert_eq!(next, utc(2026, 4, 10, 9, 0));
    }

    #[test]
    fn malformed_expression_defaults_to_one_hour() {
        let now = utc(2026, 3, 10, 10, 0);
        assert_eq!(next_fire("not a cron", "UTC", now), now + Duration::hours(1));
        assert_eq!(next_fire("* * *", "UTC", now), now + Duration::hours(1));
        assert_eq!(
            next_fire("99 9 * * *", "UTC", now),
            now + Duration::hours(1)
        );
    }

    #[test]
    fn honors_job_timezone() {
        // 2026-06-15 is EDT (UTC-4): 09:00 local is 13:00 UTC.
        let now = utc(2026, 6, 15, 13, 0);
        let next = next_fire("30 9 * * *", "America/New_York", now);
        assert_eq!(next, utc(2026, 6, 15, 13, 30));

        // Evaluated an hour later, the slot has passed locally.
        let now = utc(2026, 6, 15, 14, 0);
        let next = next_fire("30 9 * * *", "America/New_York", now);
        assert_eq!(next, utc(2026, 6, 16, 13, 30));
    }

    #[test]
    fn validate_accepts_supported_subset() {
        assert!(validate("30 9 * * *").is_ok());
        assert!(validate("* * * * *").is_ok());
        assert!(validate("0 3 1 * *").is_ok());
    }

    #[test]
    fn validate_rejects_lists_ranges_and_bad_values() {
        assert!(validate("30 9 * *").is_err());
        assert!(validate("0 9 * * 1-5").is_err());
        assert!(validate("*/5 * * * *").is_err());
        assert!(validate("60 9 * * *").is_err());
    }
}
