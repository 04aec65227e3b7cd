//! Schedule evaluation
//!
//! Pure, side-effect-free computation of a job's next eligible run time.
//! Cron expressions use the standard 5-field form (minute, hour,
//! day-of-month, month, day-of-week) and are validated and normalized at
//! job creation; the worker only ever re-evaluates expressions that passed
//! validation, so evaluation itself never fails.
//!
//! Normalization bridges two gaps between standard cron and the `cron`
//! crate: the crate expects a leading seconds field, and it numbers days
//! of the week in Quartz style. Numeric day-of-week tokens are therefore
//! rewritten to unambiguous day names (0 and 7 both mean Sunday).

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ScheduleParseError;
use crate::models::ScheduleKind;

const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Inclusive numeric bounds for the five standard cron fields.
const FIELD_RANGES: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 7)];

/// A validated, normalized recurring schedule.
///
/// When both day-of-month and day-of-week are restricted, standard cron
/// fires when *either* matches. The `cron` crate intersects the two, so
/// this holds one relaxed variant per restricted field and takes the
/// earliest upcoming instant across them.
#[derive(Debug, Clone)]
pub struct CronSpec {
    normalized: String,
    schedules: Vec<cron::Schedule>,
}

impl CronSpec {
    /// Parse and normalize a 5-field cron expression.
    pub fn parse(expr: &str) -> Result<Self, ScheduleParseError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(ScheduleParseError::FieldCount {
                expr: expr.to_string(),
                count: parts.len(),
            });
        }

        for (i, part) in parts.iter().enumerate() {
            let (min, max) = FIELD_RANGES[i];
            validate_field(part, min, max).map_err(|reason| ScheduleParseError::InvalidField {
                index: i + 1,
                field: (*part).to_string(),
                reason,
            })?;
        }

        let dow = map_dow_field(parts[4]).map_err(|reason| ScheduleParseError::InvalidField {
            index: 5,
            field: parts[4].to_string(),
            reason,
        })?;

        let normalized = format!("0 {} {} {} {} {}", parts[0], parts[1], parts[2], parts[3], dow);

        let dom_restricted = is_restricted(parts[2]);
        let dow_restricted = is_restricted(parts[4]);

        let variants: Vec<String> = if dom_restricted && dow_restricted {
            vec![
                format!("0 {} {} * {} {}", parts[0], parts[1], parts[3], dow),
                format!("0 {} {} {} {} *", parts[0], parts[1], parts[2], parts[3]),
            ]
        } else {
            vec![normalized.clone()]
        };

        let mut schedules = Vec::with_capacity(variants.len());
        for variant in &variants {
            let schedule =
                cron::Schedule::from_str(variant).map_err(|source| ScheduleParseError::Unparsable {
                    expr: expr.to_string(),
                    source,
                })?;
            schedules.push(schedule);
        }

        Ok(Self {
            normalized,
            schedules,
        })
    }

    /// The normalized 6-field expression (seconds prepended, day names
    /// substituted for day-of-week numbers).
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Earliest matching instant strictly after `after`, in UTC.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }
}

/// A job's schedule, decoded from its persisted fields.
#[derive(Debug, Clone)]
pub enum Schedule {
    Immediate,
    Delayed { run_at: DateTime<Utc> },
    Recurring { cron: CronSpec },
}

impl Schedule {
    /// Build the schedule for a job from its stored attributes, enforcing
    /// that exactly one of run_at / cron expression is meaningful for the
    /// schedule kind.
    pub fn for_job(
        kind: ScheduleKind,
        run_at: Option<DateTime<Utc>>,
        cron_expr: Option<&str>,
    ) -> Result<Self, ScheduleParseError> {
        match kind {
            ScheduleKind::Immediate => {
                reject_extraneous(kind, run_at.is_some(), "run_at")?;
                reject_extraneous(kind, cron_expr.is_some(), "a cron expression")?;
                Ok(Schedule::Immediate)
            }
            ScheduleKind::Delayed => {
                reject_extraneous(kind, cron_expr.is_some(), "a cron expression")?;
                let run_at = run_at.ok_or(ScheduleParseError::MissingRunAt)?;
                Ok(Schedule::Delayed { run_at })
            }
            ScheduleKind::Recurring => {
                reject_extraneous(kind, run_at.is_some(), "run_at")?;
                let expr = cron_expr.ok_or(ScheduleParseError::MissingCron)?;
                Ok(Schedule::Recurring {
                    cron: CronSpec::parse(expr)?,
                })
            }
        }
    }
}

/// Compute a job's next eligible run time.
///
/// Deterministic and idempotent: the same (schedule, after) pair always
/// yields the same instant, which makes re-scheduling after a crash safe.
///
/// Immediate schedules fire at the reference time (they are scheduled once,
/// at creation); delayed schedules fire at their fixed run_at; recurring
/// schedules fire at the earliest cron match strictly after `after`. The
/// worker clears `next_run_at` for one-shot schedules after their single
/// execution.
pub fn compute_next_run(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Immediate => Some(after),
        Schedule::Delayed { run_at } => Some(*run_at),
        Schedule::Recurring { cron } => cron.next_after(after),
    }
}

/// Exactly one of run_at / cron expression is meaningful per kind; the
/// other must be absent so stored rows never carry dead scheduling state.
fn reject_extraneous(
    kind: ScheduleKind,
    present: bool,
    field: &'static str,
) -> Result<(), ScheduleParseError> {
    if present {
        return Err(ScheduleParseError::ExtraneousField {
            kind: kind.as_str(),
            field,
        });
    }
    Ok(())
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// Structural check for one cron field within [min, max]. Named tokens
/// (months, weekdays) are left for the cron parser to judge.
fn validate_field(field: &str, min: u32, max: u32) -> Result<(), String> {
    if field == "*" || field == "?" {
        return Ok(());
    }

    let range_part = match field.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("step '{step}' is not numeric"))?;
            if step == 0 {
                return Err("step must be greater than zero".to_string());
            }
            range
        }
        None => field,
    };

    for part in range_part.split(',') {
        if part == "*" {
            continue;
        }
        if part.chars().all(|c| c.is_ascii_alphabetic()) {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            if lo.chars().all(|c| c.is_ascii_alphabetic())
                && hi.chars().all(|c| c.is_ascii_alphabetic())
            {
                continue;
            }
            let lo: u32 = lo.parse().map_err(|_| format!("'{lo}' is not numeric"))?;
            let hi: u32 = hi.parse().map_err(|_| format!("'{hi}' is not numeric"))?;
            if lo > hi || lo < min || hi > max {
                return Err(format!("range {lo}-{hi} out of [{min}, {max}]"));
            }
        } else {
            let value: u32 = part.parse().map_err(|_| format!("'{part}' is not numeric"))?;
            if value < min || value > max {
                return Err(format!("value {value} out of [{min}, {max}]"));
            }
        }
    }

    Ok(())
}

/// Rewrite numeric day-of-week tokens (standard cron 0-7, both 0 and 7
/// meaning Sunday) to day names the cron parser reads unambiguously.
fn map_dow_field(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let (range_part, step) = match field.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (field, None),
    };

    let mapped: Result<Vec<String>, String> = range_part
        .split(',')
        .map(|part| {
            if part == "*" {
                return Ok(part.to_string());
            }
            match part.split_once('-') {
                Some((lo, hi)) => Ok(format!("{}-{}", map_dow_token(lo)?, map_dow_token(hi)?)),
                None => map_dow_token(part),
            }
        })
        .collect();

    let mut result = mapped?.join(",");
    if let Some(step) = step {
        result = format!("{result}/{step}");
    }
    Ok(result)
}

fn map_dow_token(token: &str) -> Result<String, String> {
    if token.chars().all(|c| c.is_ascii_digit()) {
        let value: u32 = token
            .parse()
            .map_err(|_| format!("'{token}' is not numeric"))?;
        if value > 7 {
            return Err(format!("day-of-week value {value} out of [0, 7]"));
        }
        Ok(DOW_NAMES[(value % 7) as usize].to_string())
    } else {
        Ok(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn weekday_morning_cron_fires_same_day() {
        // 2026-01-05 is a Monday.
        let cron = CronSpec::parse("0 8 * * 1-5").unwrap();
        let next = cron.next_after(utc(2026, 1, 5, 7, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 5, 8, 0));
    }

    #[test]
    fn weekday_cron_skips_weekend() {
        // Friday 09:00 is past that day's fire time; Saturday and Sunday
        // are excluded, so the next fire is Monday.
        let cron = CronSpec::parse("0 8 * * 1-5").unwrap();
        let next = cron.next_after(utc(2026, 1, 9, 9, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 12, 8, 0));
    }

    #[test]
    fn next_run_is_strictly_after_reference() {
        let cron = CronSpec::parse("0 8 * * 1-5").unwrap();
        let next = cron.next_after(utc(2026, 1, 5, 8, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 6, 8, 0));
    }

    #[test]
    fn computation_is_deterministic() {
        let schedule = Schedule::for_job(ScheduleKind::Recurring, None, Some("*/15 * * * *"))
            .unwrap();
        let after = utc(2026, 3, 14, 1, 59);
        assert_eq!(
            compute_next_run(&schedule, after),
            compute_next_run(&schedule, after)
        );
    }

    #[test]
    fn sunday_accepts_both_zero_and_seven() {
        let zero = CronSpec::parse("30 6 * * 0").unwrap();
        let seven = CronSpec::parse("30 6 * * 7").unwrap();
        let after = utc(2026, 1, 5, 0, 0);
        let expected = utc(2026, 1, 11, 6, 30);
        assert_eq!(zero.next_after(after).unwrap(), expected);
        assert_eq!(seven.next_after(after).unwrap(), expected);
    }

    #[test]
    fn restricted_dom_and_dow_fire_on_either() {
        // "At midnight on the 13th, or on Fridays" fires on the first
        // Friday, not only on a Friday the 13th.
        let cron = CronSpec::parse("0 0 13 * 5").unwrap();
        let next = cron.next_after(utc(2026, 1, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 2, 0, 0));

        // After that Friday, the 9th (Friday) beats the 13th (Tuesday).
        let next = cron.next_after(utc(2026, 1, 2, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 9, 0, 0));
    }

    #[test]
    fn dom_alone_still_restricts() {
        let cron = CronSpec::parse("0 0 13 * *").unwrap();
        let next = cron.next_after(utc(2026, 1, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 1, 13, 0, 0));
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = CronSpec::parse("* * * *").unwrap_err();
        assert!(matches!(err, ScheduleParseError::FieldCount { count: 4, .. }));
    }

    #[test]
    fn rejects_out_of_range_minute() {
        let err = CronSpec::parse("99 * * * *").unwrap_err();
        assert!(matches!(err, ScheduleParseError::InvalidField { index: 1, .. }));
    }

    #[test]
    fn rejects_out_of_range_day_of_week() {
        let err = CronSpec::parse("* * * * 9").unwrap_err();
        assert!(matches!(err, ScheduleParseError::InvalidField { index: 5, .. }));
    }

    #[test]
    fn rejects_zero_step() {
        let err = CronSpec::parse("*/0 * * * *").unwrap_err();
        assert!(matches!(err, ScheduleParseError::InvalidField { index: 1, .. }));
    }

    #[test]
    fn delayed_schedule_returns_fixed_run_at() {
        let run_at = utc(2026, 2, 1, 12, 0);
        let schedule = Schedule::for_job(ScheduleKind::Delayed, Some(run_at), None).unwrap();
        // A run_at in the past is still returned; the worker decides
        // whether the job has already fired.
        assert_eq!(
            compute_next_run(&schedule, utc(2026, 3, 1, 0, 0)),
            Some(run_at)
        );
    }

    #[test]
    fn immediate_schedule_fires_at_reference_time() {
        let now = utc(2026, 2, 1, 12, 0);
        let schedule = Schedule::for_job(ScheduleKind::Immediate, None, None).unwrap();
        assert_eq!(compute_next_run(&schedule, now), Some(now));
    }

    #[test]
    fn delayed_without_run_at_is_rejected() {
        let err = Schedule::for_job(ScheduleKind::Delayed, None, None).unwrap_err();
        assert!(matches!(err, ScheduleParseError::MissingRunAt));
    }

    #[test]
    fn recurring_without_cron_is_rejected() {
        let err = Schedule::for_job(ScheduleKind::Recurring, None, None).unwrap_err();
        assert!(matches!(err, ScheduleParseError::MissingCron));
    }

    #[test]
    fn recurring_with_run_at_is_rejected() {
        let err = Schedule::for_job(
            ScheduleKind::Recurring,
            Some(utc(2026, 2, 1, 12, 0)),
            Some("*/5 * * * *"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScheduleParseError::ExtraneousField { field: "run_at", .. }
        ));
    }

    #[test]
    fn delayed_with_cron_is_rejected() {
        let err = Schedule::for_job(
            ScheduleKind::Delayed,
            Some(utc(2026, 2, 1, 12, 0)),
            Some("*/5 * * * *"),
        )
        .unwrap_err();
        assert!(matches!(err, ScheduleParseError::ExtraneousField { .. }));
    }

    #[test]
    fn immediate_with_schedule_fields_is_rejected() {
        let with_run_at =
            Schedule::for_job(ScheduleKind::Immediate, Some(utc(2026, 2, 1, 12, 0)), None);
        assert!(matches!(
            with_run_at,
            Err(ScheduleParseError::ExtraneousField { .. })
        ));

        let with_cron = Schedule::for_job(ScheduleKind::Immediate, None, Some("* * * * *"));
        assert!(matches!(
            with_cron,
            Err(ScheduleParseError::ExtraneousField { .. })
        ));
    }

    #[test]
    fn named_days_pass_through() {
        let cron = CronSpec::parse("0 8 * * mon-fri").unwrap();
        let next = cron.next_after(utc(2026, 1, 10, 0, 0)).unwrap();
        // 2026-01-10 is a Saturday.
        assert_eq!(next, utc(2026, 1, 12, 8, 0));
    }
}
