use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};
use thiserror::Error;

/// Canonical storage form for schedule datetimes. Lexical order matches
/// chronological order, so range filters can compare strings in SQL.
pub const STORED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("{0} must be an ISO datetime")]
    BadDateTime(&'static str),
    #[error("endsAt must be after startsAt")]
    EndNotAfterStart,
    #[error("recurrenceRule: {0}")]
    BadRule(String),
}

/// Accepts RFC 3339 (normalized to UTC) or a naive local datetime.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

pub fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format(STORED_FORMAT).to_string()
}

/// Date-only bounds cover the whole day.
fn parse_until(raw: &str) -> Option<NaiveDateTime> {
    if let Some(dt) = parse_datetime(raw) {
        return Some(dt);
    }
    let d = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?;
    Some(d.and_time(NaiveTime::from_hms_opt(23, 59, 59)?))
}

pub fn validate_span(
    starts_at: &str,
    ends_at: &str,
) -> Result<(NaiveDateTime, NaiveDateTime), ScheduleError> {
    let start = parse_datetime(starts_at).ok_or(ScheduleError::BadDateTime("startsAt"))?;
    let end = parse_datetime(ends_at).ok_or(ScheduleError::BadDateTime("endsAt"))?;
    if end <= start {
        return Err(ScheduleError::EndNotAfterStart);
    }
    Ok((start, end))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recurrence {
    Once,
    Weekly {
        /// 0 = Sunday .. 6 = Saturday, sorted and unique.
        days: Vec<u32>,
        interval: u32,
        until: Option<NaiveDateTime>,
    },
}

impl Recurrence {
    pub fn parse(raw: Option<&Value>, start: NaiveDateTime) -> Result<Self, ScheduleError> {
        let Some(v) = raw else {
            return Ok(Self::Once);
        };
        if v.is_null() {
            return Ok(Self::Once);
        }
        let obj = v
            .as_object()
            .ok_or_else(|| ScheduleError::BadRule("must be an object or null".into()))?;
        let kind = obj
            .get("type")
            .and_then(|t| t.as_str())
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "weekly".to_string());
        match kind.as_str() {
            "none" | "" => Ok(Self::Once),
            "weekly" => {
                let mut days: Vec<u32> = Vec::new();
                if let Some(raw_days) = obj.get("days").filter(|d| !d.is_null()) {
                    let arr = raw_days
                        .as_array()
                        .ok_or_else(|| ScheduleError::BadRule("days must be an array".into()))?;
                    for d in arr {
                        let n = d
                            .as_u64()
                            .filter(|n| *n <= 6)
                            .ok_or_else(|| {
                                ScheduleError::BadRule("days must be integers 0..=6".into())
                            })?;
                        days.push(n as u32);
                    }
                }
                if days.is_empty() {
                    days.push(start.weekday().num_days_from_sunday());
                }
                days.sort_unstable();
                days.dedup();

                let interval = match obj.get("interval").filter(|i| !i.is_null()) {
                    None => 1,
                    Some(i) => i
                        .as_u64()
                        .filter(|n| (1..=52).contains(n))
                        .ok_or_else(|| ScheduleError::BadRule("interval must be 1..=52".into()))?
                        as u32,
                };

                let until = match obj.get("until").filter(|u| !u.is_null()) {
                    None => None,
                    Some(u) => {
                        let s = u
                            .as_str()
                            .ok_or_else(|| ScheduleError::BadRule("until must be a string".into()))?;
                        let parsed = parse_until(s).ok_or_else(|| {
                            ScheduleError::BadRule("until must be a date or datetime".into())
                        })?;
                        if parsed < start {
                            return Err(ScheduleError::BadRule(
                                "until must not be before startsAt".into(),
                            ));
                        }
                        Some(parsed)
                    }
                };
                Ok(Self::Weekly {
                    days,
                    interval,
                    until,
                })
            }
            other => Err(ScheduleError::BadRule(format!(
                "unsupported type {} (expected weekly or none)",
                other
            ))),
        }
    }

    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Once => None,
            Self::Weekly {
                days,
                interval,
                until,
            } => Some(json!({
                "type": "weekly",
                "days": days,
                "interval": interval,
                "until": until.map(format_datetime),
            })),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Occurrence {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

fn week_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(d.weekday().num_days_from_sunday() as i64)
}

/// Occurrences overlapping `[from, to)`, in start order. The flag is set
/// when `limit` cut the list short.
pub fn expand(
    start: NaiveDateTime,
    end: NaiveDateTime,
    rule: &Recurrence,
    from: NaiveDateTime,
    to: NaiveDateTime,
    limit: usize,
) -> (Vec<Occurrence>, bool) {
    let overlaps = |s: NaiveDateTime, e: NaiveDateTime| s < to && e > from;
    match rule {
        Recurrence::Once => {
            if overlaps(start, end) && limit > 0 {
                (vec![Occurrence { start, end }], false)
            } else {
                (Vec::new(), false)
            }
        }
        Recurrence::Weekly {
            days,
            interval,
            until,
        } => {
            let duration = end - start;
            let mut out = Vec::new();
            let first = std::cmp::max(start.date(), (from - duration).date());
            let mut last = to.date();
            if let Some(u) = until {
                last = std::cmp::min(last, u.date());
            }
            if first > last {
                return (out, false);
            }
            // Jump straight to the first active week at or after `first`.
            let base_week = week_start(start.date());
            let step = *interval as i64;
            let offset = (week_start(first) - base_week).num_days() / 7;
            let skip = (offset + step - 1) / step * step;
            let mut week = base_week + Duration::weeks(skip);
            while week <= last {
                for day in days {
                    let Some(d) = week.checked_add_signed(Duration::days(*day as i64)) else {
                        return (out, false);
                    };
                    if d < first {
                        continue;
                    }
                    if d > last {
                        return (out, false);
                    }
                    let occ_start = d.and_time(start.time());
                    let occ_end = occ_start + duration;
                    let within_until = until.map(|u| occ_start <= u).unwrap_or(true);
                    if occ_start >= start && within_until && overlaps(occ_start, occ_end) {
                        if out.len() >= limit {
                            return (out, true);
                        }
                        out.push(Occurrence {
                            start: occ_start,
                            end: occ_end,
                        });
                    }
                }
                week = match week.checked_add_signed(Duration::weeks(step)) {
                    Some(next) => next,
                    None => break,
                };
            }
            (out, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        parse_datetime(s).expect("datetime")
    }

    #[test]
    fn parses_naive_and_offset_forms() {
        assert_eq!(format_datetime(dt("2025-09-01T08:00")), "2025-09-01T08:00:00");
        assert_eq!(
            format_datetime(dt("2025-09-01T08:00:00+07:00")),
            "2025-09-01T01:00:00"
        );
        assert_eq!(format_datetime(dt("2025-09-01 08:30:15")), "2025-09-01T08:30:15");
        assert!(parse_datetime("yesterday").is_none());
        assert!(parse_datetime("   ").is_none());
    }

    #[test]
    fn span_requires_end_after_start() {
        assert_eq!(
            validate_span("2025-09-01T10:00", "2025-09-01T10:00"),
            Err(ScheduleError::EndNotAfterStart)
        );
        assert_eq!(
            validate_span("nope", "2025-09-01T10:00"),
            Err(ScheduleError::BadDateTime("startsAt"))
        );
    }

    #[test]
    fn empty_days_default_to_start_weekday() {
        // 2025-09-01 is a Monday.
        let rule = Recurrence::parse(
            Some(&json!({ "type": "weekly", "days": [] })),
            dt("2025-09-01T08:00"),
        )
        .expect("rule");
        assert_eq!(
            rule,
            Recurrence::Weekly {
                days: vec![1],
                interval: 1,
                until: None
            }
        );
    }

    #[test]
    fn rejects_bad_rules() {
        let start = dt("2025-09-01T08:00");
        assert!(Recurrence::parse(Some(&json!({ "type": "monthly" })), start).is_err());
        assert!(Recurrence::parse(Some(&json!({ "days": [7] })), start).is_err());
        assert!(Recurrence::parse(Some(&json!({ "interval": 0 })), start).is_err());
        assert!(Recurrence::parse(Some(&json!({ "until": "2025-08-01" })), start).is_err());
        assert_eq!(
            Recurrence::parse(Some(&json!({ "type": "none" })), start),
            Ok(Recurrence::Once)
        );
    }

    #[test]
    fn weekly_expansion_respects_days_and_date_only_until() {
        let start = dt("2025-09-01T08:00");
        let end = dt("2025-09-01T09:30");
        let rule = Recurrence::parse(
            Some(&json!({ "type": "weekly", "days": [1, 3], "until": "2025-09-10" })),
            start,
        )
        .expect("rule");
        let (occ, truncated) = expand(
            start,
            end,
            &rule,
            dt("2025-08-25T00:00"),
            dt("2025-09-30T00:00"),
            100,
        );
        assert!(!truncated);
        let starts: Vec<String> = occ.iter().map(|o| format_datetime(o.start)).collect();
        assert_eq!(
            starts,
            vec![
                "2025-09-01T08:00:00",
                "2025-09-03T08:00:00",
                "2025-09-08T08:00:00",
                "2025-09-10T08:00:00",
            ]
        );
        assert!(occ.iter().all(|o| o.end - o.start == Duration::minutes(90)));
    }

    #[test]
    fn biweekly_interval_skips_alternate_weeks() {
        let start = dt("2025-09-02T14:00");
        let end = dt("2025-09-02T15:00");
        let rule = Recurrence::parse(Some(&json!({ "days": [2], "interval": 2 })), start)
            .expect("rule");
        let (occ, _) = expand(
            start,
            end,
            &rule,
            dt("2025-09-01T00:00"),
            dt("2025-10-01T00:00"),
            100,
        );
        let starts: Vec<String> = occ.iter().map(|o| format_datetime(o.start)).collect();
        assert_eq!(
            starts,
            vec!["2025-09-02T14:00:00", "2025-09-16T14:00:00", "2025-09-30T14:00:00"]
        );
    }

    #[test]
    fn occurrence_straddling_window_start_is_included() {
        let start = dt("2025-09-01T23:00");
        let end = dt("2025-09-02T01:00");
        let (occ, _) = expand(
            start,
            end,
            &Recurrence::Once,
            dt("2025-09-02T00:00"),
            dt("2025-09-03T00:00"),
            10,
        );
        assert_eq!(occ.len(), 1);
    }

    #[test]
    fn limit_marks_truncation() {
        let start = dt("2025-09-01T08:00");
        let end = dt("2025-09-01T09:00");
        let rule = Recurrence::parse(Some(&json!({ "days": [0, 1, 2, 3, 4, 5, 6] })), start)
            .expect("rule");
        let (occ, truncated) = expand(
            start,
            end,
            &rule,
            dt("2025-09-01T00:00"),
            dt("2025-12-01T00:00"),
            5,
        );
        assert_eq!(occ.len(), 5);
        assert!(truncated);
    }

    #[test]
    fn distant_window_keeps_interval_phase() {
        let start = dt("2025-09-02T14:00");
        let end = dt("2025-09-02T15:00");
        let rule = Recurrence::parse(Some(&json!({ "days": [2, 4], "interval": 2 })), start)
            .expect("rule");
        // 2125-09-02 is a Sunday, 5218 weeks after the start week.
        let (occ, truncated) = expand(
            start,
            end,
            &rule,
            dt("2125-09-02T00:00"),
            dt("2125-09-16T00:00"),
            100,
        );
        assert!(!truncated);
        let starts: Vec<String> = occ.iter().map(|o| format_datetime(o.start)).collect();
        assert_eq!(starts, vec!["2125-09-04T14:00:00", "2125-09-06T14:00:00"]);
    }

    #[test]
    fn wide_window_stops_at_limit() {
        let start = dt("2025-09-01T08:00");
        let end = dt("2025-09-01T09:00");
        let rule = Recurrence::parse(Some(&json!({ "days": [1] })), start).expect("rule");
        let (occ, truncated) = expand(
            start,
            end,
            &rule,
            dt("2025-01-01T00:00"),
            dt("9999-12-31T00:00"),
            3,
        );
        assert!(truncated);
        assert_eq!(format_datetime(occ[2].start), "2025-09-15T08:00:00");
    }
}
