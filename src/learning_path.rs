use crate::config::LearningPathSettings;
use crate::recurrence::STORED_FORMAT;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_WINDOW: (u32, u32) = (19 * 60, 21 * 60);

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("subjects is required")]
    NoSubjects,
    #[error("goal is required")]
    NoGoal,
    #[error("deadline invalid, expected YYYY-MM-DD")]
    BadDeadline,
    #[error("unknown day: {0}")]
    BadDay(String),
    #[error("availableDays must name at least one day")]
    NoDays,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub doc_refs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub goal: String,
    pub deadline: String,
    pub hours_per_week: f64,
    pub available_days: Vec<String>,
    pub preferred_time: String,
    pub subjects: Vec<String>,
    pub level: String,
    pub today: NaiveDate,
}

pub fn parse_day(s: &str) -> Result<Weekday, PlanError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        _ => Err(PlanError::BadDay(s.to_string())),
    }
}

/// `HH:MM-HH:MM` as minutes since midnight; the end must follow the start.
pub fn parse_time_range(s: &str) -> Option<(u32, u32)> {
    let (a, b) = s.split_once('-')?;
    let start = NaiveTime::parse_from_str(a.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(b.trim(), "%H:%M").ok()?;
    let to_min = |t: NaiveTime| {
        use chrono::Timelike;
        t.hour() * 60 + t.minute()
    };
    let (start, end) = (to_min(start), to_min(end));
    (end > start).then_some((start, end))
}

fn level_label(level: &str) -> &'static str {
    match level {
        "beginner" => "Basics",
        "intermediate" => "Review",
        _ => "Advanced",
    }
}

pub fn session_minutes(hours_per_week: f64, days: usize, settings: &LearningPathSettings) -> i64 {
    let raw = (hours_per_week * 60.0 / days.max(1) as f64).round() as i64;
    raw.clamp(settings.min_session_minutes, settings.max_session_minutes)
}

/// One session per available day from `today` through the deadline, cycling
/// through subjects.
pub fn generate(req: &PlanRequest, settings: &LearningPathSettings) -> Result<Vec<PlanItem>, PlanError> {
    if req.subjects.is_empty() {
        return Err(PlanError::NoSubjects);
    }
    if req.goal.trim().is_empty() {
        return Err(PlanError::NoGoal);
    }
    let deadline =
        NaiveDate::parse_from_str(req.deadline.trim(), "%Y-%m-%d").map_err(|_| PlanError::BadDeadline)?;
    let days = req
        .available_days
        .iter()
        .map(|d| parse_day(d))
        .collect::<Result<Vec<_>, _>>()?;
    if days.is_empty() {
        return Err(PlanError::NoDays);
    }

    let (start_m, end_m) = parse_time_range(&req.preferred_time).unwrap_or(DEFAULT_WINDOW);
    let per_session = session_minutes(req.hours_per_week, days.len(), settings);
    let session_end = (end_m as i64).min(start_m as i64 + per_session);
    let label = level_label(req.level.trim());

    let mut items = Vec::new();
    let mut cur = req.today;
    while cur <= deadline && items.len() < settings.max_items {
        if days.contains(&cur.weekday()) {
            let midnight = cur.and_time(NaiveTime::MIN);
            let starts = midnight + Duration::minutes(start_m as i64);
            let ends = midnight + Duration::minutes(session_end);
            let subject = &req.subjects[items.len() % req.subjects.len()];
            items.push(PlanItem {
                subject_id: Some(subject.clone()),
                title: Some(format!("Session {}: {}", items.len() + 1, label)),
                starts_at: Some(starts.format(STORED_FORMAT).to_string()),
                ends_at: Some(ends.format(STORED_FORMAT).to_string()),
                focus: Some(req.goal.trim().to_string()),
                doc_refs: Vec::new(),
            });
        }
        cur = match cur.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    Ok(items)
}
