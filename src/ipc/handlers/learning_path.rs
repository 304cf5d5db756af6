use crate::config;
use crate::db;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_subject_visible, new_id, opt_f64, opt_str, respond,
    string_array, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::learning_path::{self, PlanItem, PlanRequest};
use crate::recurrence;
use chrono::NaiveDate;
use serde_json::json;

fn handle_generate(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let p = &req.params;
    let subjects = match p.get("subjects") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(v) => string_array(v, "subjects")?,
    };
    let available_days = match p.get("availableDays") {
        None | Some(serde_json::Value::Null) => vec!["mon".into(), "wed".into(), "fri".into()],
        Some(v) => string_array(v, "availableDays")?,
    };
    let hours_per_week = opt_f64(p, "hoursPerWeek")?.unwrap_or(6.0);
    if hours_per_week <= 0.0 {
        return Err(HandlerErr::bad_params("hoursPerWeek must be positive"));
    }
    let today = match opt_str(p, "today")? {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("today must be YYYY-MM-DD"))?,
        None => chrono::Utc::now().date_naive(),
    };
    let plan_req = PlanRequest {
        goal: opt_str(p, "goal")?.unwrap_or_default(),
        deadline: opt_str(p, "deadline")?.unwrap_or_default(),
        hours_per_week,
        available_days,
        preferred_time: opt_str(p, "preferredTime")?.unwrap_or_else(|| "19:00-21:00".to_string()),
        subjects,
        level: opt_str(p, "level")?.unwrap_or_else(|| "beginner".to_string()),
        today,
    };
    let settings = config::learning_path_settings(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let plan = learning_path::generate(&plan_req, &settings)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    Ok(json!({ "plan": plan }))
}

fn handle_apply(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let user = state.user.as_deref();
    let raw = req
        .params
        .get("plan")
        .filter(|v| v.is_array())
        .ok_or_else(|| HandlerErr::bad_params("plan must be an array"))?;
    let items: Vec<PlanItem> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("plan: {}", e)))?;

    let mut rows = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let (Some(starts_at), Some(ends_at)) = (item.starts_at.as_deref(), item.ends_at.as_deref()) else {
            continue;
        };
        let (start, end) = match recurrence::validate_span(starts_at, ends_at) {
            Ok(span) => span,
            Err(e) => {
                tracing::warn!(item = i, error = %e, "skipping plan item");
                continue;
            }
        };
        if let Some(sid) = item.subject_id.as_deref() {
            ensure_subject_visible(conn, user, sid)?;
        }
        rows.push((item, start, end));
    }
    if rows.is_empty() {
        return Err(HandlerErr::bad_params("no valid plan items"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let now = db::now_ts();
    let mut ids = Vec::with_capacity(rows.len());
    for (item, start, end) in rows {
        let id = new_id();
        tx.execute(
            "INSERT INTO schedules(id, subject_id, title, starts_at, ends_at, location, note, recurrence_rule, user_id, created_at)
             VALUES(?, ?, ?, ?, ?, NULL, ?, NULL, ?, ?)",
            rusqlite::params![
                id,
                item.subject_id,
                item.title,
                recurrence::format_datetime(start),
                recurrence::format_datetime(end),
                item.focus,
                user,
                now
            ],
        )
        .map_err(db_err("db_insert_failed"))?;
        ids.push(id);
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(created = ids.len(), "learning path applied");
    Ok(json!({ "created": ids.len(), "scheduleIds": ids }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "learningPath.generate" => handle_generate(state, req),
        "learningPath.apply" => handle_apply(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
